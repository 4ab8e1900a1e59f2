use std::collections::BTreeSet;

use anyhow::Result;
use sysupd_core::Caller;

/// External authorization service consulted once, when a session binds.
pub trait PrivilegeBroker {
    fn check(&self, caller: &Caller, action: &str) -> Result<bool>;
}

impl<F> PrivilegeBroker for F
where
    F: Fn(&Caller, &str) -> Result<bool>,
{
    fn check(&self, caller: &Caller, action: &str) -> Result<bool> {
        self(caller, action)
    }
}

/// Grants callers whose peer uid is root or explicitly listed.
#[derive(Debug, Clone, Default)]
pub struct AllowListBroker {
    uids: BTreeSet<u32>,
}

impl AllowListBroker {
    pub fn new(uids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            uids: uids.into_iter().collect(),
        }
    }
}

impl PrivilegeBroker for AllowListBroker {
    fn check(&self, caller: &Caller, _action: &str) -> Result<bool> {
        Ok(caller
            .uid
            .is_some_and(|uid| uid == 0 || self.uids.contains(&uid)))
    }
}

/// For an in-process link, where caller and worker share one process and
/// there is no boundary to enforce.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameProcessBroker;

impl PrivilegeBroker for SameProcessBroker {
    fn check(&self, _caller: &Caller, _action: &str) -> Result<bool> {
        Ok(true)
    }
}
