use std::collections::BTreeSet;

use sysupd_core::{CallError, Method};

/// Running flags, one per method name.
#[derive(Debug, Default)]
pub struct CallTable {
    running: BTreeSet<Method>,
}

impl CallTable {
    pub fn is_running(&self, method: Method) -> bool {
        self.running.contains(&method)
    }

    /// Marks `method` running, or rejects it if it already is.
    pub fn start(&mut self, method: Method) -> Result<(), CallError> {
        if self.running.insert(method) {
            Ok(())
        } else {
            Err(CallError::ConcurrentCall(method))
        }
    }

    pub fn finish(&mut self, method: Method) -> bool {
        self.running.remove(&method)
    }

    pub fn running(&self) -> impl Iterator<Item = Method> + '_ {
        self.running.iter().copied()
    }
}
