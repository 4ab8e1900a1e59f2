use sysupd_core::{CallError, Caller};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub caller: Caller,
    /// Name signals are addressed to, as registered by `Init`.
    pub destination: String,
}

/// The single session slot of a worker lifetime.
///
/// Once a session has been bound and then closed the slot never binds again.
#[derive(Debug, Default)]
pub struct SessionSlot {
    bound: Option<Session>,
    closed: bool,
}

impl SessionSlot {
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_bound_to(&self, caller: &Caller) -> bool {
        self.bound
            .as_ref()
            .is_some_and(|session| session.caller.name == caller.name)
    }

    pub fn session(&self) -> Option<&Session> {
        self.bound.as_ref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.bound
            .as_ref()
            .map(|session| session.destination.as_str())
    }

    /// Rejects an `Init` that could never bind.
    pub fn check_bindable(&self) -> Result<(), CallError> {
        if let Some(session) = &self.bound {
            return Err(CallError::Session(format!(
                "a session is already bound to {}",
                session.caller
            )));
        }
        if self.closed {
            return Err(CallError::Session(
                "the session of this worker has ended".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind(&mut self, caller: Caller, destination: String) -> Result<(), CallError> {
        self.check_bindable()?;
        self.bound = Some(Session {
            caller,
            destination,
        });
        Ok(())
    }

    /// Rejects any caller other than the bound one.
    pub fn authorize(&self, caller: &Caller) -> Result<(), CallError> {
        match &self.bound {
            Some(session) if session.caller.name == caller.name => Ok(()),
            Some(session) => Err(CallError::Session(format!(
                "{caller} is not the bound session ({})",
                session.caller
            ))),
            None => Err(CallError::Session(format!(
                "{caller} has no session, call Init first"
            ))),
        }
    }

    pub fn close(&mut self) -> Option<Session> {
        self.closed = true;
        self.bound.take()
    }
}
