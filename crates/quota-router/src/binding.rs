//! Scoped credential binding
//!
//! Callers that keep a long-lived client configured with "the current key" hand
//! the router a `SharedCredential`. For each attempt the router binds that
//! attempt's key and the guard puts the previous value back when it drops, on
//! success, error, early return, or unwinding alike.

use std::sync::{Arc, RwLock};

use crate::credentials::Credential;

/// Shared handle to the credential a client should use right now.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    slot: Arc<RwLock<Option<Credential>>>,
}

impl SharedCredential {
    /// Handle with nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle bound to `credential` outside of any attempt.
    pub fn with_default(credential: Credential) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(credential))),
        }
    }

    /// The credential currently bound, if any.
    pub fn current(&self) -> Option<Credential> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bind `credential` until the returned guard is dropped.
    #[must_use = "the credential is unbound as soon as the guard is dropped"]
    pub fn bind(&self, credential: &Credential) -> BoundCredential {
        let previous = self.replace(Some(credential.clone()));
        BoundCredential {
            shared: self.clone(),
            previous: Some(previous),
        }
    }

    fn replace(&self, value: Option<Credential>) -> Option<Credential> {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, value)
    }
}

/// Restores the previously bound credential on drop.
#[derive(Debug)]
pub struct BoundCredential {
    shared: SharedCredential,
    previous: Option<Option<Credential>>,
}

impl Drop for BoundCredential {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.shared.replace(previous);
        }
    }
}
