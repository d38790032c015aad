//! Cancellable subscription handle.

use std::fmt::{Debug, Formatter};

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle returned by every `subscribe_*` call.
///
/// Delivery stops once the handle is cancelled or dropped. Cancelling twice
/// is a no-op.
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    label: String,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle with nothing to cancel, for sources that never deliver again.
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cancel: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
