//! Cooperative cancellation flag.

use tokio_util::sync::CancellationToken;

/// Shared cancellation state checked between steps and loop iterations.
///
/// Cloning yields a handle to the same flag. Setting it never interrupts an
/// in-flight wait; flows observe it at their next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    token: CancellationToken,
}

impl CancelFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested on this flag or any ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A flag that observes this one but can be cancelled on its own.
    ///
    /// Cancelling the child leaves the parent untouched.
    pub fn child_token(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
