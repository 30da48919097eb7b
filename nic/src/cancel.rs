//! Cooperative interruption flag.
//!
//! The statement executor polls this flag between statements and unwinds
//! with `VmError::Interrupted` when it is set. The flag is process-wide
//! and async-signal-safe, so an embedding host may set it from a signal
//! handler; the interpreter itself only ever reads and resets it.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Request interruption of the running script.
pub fn request() {
    INTERRUPT_REQUESTED.store(true, Ordering::SeqCst);
}

/// Clear a pending request, typically before starting a new script.
pub fn reset() {
    INTERRUPT_REQUESTED.store(false, Ordering::SeqCst);
}

pub fn is_requested() -> bool {
    INTERRUPT_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_and_reset() {
        reset();
        assert!(!is_requested());
        request();
        assert!(is_requested());
        reset();
        assert!(!is_requested());
    }
}
