//! Caller-visible status flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Read-only view of an engine's current belief (`is-leader` or
/// `is-registered`).
///
/// This is the only state shared between the background task and the
/// caller. Reads are never torn but may be stale; the engines promise no
/// ordering beyond the atomic itself.
#[derive(Debug, Clone, Default)]
pub struct StatusFlag {
    value: Arc<AtomicBool>,
}

impl StatusFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.value.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.value.store(false, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_value() {
        let flag = StatusFlag::new();
        let view = flag.clone();
        assert!(!view.get());
        flag.set();
        assert!(view.get());
        flag.clear();
        assert!(!view.get());
    }
}
