//! Process-wide lock gate
//!
//! Set while the host's screen is locked. Connection handlers refuse
//! `COMMAND` requests while the gate is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared lock flag, starts unlocked
#[derive(Debug, Clone, Default)]
pub struct LockGate {
    locked: Arc<AtomicBool>,
}

impl LockGate {
    /// Create a new, unlocked gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the "locked" event
    pub fn lock(&self) {
        if !self.locked.swap(true, Ordering::SeqCst) {
            tracing::info!("Command processing suspended (locked)");
        }
    }

    /// Handle the "unlocked" event
    pub fn unlock(&self) {
        if self.locked.swap(false, Ordering::SeqCst) {
            tracing::info!("Command processing resumed (unlocked)");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_shared_between_clones() {
        let gate = LockGate::new();
        let other = gate.clone();
        assert!(!gate.is_locked());

        other.lock();
        assert!(gate.is_locked());
        other.lock();
        assert!(gate.is_locked());

        gate.unlock();
        assert!(!other.is_locked());
    }
}
