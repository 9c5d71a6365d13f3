//! Session-level serialisation of AI turns and context reconciliation
//!
//! Prompt assembly reads the active context, and applying changes writes it.
//! Both enter this gate; whoever finds it occupied is turned away.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

/// What the session is busy with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Generating,
    Reconciling,
}

impl Activity {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Activity::Generating,
            2 => Activity::Reconciling,
            _ => Activity::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Activity::Idle => 0,
            Activity::Generating => 1,
            Activity::Reconciling => 2,
        }
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activity::Idle => write!(f, "idle"),
            Activity::Generating => write!(f, "generating"),
            Activity::Reconciling => write!(f, "reconciling"),
        }
    }
}

/// At most one of Generating / Reconciling at a time
#[derive(Debug, Default)]
pub struct ActivityGate {
    state: AtomicU8,
}

impl ActivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Activity {
        Activity::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Occupy the gate, or report what currently holds it
    pub fn try_enter(&self, activity: Activity) -> Result<GateGuard<'_>, Activity> {
        debug_assert!(activity != Activity::Idle);
        match self.state.compare_exchange(
            Activity::Idle.as_u8(),
            activity.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                debug!(%activity, "ActivityGate: entered");
                Ok(GateGuard { gate: self })
            }
            Err(current) => {
                let current = Activity::from_u8(current);
                debug!(%activity, %current, "ActivityGate: busy");
                Err(current)
            }
        }
    }
}

/// Releases the gate on drop
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a ActivityGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.store(Activity::Idle.as_u8(), Ordering::SeqCst);
    }
}
