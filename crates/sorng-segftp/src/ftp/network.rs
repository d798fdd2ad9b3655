//! Process-wide network stack state.
//!
//! The stack is started before the first control connection and shut down
//! once the last one is released, never per connection. Each live session
//! holds a [`NetworkLease`].

use lazy_static::lazy_static;
use serde::Serialize;
use std::sync::{Mutex as StdMutex, MutexGuard};

#[derive(Debug, Default)]
struct NetworkStack {
    started: bool,
    live_sessions: usize,
    startups: u64,
}

lazy_static! {
    static ref NETWORK_STACK: StdMutex<NetworkStack> = StdMutex::new(NetworkStack::default());
}

fn stack() -> MutexGuard<'static, NetworkStack> {
    NETWORK_STACK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot of the process-wide state.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub started: bool,
    pub live_sessions: usize,
    /// How many times the stack has been brought up in this process.
    pub startups: u64,
}

pub fn status() -> NetworkStatus {
    let s = stack();
    NetworkStatus {
        started: s.started,
        live_sessions: s.live_sessions,
        startups: s.startups,
    }
}

/// Bring the stack up. Idempotent.
pub fn startup() {
    let mut s = stack();
    start_locked(&mut s);
}

fn start_locked(s: &mut NetworkStack) {
    if !s.started {
        s.started = true;
        s.startups += 1;
        log::debug!("FTP network stack started");
    }
}

/// Tear the stack down if no session still holds a lease. Returns whether
/// the stack is down afterwards.
pub fn shutdown() -> bool {
    let mut s = stack();
    if s.live_sessions > 0 {
        log::warn!(
            "FTP network stack shutdown refused: {} session(s) still open",
            s.live_sessions
        );
        return false;
    }
    if s.started {
        s.started = false;
        log::debug!("FTP network stack shut down");
    }
    true
}

/// Lease held by one control connection for its whole lifetime.
#[derive(Debug)]
pub struct NetworkLease {
    released: bool,
}

/// Start the stack if needed and register one more live session.
pub fn acquire() -> NetworkLease {
    let mut s = stack();
    start_locked(&mut s);
    s.live_sessions += 1;
    NetworkLease { released: false }
}

impl NetworkLease {
    /// Give the lease back; the last one out shuts the stack down.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut s = stack();
        s.live_sessions = s.live_sessions.saturating_sub(1);
        if s.live_sessions == 0 && s.started {
            s.started = false;
            log::debug!("FTP network stack shut down (last session closed)");
        }
    }
}

impl Drop for NetworkLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_keeps_stack_up_and_blocks_shutdown() {
        let mut lease = acquire();
        let st = status();
        assert!(st.started);
        assert!(st.live_sessions >= 1);
        assert!(!shutdown());
        assert!(status().started);
        lease.release();
        assert!(lease.released);
        // Second release (and the Drop that follows) is a no-op.
        lease.release();
    }

    #[test]
    fn startup_counts_transitions_only() {
        let _lease = acquire();
        let before = status().startups;
        startup();
        startup();
        assert_eq!(status().startups, before);
    }
}
