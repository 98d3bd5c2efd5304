//! Shared health state (spec.md §6): updated by the sampler, the PLC
//! gateway, and the command listener, read by the runtime's HTTP health
//! endpoint. Lives here rather than in the runtime crate so every
//! component that observes its own connectivity can report into it
//! without creating a dependency back on the binary crate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct HealthState {
    started_at: Instant,
    plc_connected: AtomicBool,
    db_listen_degraded: AtomicBool,
    db_reachable: AtomicBool,
    sampler_error_count: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Healthy => "healthy",
            Status::Degraded => "degraded",
            Status::Unhealthy => "unhealthy",
        }
    }
}

impl HealthState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            plc_connected: AtomicBool::new(false),
            db_listen_degraded: AtomicBool::new(false),
            db_reachable: AtomicBool::new(true),
            sampler_error_count: AtomicU32::new(0),
        })
    }

    pub fn set_plc_connected(&self, connected: bool) {
        self.plc_connected.store(connected, Ordering::Relaxed);
    }

    pub fn plc_connected(&self) -> bool {
        self.plc_connected.load(Ordering::Relaxed)
    }

    pub fn set_db_listen_degraded(&self, degraded: bool) {
        self.db_listen_degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn db_listen_degraded(&self) -> bool {
        self.db_listen_degraded.load(Ordering::Relaxed)
    }

    pub fn set_db_reachable(&self, reachable: bool) {
        self.db_reachable.store(reachable, Ordering::Relaxed);
    }

    pub fn db_reachable(&self) -> bool {
        self.db_reachable.load(Ordering::Relaxed)
    }

    pub fn record_sampler_error(&self) {
        self.sampler_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sampler_success(&self) {
        self.sampler_error_count.store(0, Ordering::Relaxed);
    }

    pub fn sampler_error_count(&self) -> u32 {
        self.sampler_error_count.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Degraded if any one of {PLC disconnected, DB subscription fallen
    /// back to polling, sampler error_count > 0} holds; unhealthy if PLC
    /// and DB are both unreachable.
    pub fn status(&self) -> Status {
        let plc_ok = self.plc_connected();
        let db_ok = self.db_reachable();

        if !plc_ok && !db_ok {
            return Status::Unhealthy;
        }

        let degraded = !plc_ok || self.db_listen_degraded() || self.sampler_error_count() > 0;

        if degraded {
            Status::Degraded
        } else {
            Status::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_when_everything_nominal() {
        let state = HealthState::new();
        state.set_plc_connected(true);
        assert_eq!(state.status(), Status::Healthy);
    }

    #[test]
    fn degraded_when_plc_disconnected() {
        let state = HealthState::new();
        state.set_plc_connected(false);
        assert_eq!(state.status(), Status::Degraded);
    }

    #[test]
    fn unhealthy_when_plc_and_db_both_down() {
        let state = HealthState::new();
        state.set_plc_connected(false);
        state.set_db_reachable(false);
        assert_eq!(state.status(), Status::Unhealthy);
    }

    #[test]
    fn degraded_when_sampler_has_errors() {
        let state = HealthState::new();
        state.set_plc_connected(true);
        state.record_sampler_error();
        assert_eq!(state.status(), Status::Degraded);
    }

    #[test]
    fn degraded_when_db_listen_fell_back_to_polling() {
        let state = HealthState::new();
        state.set_plc_connected(true);
        state.set_db_listen_degraded(true);
        assert_eq!(state.status(), Status::Degraded);
    }
}
