//! Supervisor: polls pool and queue health at a fixed cadence and listens
//! for external control messages.
//!
//! Runs on its own thread, sharing nothing but `Arc<Pool>` handles and a
//! `SignalBus` clone with the stages it watches.

use std::sync::Arc;

use thiserror::Error;
use ts_pool::Pool;
use ts_signal::{SignalBus, SignalKind};

pub const QUEUE_WARNING_THRESHOLD: usize = 8;
pub const QUEUE_ERROR_THRESHOLD: usize = 15;
pub const QUEUE_FATAL_THRESHOLD: usize = 30;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("pool '{pool}' reported zero capacity, cannot be supervised")]
    ZeroCapacityPool { pool: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Stop,
    Restart,
    Respawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Continue,
    StopRequested,
    RestartRequested,
    Terminate,
}

pub struct Supervisor {
    pools: Vec<Arc<Pool>>,
    signal_bus: SignalBus,
}

impl Supervisor {
    pub fn new(pools: Vec<Arc<Pool>>, signal_bus: SignalBus) -> Result<Self, SupervisorError> {
        for pool in &pools {
            if pool.capacity() == 0 {
                return Err(SupervisorError::ZeroCapacityPool { pool: pool.name() });
            }
        }
        Ok(Self { pools, signal_bus })
    }

    /// Logs every watched pool's occupancy. Pool exhaustion itself is
    /// handled at the point of `take()` failure, not here — this is
    /// observability, not enforcement.
    pub fn log_pool_health(&self) {
        for pool in &self.pools {
            tracing::debug!(
                pool = pool.name(),
                unused = pool.unused_count(),
                capacity = pool.capacity(),
                "pool health"
            );
        }
    }

    /// Evaluate one named queue's depth against the warning/error/fatal
    /// thresholds. Returns `true` if the fatal threshold was crossed,
    /// meaning the caller must terminate the process.
    pub fn check_queue_depth(&self, queue_name: &str, depth: usize) -> bool {
        if depth >= QUEUE_FATAL_THRESHOLD {
            self.signal_bus.emit(
                SignalKind::ErrorCpu,
                format!("queue '{queue_name}' depth {depth} exceeded fatal threshold {QUEUE_FATAL_THRESHOLD}"),
            );
            return true;
        }
        if depth >= QUEUE_WARNING_THRESHOLD {
            let severity = if depth >= QUEUE_ERROR_THRESHOLD { "error" } else { "warning" };
            self.signal_bus.emit(
                SignalKind::HighCpu,
                format!("queue '{queue_name}' depth {depth} crossed {severity} threshold"),
            );
        }
        false
    }

    pub fn handle_control(&self, msg: ControlMessage) -> SupervisorOutcome {
        match msg {
            ControlMessage::Stop => SupervisorOutcome::StopRequested,
            ControlMessage::Restart => SupervisorOutcome::RestartRequested,
            ControlMessage::Respawn => {
                self.signal_bus
                    .emit(SignalKind::ServiceRestart, "respawn requested by control channel");
                SupervisorOutcome::Terminate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> (Supervisor, ts_signal::SignalReceiver) {
        let (bus, rx) = SignalBus::channel();
        let pool = Pool::new("test", 4, 16);
        (Supervisor::new(vec![pool], bus).unwrap(), rx)
    }

    #[test]
    fn depth_below_warning_is_silent() {
        let (supervisor, rx) = supervisor();
        assert!(!supervisor.check_queue_depth("encoder", 3));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn depth_at_warning_emits_high_cpu() {
        let (supervisor, rx) = supervisor();
        assert!(!supervisor.check_queue_depth("encoder", QUEUE_WARNING_THRESHOLD));
        assert!(matches!(rx.recv().unwrap().kind, SignalKind::HighCpu));
    }

    #[test]
    fn depth_at_fatal_emits_error_cpu_and_signals_terminate() {
        let (supervisor, rx) = supervisor();
        assert!(supervisor.check_queue_depth("encoder", QUEUE_FATAL_THRESHOLD));
        assert!(matches!(rx.recv().unwrap().kind, SignalKind::ErrorCpu));
    }

    #[test]
    fn respawn_control_message_requests_termination() {
        let (supervisor, rx) = supervisor();
        let outcome = supervisor.handle_control(ControlMessage::Respawn);
        assert_eq!(outcome, SupervisorOutcome::Terminate);
        assert!(matches!(rx.recv().unwrap().kind, SignalKind::ServiceRestart));
    }

    #[test]
    fn stop_and_restart_control_messages_are_distinguished() {
        let (supervisor, _rx) = supervisor();
        assert_eq!(supervisor.handle_control(ControlMessage::Stop), SupervisorOutcome::StopRequested);
        assert_eq!(
            supervisor.handle_control(ControlMessage::Restart),
            SupervisorOutcome::RestartRequested
        );
    }

    #[test]
    fn zero_capacity_pool_is_rejected_at_construction() {
        let (bus, _rx) = SignalBus::channel();
        let pool = Pool::new("empty", 0, 16);
        assert!(Supervisor::new(vec![pool], bus).is_err());
    }
}
