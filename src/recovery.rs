//! Recovery Controller (C5): detects a dead/stuck CDB and restarts it.
//!
//! Grounded in the teacher's retry shape for subprocess launches in
//! `process.rs` (spawn, check, back off, retry), generalized here to a
//! full stop/restart cycle instead of a single spawn attempt. The three
//! detection signals and the cancel-stop-start-notify procedure come
//! straight from the specification; the backoff constants are fixed by it
//! (1s, doubling, capped at 30s) and only the attempt ceiling is
//! configurable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::cdb::{CdbAdapter, DebugTarget};
use crate::notify::{self, NotificationEvent, NotificationSink, SessionRecoveryEvent};
use crate::queue::CommandQueue;

/// Which of the three detection signals fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTrigger {
    AdapterDead,
    RepeatedIdleTimeout,
    Explicit,
}

impl RecoveryTrigger {
    fn reason(self) -> &'static str {
        match self {
            RecoveryTrigger::AdapterDead => "cdb process is no longer alive",
            RecoveryTrigger::RepeatedIdleTimeout => "two consecutive idle timeouts",
            RecoveryTrigger::Explicit => "explicit recovery request",
        }
    }
}

/// Result of one `recover()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered,
    Faulted,
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: u32 = 2;
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// A session's two consecutive-idle-timeout threshold, per the specification.
const IDLE_TIMEOUT_STREAK_THRESHOLD: u32 = 2;

pub struct RecoveryController {
    max_attempts: u32,
    sink: Arc<dyn NotificationSink>,
}

impl RecoveryController {
    #[must_use]
    pub fn new(max_attempts: u32, sink: Arc<dyn NotificationSink>) -> Self {
        Self { max_attempts: max_attempts.max(1), sink }
    }

    /// Checks the liveness signals the specification names. Does not itself
    /// hold the adapter lock across a await point -- callers sample a quick
    /// snapshot and decide whether to invoke `recover`.
    pub fn detect(&self, alive: bool, idle_timeout_streak: u32) -> Option<RecoveryTrigger> {
        if !alive {
            return Some(RecoveryTrigger::AdapterDead);
        }
        if idle_timeout_streak >= IDLE_TIMEOUT_STREAK_THRESHOLD {
            return Some(RecoveryTrigger::RepeatedIdleTimeout);
        }
        None
    }

    /// Runs the full recovery procedure: cancel everything outstanding on
    /// `queue`, then stop/restart `adapter` with exponential backoff up to
    /// `max_attempts`. Emits exactly one `SessionRecovery` notification per
    /// call, reflecting the final outcome.
    pub async fn recover(
        &self,
        session_id: &str,
        trigger: RecoveryTrigger,
        adapter: &Arc<AsyncMutex<CdbAdapter>>,
        queue: &CommandQueue,
        target: &DebugTarget,
        symbols_path: Option<&str>,
    ) -> RecoveryOutcome {
        warn!(session_id = %session_id, trigger = ?trigger, "recovery triggered");
        let affected_commands = queue.cancel_all("CDB recovery").await;

        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=self.max_attempts {
            {
                let mut guard = adapter.lock().await;
                guard.stop(target).await;
            }
            let started = {
                let mut guard = adapter.lock().await;
                guard.start(target, symbols_path).await
            };
            match started {
                Ok(()) => {
                    info!(session_id = %session_id, attempt, "cdb recovered");
                    self.emit(session_id, trigger, true, "cdb restarted successfully", &affected_commands);
                    return RecoveryOutcome::Recovered;
                }
                Err(e) => {
                    warn!(session_id = %session_id, attempt, error = %e, "recovery attempt failed");
                    if attempt == self.max_attempts {
                        self.emit(
                            session_id,
                            trigger,
                            false,
                            &format!("recovery exhausted after {attempt} attempts: {e}"),
                            &affected_commands,
                        );
                        return RecoveryOutcome::Faulted;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * BACKOFF_FACTOR).min(BACKOFF_CAP);
                }
            }
        }
        // unreachable: the loop above always returns by its last iteration.
        RecoveryOutcome::Faulted
    }

    fn emit(&self, session_id: &str, trigger: RecoveryTrigger, success: bool, message: &str, affected_commands: &[String]) {
        self.sink.notify(NotificationEvent::SessionRecovery(SessionRecoveryEvent {
            session_id: session_id.to_string(),
            reason: trigger.reason().to_string(),
            recovery_step: "restart".to_string(),
            success,
            message: message.to_string(),
            affected_commands: affected_commands.to_vec(),
            timestamp_ms: notify::now_ms(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_prefers_dead_adapter_over_idle_streak() {
        let controller = RecoveryController::new(3, Arc::new(crate::notify::BroadcastSink::default()));
        assert_eq!(controller.detect(false, 0), Some(RecoveryTrigger::AdapterDead));
        assert_eq!(controller.detect(true, 2), Some(RecoveryTrigger::RepeatedIdleTimeout));
        assert_eq!(controller.detect(true, 1), None);
    }

    #[test]
    fn zero_configured_attempts_is_clamped_to_one() {
        let controller = RecoveryController::new(0, Arc::new(crate::notify::BroadcastSink::default()));
        assert_eq!(controller.max_attempts, 1);
    }
}
