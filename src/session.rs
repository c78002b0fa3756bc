//! Session Manager (C6): lifecycle, expiry, and concurrency limits for debug
//! sessions.
//!
//! Grounded in the teacher's `SessionManager` (`create`/`exec`/`list`/`close`
//! over an `Arc<Mutex<HashMap<String, _>>>` registry), generalized with a
//! global semaphore for `maxConcurrentSessions` (the teacher only checks a
//! flat `len() >= MAX_SESSIONS`) and a periodic expiry sweep the teacher does
//! not have. Internal `Session` vs. external `SessionSnapshot` follows the
//! Open Question resolution recorded in `DESIGN.md`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cdb::{CdbAdapter, DebugTarget};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::notify::{self, NotificationSink};
use crate::queue::{CommandInfo, CommandQueue};
use crate::recovery::{RecoveryController, RecoveryOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Initializing,
    Active,
    Closing,
    Closed,
    Faulted,
}

/// Internal, non-serializable session record. Owns the adapter and its
/// queue exclusively; a `SessionSnapshot` is derived from this on demand for
/// anything crossing the MCP boundary.
struct Session {
    session_id: String,
    dump_path: PathBuf,
    symbols_path: Option<String>,
    created_at_ms: u64,
    last_activity_ms: AtomicU64,
    status: StdMutex<SessionStatus>,
    adapter: Arc<AsyncMutex<CdbAdapter>>,
    queue: CommandQueue,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    fn touch(&self) {
        self.last_activity_ms.store(notify::now_ms(), Ordering::SeqCst);
    }

    fn status(&self) -> SessionStatus {
        *self.status.lock().expect("session status mutex poisoned")
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().expect("session status mutex poisoned") = status;
    }

    fn target(&self) -> DebugTarget {
        DebugTarget::Dump(self.dump_path.clone())
    }

    async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            dump_path: self.dump_path.display().to_string(),
            symbols_path: self.symbols_path.clone(),
            created_at_ms: self.created_at_ms,
            last_activity_ms: self.last_activity_ms.load(Ordering::SeqCst),
            status: self.status(),
            commands_processed: self.queue.processed_count().await,
        }
    }
}

/// External, serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub dump_path: String,
    pub symbols_path: Option<String>,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub status: SessionStatus,
    pub commands_processed: u64,
}

/// `SessionManager::stats()` counters, per spec.md §4.6.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionManagerStats {
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_expired: u64,
    pub commands_processed: u64,
    pub uptime_seconds: u64,
}

struct Counters {
    sessions_created: u64,
    sessions_closed: u64,
    sessions_expired: u64,
    /// Commands processed by sessions that have since been closed; live
    /// sessions report their own count via `CommandQueue::processed_count`.
    commands_processed_closed: u64,
}

const RECOVERY_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct SessionManager {
    config: Arc<Config>,
    sink: Arc<dyn NotificationSink>,
    sessions: Arc<AsyncMutex<HashMap<String, Arc<Session>>>>,
    semaphore: Arc<Semaphore>,
    counters: Arc<StdMutex<Counters>>,
    started_at_ms: u64,
    cleanup_task: JoinHandle<()>,
    recovery_task: JoinHandle<()>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: Arc<Config>, sink: Arc<dyn NotificationSink>) -> Self {
        let sessions: Arc<AsyncMutex<HashMap<String, Arc<Session>>>> = Arc::new(AsyncMutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_sessions));
        let recovery = Arc::new(RecoveryController::new(config.recovery_max_attempts, sink.clone()));
        let counters = Arc::new(StdMutex::new(Counters {
            sessions_created: 0,
            sessions_closed: 0,
            sessions_expired: 0,
            commands_processed_closed: 0,
        }));

        let cleanup_task = tokio::spawn(cleanup_loop(sessions.clone(), config.clone(), counters.clone()));
        let recovery_task = tokio::spawn(recovery_loop(sessions.clone(), recovery));

        Self { config, sink, sessions, semaphore, counters, started_at_ms: notify::now_ms(), cleanup_task, recovery_task }
    }

    /// Spawns the adapter, constructs the queue, registers the session.
    pub async fn create(&self, dump_path: PathBuf, symbols_path: Option<String>) -> CoreResult<String> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().map_err(|_| CoreError::SessionLimitExceeded {
            current: self.config.max_concurrent_sessions.saturating_sub(self.semaphore.available_permits()),
            max: self.config.max_concurrent_sessions,
        })?;

        let session_id = Uuid::new_v4().to_string();
        let adapter = Arc::new(AsyncMutex::new(CdbAdapter::new(session_id.clone(), self.config.clone())));
        let target = DebugTarget::Dump(dump_path.clone());

        {
            let mut guard = adapter.lock().await;
            guard.start(&target, symbols_path.as_deref()).await?;
        }

        let queue = CommandQueue::spawn(session_id.clone(), adapter.clone(), self.config.clone(), self.sink.clone());
        let now = notify::now_ms();
        let session = Arc::new(Session {
            session_id: session_id.clone(),
            dump_path,
            symbols_path,
            created_at_ms: now,
            last_activity_ms: AtomicU64::new(now),
            status: StdMutex::new(SessionStatus::Active),
            adapter,
            queue,
            _permit: permit,
        });

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(session_id.clone(), session);
        }
        self.counters.lock().expect("counters mutex poisoned").sessions_created += 1;
        info!(session_id = %session_id, "session created");
        Ok(session_id)
    }

    /// Idempotent. Returns `true` if a session was found and closed.
    pub async fn close(&self, session_id: &str) -> bool {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(session_id)
        };
        let Some(session) = session else { return false };
        close_session(&self.counters, &session).await;
        info!(session_id = %session_id, "session closed");
        true
    }

    pub async fn get(&self, session_id: &str) -> CoreResult<SessionSnapshot> {
        let session = self.lookup(session_id).await?;
        Ok(session.snapshot().await)
    }

    /// Whether `session_id` names a session currently usable for new work
    /// (present, and in `Active` or `Faulted`).
    pub async fn try_queue(&self, session_id: &str) -> bool {
        self.lookup(session_id).await.is_ok()
    }

    pub async fn touch(&self, session_id: &str) -> CoreResult<()> {
        let session = self.lookup(session_id).await?;
        session.touch();
        Ok(())
    }

    pub async fn enqueue(&self, session_id: &str, command_text: String) -> CoreResult<String> {
        let session = self.lookup(session_id).await?;
        if session.status() == SessionStatus::Faulted {
            return Err(CoreError::SessionFaulted(session_id.to_string()));
        }
        session.touch();
        Ok(session.queue.enqueue(command_text).await)
    }

    pub async fn command_status(&self, session_id: &str, command_id: &str) -> CoreResult<CommandInfo> {
        let session = self.lookup(session_id).await?;
        session.touch();
        session.queue.status(command_id).await
    }

    pub async fn command_status_bulk(&self, session_id: &str, command_ids: &[String]) -> CoreResult<HashMap<String, CoreResult<CommandInfo>>> {
        let session = self.lookup(session_id).await?;
        session.touch();
        Ok(session.queue.status_bulk(command_ids).await)
    }

    pub async fn cancel_command(&self, session_id: &str, command_id: &str, reason: &str) -> CoreResult<bool> {
        let session = self.lookup(session_id).await?;
        session.touch();
        Ok(session.queue.cancel(command_id, reason).await)
    }

    pub async fn cancel_all_commands(&self, session_id: &str, reason: &str) -> CoreResult<Vec<String>> {
        let session = self.lookup(session_id).await?;
        session.touch();
        Ok(session.queue.cancel_all(reason).await)
    }

    pub async fn list_active(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.lock().await;
        let mut out = Vec::new();
        for session in sessions.values().filter(|s| s.status() == SessionStatus::Active) {
            out.push(session.snapshot().await);
        }
        out
    }

    pub async fn list_all(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.lock().await;
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            out.push(session.snapshot().await);
        }
        out
    }

    pub async fn stats(&self) -> SessionManagerStats {
        let live_commands_processed = {
            let sessions = self.sessions.lock().await;
            let mut total = 0u64;
            for session in sessions.values() {
                total += session.queue.processed_count().await;
            }
            total
        };
        let counters = self.counters.lock().expect("counters mutex poisoned");
        SessionManagerStats {
            sessions_created: counters.sessions_created,
            sessions_closed: counters.sessions_closed,
            sessions_expired: counters.sessions_expired,
            commands_processed: counters.commands_processed_closed + live_commands_processed,
            uptime_seconds: notify::now_ms().saturating_sub(self.started_at_ms) / 1000,
        }
    }

    /// Fails with `SessionNotFound` for an absent session, or one not
    /// currently in `Active`/`Faulted`.
    async fn lookup(&self, session_id: &str) -> CoreResult<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(session) if matches!(session.status(), SessionStatus::Active | SessionStatus::Faulted) => Ok(session.clone()),
            _ => Err(CoreError::SessionNotFound(session_id.to_string())),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cleanup_task.abort();
        self.recovery_task.abort();
    }
}

async fn close_session(counters: &StdMutex<Counters>, session: &Arc<Session>) {
    session.set_status(SessionStatus::Closing);
    session.queue.dispose().await;
    session.adapter.lock().await.stop(&session.target()).await;
    let processed = session.queue.processed_count().await;
    session.set_status(SessionStatus::Closed);
    let mut c = counters.lock().expect("counters mutex poisoned");
    c.sessions_closed += 1;
    c.commands_processed_closed += processed;
}

/// Periodic expiry sweep: closes any `Active` session idle past
/// `sessionTimeout`. Best-effort -- a session that can't be swept this tick
/// is simply retried on the next one.
async fn cleanup_loop(sessions: Arc<AsyncMutex<HashMap<String, Arc<Session>>>>, config: Arc<Config>, counters: Arc<StdMutex<Counters>>) {
    let mut interval = tokio::time::interval(config.cleanup_interval);
    loop {
        interval.tick().await;
        let now = notify::now_ms();
        let (expired, live): (Vec<(String, Arc<Session>)>, Vec<Arc<Session>>) = {
            let mut sessions = sessions.lock().await;
            let mut expired = Vec::new();
            let mut live = Vec::new();
            sessions.retain(|id, session| {
                let idle = Duration::from_millis(now.saturating_sub(session.last_activity_ms.load(Ordering::SeqCst)));
                let should_expire = session.status() == SessionStatus::Active && idle >= config.session_timeout;
                if should_expire {
                    expired.push((id.clone(), session.clone()));
                } else {
                    live.push(session.clone());
                }
                !should_expire
            });
            (expired, live)
        };
        for (id, session) in expired {
            warn!(session_id = %id, "session idle past timeout, expiring");
            close_session(&counters, &session).await;
            counters.lock().expect("counters mutex poisoned").sessions_expired += 1;
        }
        for session in live {
            session.queue.enforce_memory_budget(config.memory_cleanup_threshold_bytes).await;
        }
    }
}

/// Periodic liveness sweep driving the Recovery Controller: every
/// `RECOVERY_POLL_INTERVAL`, checks each `Active` session's adapter for the
/// two detection signals it owns (dead process, repeated idle timeout) and
/// hands off to `RecoveryController::recover` when one fires.
async fn recovery_loop(sessions: Arc<AsyncMutex<HashMap<String, Arc<Session>>>>, recovery: Arc<RecoveryController>) {
    let mut interval = tokio::time::interval(RECOVERY_POLL_INTERVAL);
    loop {
        interval.tick().await;
        let candidates: Vec<Arc<Session>> = {
            let sessions = sessions.lock().await;
            sessions.values().filter(|s| s.status() == SessionStatus::Active).cloned().collect()
        };
        for session in candidates {
            let (alive, streak) = {
                let guard = session.adapter.lock().await;
                (guard.alive(), guard.idle_timeout_streak())
            };
            let Some(trigger) = recovery.detect(alive, streak) else { continue };
            let outcome = recovery
                .recover(&session.session_id, trigger, &session.adapter, &session.queue, &session.target(), session.symbols_path.as_deref())
                .await;
            if outcome == RecoveryOutcome::Faulted {
                session.set_status(SessionStatus::Faulted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_manager_stats_default_is_zeroed() {
        let stats = SessionManagerStats::default();
        assert_eq!(stats.sessions_created, 0);
        assert_eq!(stats.commands_processed, 0);
    }
}
