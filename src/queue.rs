//! Command Queue (C3): per-session FIFO dispatcher.
//!
//! The single-dispatcher-task shape (one `tokio::spawn`'d loop owning a
//! shared `Arc<Mutex<...>>` state, woken by a `Notify`) mirrors the
//! teacher's `registry::ProcessRegistry` + its per-process `JoinHandle`
//! bookkeeping, generalized from "one task per process" to "one dispatcher
//! task per session, serially running many commands." Status/result
//! retention reuses `cache::Lru`, the same bounded-eviction policy the
//! teacher's registry applies by TTL instead applied by LRU here.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::batch::{BatchMember, BatchProcessor};
use crate::cache::{self, CommandResult, Lru, ResultCache};
use crate::cdb::{CancelHandle, CdbAdapter, ExecOutcome};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::notify::{self, CommandHeartbeatEvent, CommandStatusEvent, NotificationEvent, NotificationSink};

/// `QueuedCommand::state`. Monotonic along `Queued -> Executing ->
/// {Completed|Failed|Cancelled|Timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandState {
    Queued,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::Completed | CommandState::Failed | CommandState::Cancelled | CommandState::Timeout)
    }
}

/// Internal record for one command, from enqueue through its terminal state.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command_id: String,
    pub session_id: String,
    pub command_text: String,
    pub state: CommandState,
    pub queued_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    pub output: String,
    pub is_success: Option<bool>,
    pub error_message: Option<String>,
    pub cancel: CancelHandle,
}

/// External, serializable snapshot of a `QueuedCommand` returned by
/// `status`/`statusBulk`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    pub command_id: String,
    pub command: String,
    pub state: CommandState,
    pub queued_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    pub output: String,
    pub is_success: Option<bool>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub total_time_ms: Option<u64>,
}

impl From<&QueuedCommand> for CommandInfo {
    fn from(cmd: &QueuedCommand) -> Self {
        let execution_time_ms = match (cmd.started_at_ms, cmd.ended_at_ms) {
            (Some(s), Some(e)) => Some(e.saturating_sub(s)),
            _ => None,
        };
        let total_time_ms = cmd.ended_at_ms.map(|e| e.saturating_sub(cmd.queued_at_ms));
        CommandInfo {
            command_id: cmd.command_id.clone(),
            command: cmd.command_text.clone(),
            state: cmd.state,
            queued_at_ms: cmd.queued_at_ms,
            started_at_ms: cmd.started_at_ms,
            ended_at_ms: cmd.ended_at_ms,
            output: cmd.output.clone(),
            is_success: cmd.is_success,
            error_message: cmd.error_message.clone(),
            execution_time_ms,
            total_time_ms,
        }
    }
}

struct QueueState {
    queued: VecDeque<QueuedCommand>,
    /// The unit (one command, or a batch's members) currently Executing.
    current: Vec<QueuedCommand>,
    result_cache: ResultCache,
    info_cache: Lru<CommandInfo>,
    processed: u64,
}

/// Handle to one session's command queue and its background dispatcher.
pub struct CommandQueue {
    session_id: String,
    state: Arc<AsyncMutex<QueueState>>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    sink: Arc<dyn NotificationSink>,
    dispatcher: JoinHandle<()>,
}

impl CommandQueue {
    #[must_use]
    pub fn spawn(session_id: String, adapter: Arc<AsyncMutex<CdbAdapter>>, config: Arc<Config>, sink: Arc<dyn NotificationSink>) -> Self {
        let state = Arc::new(AsyncMutex::new(QueueState {
            queued: VecDeque::new(),
            current: Vec::new(),
            result_cache: ResultCache::new(cache::DEFAULT_CAPACITY),
            info_cache: Lru::new(cache::DEFAULT_CAPACITY),
            processed: 0,
        }));
        let wake = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());
        let batch = BatchProcessor::new(config.clone());

        let dispatcher = tokio::spawn(dispatcher_loop(
            session_id.clone(),
            state.clone(),
            wake.clone(),
            shutdown.clone(),
            adapter,
            sink.clone(),
            batch,
        ));

        Self { session_id, state, wake, shutdown, sink, dispatcher }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Appends a command to the FIFO. Never blocks on execution.
    pub async fn enqueue(&self, command_text: String) -> String {
        let command_id = Uuid::new_v4().to_string();
        let cmd = QueuedCommand {
            command_id: command_id.clone(),
            session_id: self.session_id.clone(),
            command_text,
            state: CommandState::Queued,
            queued_at_ms: notify::now_ms(),
            started_at_ms: None,
            ended_at_ms: None,
            output: String::new(),
            is_success: None,
            error_message: None,
            cancel: CancelHandle::new(),
        };
        emit_status(&self.sink, &self.session_id, &cmd, None);
        {
            let mut st = self.state.lock().await;
            st.queued.push_back(cmd);
        }
        self.wake.notify_waiters();
        command_id
    }

    pub async fn status(&self, command_id: &str) -> CoreResult<CommandInfo> {
        let mut st = self.state.lock().await;
        if let Some(cmd) = st.queued.iter().find(|c| c.command_id == command_id) {
            return Ok(CommandInfo::from(cmd));
        }
        if let Some(cmd) = st.current.iter().find(|c| c.command_id == command_id) {
            return Ok(CommandInfo::from(cmd));
        }
        if let Some(info) = st.info_cache.get(command_id) {
            return Ok(info);
        }
        Err(CoreError::CommandNotFound(command_id.to_string()))
    }

    pub async fn status_bulk(&self, command_ids: &[String]) -> HashMap<String, CoreResult<CommandInfo>> {
        let mut out = HashMap::with_capacity(command_ids.len());
        for id in command_ids {
            out.insert(id.clone(), self.status(id).await);
        }
        out
    }

    /// Cancels a command. Queued commands are removed and transitioned
    /// immediately; an Executing command has its cancel handle triggered and
    /// the dispatcher completes the transition once the adapter returns.
    /// Returns `false` if the command is unknown or already terminal.
    pub async fn cancel(&self, command_id: &str, reason: &str) -> bool {
        let mut st = self.state.lock().await;
        if let Some(pos) = st.queued.iter().position(|c| c.command_id == command_id) {
            let cmd = st.queued.remove(pos).expect("position just found");
            let finished = QueuedCommand {
                state: CommandState::Cancelled,
                error_message: Some(reason.to_string()),
                ended_at_ms: Some(notify::now_ms()),
                ..cmd
            };
            store_terminal(&mut st, &finished);
            drop(st);
            emit_status(&self.sink, &self.session_id, &finished, None);
            return true;
        }
        if let Some(cmd) = st.current.iter().find(|c| c.command_id == command_id) {
            cmd.cancel.cancel();
            return true;
        }
        false
    }

    /// Cancels every non-terminal command; returns the ids actually affected
    /// (the recovery controller reports these as `affectedCommands`).
    pub async fn cancel_all(&self, reason: &str) -> Vec<String> {
        let ids: Vec<String> = {
            let st = self.state.lock().await;
            st.queued.iter().chain(st.current.iter()).map(|c| c.command_id.clone()).collect()
        };
        let mut affected = Vec::with_capacity(ids.len());
        for id in ids {
            if self.cancel(&id, reason).await {
                affected.push(id);
            }
        }
        affected
    }

    /// Tears the queue down: cancels everything outstanding and stops the
    /// dispatcher task.
    pub async fn dispose(&self) {
        self.cancel_all("session disposed").await;
        self.shutdown.notify_waiters();
    }

    pub async fn processed_count(&self) -> u64 {
        self.state.lock().await.processed
    }

    /// Trims the result cache's least-recently-used entries until retained
    /// command output is back under `max_bytes`. A long-lived session that
    /// runs many `!analyze -v`-sized commands can blow its memory footprint
    /// long before the 1024-entry count cap kicks in.
    pub async fn enforce_memory_budget(&self, max_bytes: u64) {
        let mut st = self.state.lock().await;
        st.result_cache.shrink_to_bytes(max_bytes, |r| r.output.len() as u64);
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.dispatcher.abort();
    }
}

fn emit_status(sink: &Arc<dyn NotificationSink>, session_id: &str, cmd: &QueuedCommand, progress: Option<f64>) {
    sink.notify(NotificationEvent::CommandStatus(CommandStatusEvent {
        session_id: session_id.to_string(),
        command_id: cmd.command_id.clone(),
        command: cmd.command_text.clone(),
        status: format!("{:?}", cmd.state),
        progress,
        message: None,
        error: cmd.error_message.clone(),
        timestamp_ms: notify::now_ms(),
    }));
}

fn store_terminal(st: &mut QueueState, cmd: &QueuedCommand) {
    let duration_ms = match (cmd.started_at_ms.or(Some(cmd.queued_at_ms)), cmd.ended_at_ms) {
        (Some(s), Some(e)) => e.saturating_sub(s),
        _ => 0,
    };
    st.result_cache.store(
        cmd.command_id.clone(),
        CommandResult {
            success: cmd.is_success.unwrap_or(false),
            output: cmd.output.clone(),
            error_message: cmd.error_message.clone(),
            duration: Duration::from_millis(duration_ms),
        },
    );
    st.info_cache.store(cmd.command_id.clone(), CommandInfo::from(cmd));
    st.processed += 1;
}

/// One unit of dispatch work: either a single command, or a batch's members
/// (always at least two, per the batch invariant).
enum Unit {
    Single(QueuedCommand),
    Batch(Vec<QueuedCommand>),
}

/// The dispatcher: the only task that ever pops from `queued`, calls into
/// the adapter, and publishes terminal results.
async fn dispatcher_loop(
    session_id: String,
    state: Arc<AsyncMutex<QueueState>>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    adapter: Arc<AsyncMutex<CdbAdapter>>,
    sink: Arc<dyn NotificationSink>,
    batch: BatchProcessor,
) {
    loop {
        let Some(unit) = collect_unit(&state, &wake, &shutdown, &batch).await else {
            debug!(session_id = %session_id, "dispatcher shutting down");
            return;
        };
        run_unit(unit, &session_id, &state, &adapter, &sink, &batch).await;
    }
}

/// Waits for at least one queued command, then decides whether to dispatch
/// it alone or fold it into a batch with its batchable neighbors.
async fn collect_unit(
    state: &Arc<AsyncMutex<QueueState>>,
    wake: &Arc<Notify>,
    shutdown: &Arc<Notify>,
    batch: &BatchProcessor,
) -> Option<Unit> {
    loop {
        loop {
            if !state.lock().await.queued.is_empty() {
                break;
            }
            tokio::select! {
                _ = shutdown.notified() => return None,
                _ = wake.notified() => {}
            }
        }

        let front_batchable = state
            .lock()
            .await
            .queued
            .front()
            .map(|c| batch.is_batchable(&c.command_text))
            .unwrap_or(false);

        if !batch.batching_enabled() || !front_batchable {
            let mut st = state.lock().await;
            let Some(cmd) = st.queued.pop_front() else { continue };
            return Some(Unit::Single(cmd));
        }

        // Greedily gather a contiguous batchable run from the front, waiting
        // (debounced by new arrivals) up to `batchWaitTimeoutMs` for more to
        // show up, capped at `maxBatchSize`.
        loop {
            let full_or_blocked = {
                let st = state.lock().await;
                let run_len = st.queued.iter().take(batch.max_batch_size()).take_while(|c| batch.is_batchable(&c.command_text)).count();
                let blocked_by_non_batchable = st.queued.get(run_len).is_some();
                run_len >= batch.max_batch_size() || blocked_by_non_batchable
            };
            if full_or_blocked {
                break;
            }
            tokio::select! {
                _ = shutdown.notified() => return None,
                _ = wake.notified() => {}
                _ = tokio::time::sleep(batch.wait_timeout()) => break,
            }
        }

        let mut st = state.lock().await;
        let run_len = st.queued.iter().take(batch.max_batch_size()).take_while(|c| batch.is_batchable(&c.command_text)).count();
        if run_len >= 2 {
            let members: Vec<QueuedCommand> = (0..run_len).filter_map(|_| st.queued.pop_front()).collect();
            return Some(Unit::Batch(members));
        }
        if let Some(cmd) = st.queued.pop_front() {
            return Some(Unit::Single(cmd));
        }
        // Queue emptied out from under us (e.g. cancelled concurrently); loop and re-check.
    }
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

async fn run_unit(
    unit: Unit,
    session_id: &str,
    state: &Arc<AsyncMutex<QueueState>>,
    adapter: &Arc<AsyncMutex<CdbAdapter>>,
    sink: &Arc<dyn NotificationSink>,
    batch: &BatchProcessor,
) {
    match unit {
        Unit::Single(mut cmd) => {
            cmd.state = CommandState::Executing;
            cmd.started_at_ms = Some(notify::now_ms());
            {
                let mut st = state.lock().await;
                st.current = vec![cmd.clone()];
            }
            emit_status(sink, session_id, &cmd, None);

            let cancel = cmd.cancel.clone();
            let mut adapter_guard = adapter.lock().await;
            if !adapter_guard.alive() {
                drop(adapter_guard);
                finalize_and_publish_dead_adapter(vec![cmd.clone()], state, sink, session_id).await;
                return;
            }
            let outcome = run_with_heartbeats(adapter_guard.execute(&cmd.command_text, cancel), sink, session_id, std::slice::from_ref(&cmd)).await;
            drop(adapter_guard);

            let finished = finalize_single(cmd, outcome);
            {
                let mut st = state.lock().await;
                st.current.retain(|c| c.command_id != finished.command_id);
                store_terminal(&mut st, &finished);
            }
            emit_status(sink, session_id, &finished, None);
            info!(session_id = %session_id, command_id = %finished.command_id, state = ?finished.state, "command finished");
        }
        Unit::Batch(mut members) => {
            let now = notify::now_ms();
            for m in members.iter_mut() {
                m.state = CommandState::Executing;
                m.started_at_ms = Some(now);
            }
            {
                let mut st = state.lock().await;
                st.current = members.clone();
            }
            for m in &members {
                emit_status(sink, session_id, m, None);
            }

            let batch_members: Vec<BatchMember> =
                members.iter().map(|m| BatchMember { command_id: m.command_id.clone(), command_text: m.command_text.clone() }).collect();
            let (script, markers) = batch.synthesize(&batch_members);
            let timeout = batch.batch_timeout(members.len());
            info!(session_id = %session_id, members = members.len(), timeout = ?timeout, "flushing batch");

            let mut adapter_guard = adapter.lock().await;
            if !adapter_guard.alive() {
                drop(adapter_guard);
                finalize_and_publish_dead_adapter(members, state, sink, session_id).await;
                return;
            }
            let outcome =
                run_with_heartbeats(adapter_guard.execute_with_timeout(&script, CancelHandle::new(), timeout), sink, session_id, &members).await;
            drop(adapter_guard);
            let outcome = outcome.unwrap_or_else(|e| ExecOutcome::Failed { output: String::new(), error: e.to_string() });

            let finished_members: Vec<QueuedCommand> = match &outcome {
                ExecOutcome::Completed { output } => {
                    let results = batch.split_output(output, &markers);
                    members
                        .into_iter()
                        .zip(results)
                        .map(|(member, result)| match result {
                            Ok(body) => finalize_batch_member(member, CommandState::Completed, body, None),
                            Err(err) => finalize_batch_member(member, CommandState::Failed, String::new(), Some(err)),
                        })
                        .collect()
                }
                ExecOutcome::Timeout { error, .. } => {
                    let per_member = BatchProcessor::uniform_failure(&markers, &error);
                    members
                        .into_iter()
                        .zip(per_member)
                        .map(|(member, (_, msg))| {
                            let message = format!("{}: {msg}", CoreError::CommandTimeout(member.command_id.clone()));
                            finalize_batch_member(member, CommandState::Timeout, String::new(), Some(message))
                        })
                        .collect()
                }
                ExecOutcome::Cancelled { error, .. } => {
                    let per_member = BatchProcessor::uniform_failure(&markers, &error);
                    members
                        .into_iter()
                        .zip(per_member)
                        .map(|(member, (id, msg))| {
                            let message = CoreError::CommandCancelled { command_id: id, reason: msg }.to_string();
                            finalize_batch_member(member, CommandState::Cancelled, String::new(), Some(message))
                        })
                        .collect()
                }
                ExecOutcome::Failed { error, .. } => {
                    let per_member = BatchProcessor::uniform_failure(&markers, &error);
                    members
                        .into_iter()
                        .zip(per_member)
                        .map(|(member, (_, msg))| finalize_batch_member(member, CommandState::Failed, String::new(), Some(msg)))
                        .collect()
                }
            };

            {
                let mut st = state.lock().await;
                let ids: Vec<&str> = finished_members.iter().map(|m| m.command_id.as_str()).collect();
                st.current.retain(|c| !ids.contains(&c.command_id.as_str()));
                for finished in &finished_members {
                    store_terminal(&mut st, finished);
                }
            }
            for finished in &finished_members {
                emit_status(sink, session_id, finished, None);
            }
        }
    }
}

/// Finalizes a unit discovered dead-on-arrival: the adapter crashed between
/// this unit being popped off the queue and the dispatcher getting the
/// chance to run it. Marking these Cancelled (not Failed) keeps them
/// consistent with whatever the Recovery Controller's own `cancel_all` marks
/// for commands it catches still sitting in `queued`/`current` -- a command
/// preempted by a dying adapter is a recoverable interruption, not a
/// command-level fault.
async fn finalize_and_publish_dead_adapter(
    members: Vec<QueuedCommand>,
    state: &Arc<AsyncMutex<QueueState>>,
    sink: &Arc<dyn NotificationSink>,
    session_id: &str,
) {
    let finished: Vec<QueuedCommand> = members
        .into_iter()
        .map(|member| {
            let message = CoreError::CommandCancelled {
                command_id: member.command_id.clone(),
                reason: "cdb adapter is not running; awaiting recovery".to_string(),
            }
            .to_string();
            finalize_batch_member(member, CommandState::Cancelled, String::new(), Some(message))
        })
        .collect();
    {
        let mut st = state.lock().await;
        let ids: Vec<&str> = finished.iter().map(|m| m.command_id.as_str()).collect();
        st.current.retain(|c| !ids.contains(&c.command_id.as_str()));
        for f in &finished {
            store_terminal(&mut st, f);
        }
    }
    for f in &finished {
        emit_status(sink, session_id, f, None);
        info!(session_id = %session_id, command_id = %f.command_id, "command cancelled: adapter unavailable");
    }
}

fn finalize_single(cmd: QueuedCommand, outcome: CoreResult<ExecOutcome>) -> QueuedCommand {
    let ended_at_ms = Some(notify::now_ms());
    match outcome {
        Ok(ExecOutcome::Completed { output }) => {
            QueuedCommand { output, is_success: Some(true), error_message: None, state: CommandState::Completed, ended_at_ms, ..cmd }
        }
        Ok(ExecOutcome::Failed { output, error }) => {
            QueuedCommand { output, is_success: Some(false), error_message: Some(error), state: CommandState::Failed, ended_at_ms, ..cmd }
        }
        Ok(ExecOutcome::Cancelled { output, error }) => {
            let message = CoreError::CommandCancelled { command_id: cmd.command_id.clone(), reason: error }.to_string();
            QueuedCommand { output, is_success: Some(false), error_message: Some(message), state: CommandState::Cancelled, ended_at_ms, ..cmd }
        }
        Ok(ExecOutcome::Timeout { output, error, .. }) => {
            let message = format!("{}: {error}", CoreError::CommandTimeout(cmd.command_id.clone()));
            QueuedCommand { output, is_success: Some(false), error_message: Some(message), state: CommandState::Timeout, ended_at_ms, ..cmd }
        }
        Err(e) => QueuedCommand { is_success: Some(false), error_message: Some(e.to_string()), state: CommandState::Failed, ended_at_ms, ..cmd },
    }
}

fn finalize_batch_member(member: QueuedCommand, state: CommandState, output: String, error: Option<String>) -> QueuedCommand {
    QueuedCommand { output, is_success: Some(error.is_none()), error_message: error, state, ended_at_ms: Some(notify::now_ms()), ..member }
}

/// Awaits `fut`, emitting a `CommandHeartbeat` for every member in `members`
/// on a fixed cadence until it resolves. Heartbeats stop the instant the
/// future completes.
async fn run_with_heartbeats<F, T>(fut: F, sink: &Arc<dyn NotificationSink>, session_id: &str, members: &[QueuedCommand]) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    let start = Instant::now();
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await; // first tick fires immediately; consume it so heartbeats start at +interval

    loop {
        tokio::select! {
            result = &mut fut => return result,
            _ = interval.tick() => {
                let elapsed = start.elapsed();
                for member in members {
                    sink.notify(NotificationEvent::CommandHeartbeat(CommandHeartbeatEvent {
                        session_id: session_id.to_string(),
                        command_id: member.command_id.clone(),
                        command: member.command_text.clone(),
                        elapsed_seconds: elapsed.as_secs_f64(),
                        elapsed_display: format!("{}s", elapsed.as_secs()),
                        details: None,
                        timestamp_ms: notify::now_ms(),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::BroadcastSink;

    fn test_sink() -> Arc<dyn NotificationSink> {
        Arc::new(BroadcastSink::default())
    }

    #[tokio::test]
    async fn enqueue_assigns_an_id_and_reports_queued_status() {
        let state = Arc::new(AsyncMutex::new(QueueState {
            queued: VecDeque::new(),
            current: Vec::new(),
            result_cache: ResultCache::new(8),
            info_cache: Lru::new(8),
            processed: 0,
        }));
        let sink = test_sink();
        let session_id = "s1".to_string();
        let cmd = QueuedCommand {
            command_id: "c1".into(),
            session_id: session_id.clone(),
            command_text: "k".into(),
            state: CommandState::Queued,
            queued_at_ms: notify::now_ms(),
            started_at_ms: None,
            ended_at_ms: None,
            output: String::new(),
            is_success: None,
            error_message: None,
            cancel: CancelHandle::new(),
        };
        {
            let mut st = state.lock().await;
            st.queued.push_back(cmd.clone());
        }
        emit_status(&sink, &session_id, &cmd, None);
        let st = state.lock().await;
        assert_eq!(st.queued.len(), 1);
        assert_eq!(st.queued.front().unwrap().state, CommandState::Queued);
    }

    #[test]
    fn command_info_computes_durations() {
        let cmd = QueuedCommand {
            command_id: "c1".into(),
            session_id: "s1".into(),
            command_text: "k".into(),
            state: CommandState::Completed,
            queued_at_ms: 1_000,
            started_at_ms: Some(1_100),
            ended_at_ms: Some(1_400),
            output: "frame 0".into(),
            is_success: Some(true),
            error_message: None,
            cancel: CancelHandle::new(),
        };
        let info = CommandInfo::from(&cmd);
        assert_eq!(info.execution_time_ms, Some(300));
        assert_eq!(info.total_time_ms, Some(400));
    }
}
