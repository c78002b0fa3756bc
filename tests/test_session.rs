//! End-to-end session-manager tests, grounded in spec.md §8's end-to-end
//! scenarios and boundary behaviors. Exercises a real child process (a tiny
//! `/bin/sh` script standing in for `cdb.exe`) rather than mocking the
//! adapter, matching the teacher's style of driving real subprocesses in
//! its own integration tests.

use std::fs;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mcp_cdb_bridge::config::Config;
use mcp_cdb_bridge::error::CoreError;
use mcp_cdb_bridge::notify::{BroadcastSink, NotificationEvent, NotificationSink};
use mcp_cdb_bridge::queue::CommandState;
use mcp_cdb_bridge::session::{SessionManager, SessionStatus};

/// Writes an executable shell script standing in for `cdb.exe`: it replays
/// its own `-c ".echo X"` startup argument the way real cdb.exe runs an
/// initial command immediately on launch, then echoes back the body of any
/// `.echo <text>` line and sleeps for `sleep N` lines, the same framing the
/// real adapter depends on for its ready/sentinel markers.
fn fake_cdb_script() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("mcp_cdb_bridge_test_cdb_{}.sh", uuid::Uuid::new_v4().simple()));
    let mut file = fs::File::create(&path).expect("create fake cdb script");
    file.write_all(
        br#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  case "$1" in
    -c) shift; case "$1" in .echo\ *) echo "${1#.echo }" ;; esac ;;
  esac
  shift
done
while IFS= read -r line; do
  case "$line" in
    .echo\ *) echo "${line#.echo }" ;;
    sleep*) dur=$(echo "$line" | awk '{print $2}'); sleep "$dur" ;;
    *) : ;;
  esac
done
"#,
    )
    .expect("write fake cdb script");
    drop(file);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake cdb script");
    path
}

/// Same as [`fake_cdb_script`], but a `.crash` line causes the script to
/// exit immediately, simulating a CDB process dying mid-session the way a
/// real debugger can crash while analyzing a corrupt dump.
fn fake_cdb_script_with_crash() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("mcp_cdb_bridge_test_cdb_crash_{}.sh", uuid::Uuid::new_v4().simple()));
    let mut file = fs::File::create(&path).expect("create fake cdb script");
    file.write_all(
        br#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  case "$1" in
    -c) shift; case "$1" in .echo\ *) echo "${1#.echo }" ;; esac ;;
  esac
  shift
done
while IFS= read -r line; do
  case "$line" in
    .crash) exit 1 ;;
    .echo\ *) echo "${line#.echo }" ;;
    sleep*) dur=$(echo "$line" | awk '{print $2}'); sleep "$dur" ;;
    *) : ;;
  esac
done
"#,
    )
    .expect("write fake cdb script");
    drop(file);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake cdb script");
    path
}

fn test_config(cdb_script: &Path) -> Config {
    let mut config = Config::default();
    config.cdb_path = Some(cdb_script.to_path_buf());
    config.startup_delay = Duration::from_millis(1);
    config.startup_timeout = Duration::from_secs(5);
    config.idle_timeout = Duration::from_millis(500);
    config.base_command_timeout = Duration::from_secs(5);
    config.complex_command_timeout = Duration::from_secs(5);
    // The fake cdb script doesn't understand `.reload`; disable the
    // proactive symbol-load pass (deadline already elapsed) so it doesn't
    // eat an idle-timeout-plus-break-grace cycle on every session start.
    config.symbol_server_timeout = Duration::from_millis(0);
    config
}

fn test_sink() -> Arc<dyn NotificationSink> {
    Arc::new(BroadcastSink::default())
}

async fn poll_terminal(
    manager: &SessionManager,
    session_id: &str,
    command_id: &str,
) -> mcp_cdb_bridge::queue::CommandInfo {
    for _ in 0..100 {
        let info = manager.command_status(session_id, command_id).await.expect("command should exist");
        if info.state.is_terminal() {
            return info;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("command {command_id} did not reach a terminal state in time");
}

#[tokio::test]
async fn run_command_transitions_to_completed() {
    let script = fake_cdb_script();
    let config = Arc::new(test_config(&script));
    let manager = SessionManager::new(config, test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    let command_id = manager.enqueue(&session_id, "lm".to_string()).await.expect("enqueue");

    let info = poll_terminal(&manager, &session_id, &command_id).await;
    assert_eq!(info.state, CommandState::Completed);
    assert_eq!(info.is_success, Some(true));

    manager.close(&session_id).await;
    let _ = fs::remove_file(&script);
}

#[tokio::test]
async fn excluded_command_still_completes_without_batching() {
    let script = fake_cdb_script();
    let mut config = test_config(&script);
    config.excluded_commands = vec!["!analyze".to_string()];
    let manager = SessionManager::new(Arc::new(config), test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    let excluded_id = manager.enqueue(&session_id, "!analyze -v".to_string()).await.expect("enqueue");
    let normal_id = manager.enqueue(&session_id, "lm".to_string()).await.expect("enqueue");

    let excluded_info = poll_terminal(&manager, &session_id, &excluded_id).await;
    let normal_info = poll_terminal(&manager, &session_id, &normal_id).await;
    assert_eq!(excluded_info.state, CommandState::Completed);
    assert_eq!(normal_info.state, CommandState::Completed);

    manager.close(&session_id).await;
    let _ = fs::remove_file(&script);
}

#[tokio::test]
async fn mid_command_cancel_yields_cancelled_state() {
    let script = fake_cdb_script();
    let config = Arc::new(test_config(&script));
    let manager = SessionManager::new(config, test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    let command_id = manager.enqueue(&session_id, "sleep 2".to_string()).await.expect("enqueue");

    // Give the dispatcher a moment to move the command into Executing before cancelling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.cancel_command(&session_id, &command_id, "test cancel").await.expect("cancel");

    let info = poll_terminal(&manager, &session_id, &command_id).await;
    assert_eq!(info.state, CommandState::Cancelled);
    assert!(info.error_message.as_deref().unwrap_or_default().contains("cancel"));

    manager.close(&session_id).await;
    let _ = fs::remove_file(&script);
}

#[tokio::test]
async fn close_is_idempotent() {
    let script = fake_cdb_script();
    let config = Arc::new(test_config(&script));
    let manager = SessionManager::new(config, test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    assert!(manager.close(&session_id).await);
    assert!(!manager.close(&session_id).await);

    let _ = fs::remove_file(&script);
}

#[tokio::test]
async fn session_limit_exceeded_rejects_creation_past_the_cap() {
    let script = fake_cdb_script();
    let mut config = test_config(&script);
    config.max_concurrent_sessions = 1;
    let manager = SessionManager::new(Arc::new(config), test_sink());

    let first = manager.create(PathBuf::from("a.dmp"), None).await.expect("first session");
    let second = manager.create(PathBuf::from("b.dmp"), None).await;
    assert!(matches!(second, Err(CoreError::SessionLimitExceeded { current: 1, max: 1 })));

    manager.close(&first).await;
    let _ = fs::remove_file(&script);
}

#[tokio::test]
async fn idle_session_is_expired_by_the_cleanup_sweep() {
    let script = fake_cdb_script();
    let mut config = test_config(&script);
    config.session_timeout = Duration::from_millis(50);
    config.cleanup_interval = Duration::from_millis(50);
    let manager = SessionManager::new(Arc::new(config), test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");

    for _ in 0..50 {
        if manager.get(&session_id).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let result = manager.get(&session_id).await;
    assert!(matches!(result, Err(CoreError::SessionNotFound(_))));

    let stats = manager.stats().await;
    assert_eq!(stats.sessions_expired, 1);

    let _ = fs::remove_file(&script);
}

/// spec.md §8.1: two non-excluded commands enqueued close together should be
/// dispatched as a single batch (one CDB round trip) rather than two
/// sequential ones.
#[tokio::test]
async fn batch_happy_path_dispatches_commands_in_one_round_trip() {
    let script = fake_cdb_script();
    let mut config = test_config(&script);
    config.batching_enabled = true;
    config.batch_wait_timeout = Duration::from_millis(50);
    let manager = SessionManager::new(Arc::new(config), test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    let first_id = manager.enqueue(&session_id, "k".to_string()).await.expect("enqueue first");
    let second_id = manager.enqueue(&session_id, "lm".to_string()).await.expect("enqueue second");

    let first_info = poll_terminal(&manager, &session_id, &first_id).await;
    let second_info = poll_terminal(&manager, &session_id, &second_id).await;

    assert_eq!(first_info.state, CommandState::Completed);
    assert_eq!(second_info.state, CommandState::Completed);
    // A batch stamps every member with the same dispatch timestamp; two
    // sequential single dispatches would not share one.
    assert_eq!(first_info.started_at_ms, second_info.started_at_ms);

    manager.close(&session_id).await;
    let _ = fs::remove_file(&script);
}

/// spec.md §8.5: when CDB dies mid-command, the session's adapter is
/// restarted by the Recovery Controller, queued commands caught behind the
/// dead adapter are marked Cancelled rather than left to fail, and a
/// `sessionRecovery` notification is published.
#[tokio::test]
async fn adapter_crash_triggers_recovery_and_cancels_queued_commands() {
    let script = fake_cdb_script_with_crash();
    let mut config = test_config(&script);
    config.recovery_max_attempts = 3;
    let sink = Arc::new(BroadcastSink::default());
    let mut events = sink.subscribe();
    let manager = SessionManager::new(Arc::new(config), sink);

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    let crash_id = manager.enqueue(&session_id, ".crash".to_string()).await.expect("enqueue crash");
    let queued_id = manager.enqueue(&session_id, "lm".to_string()).await.expect("enqueue follow-up");

    let crash_info = poll_terminal(&manager, &session_id, &crash_id).await;
    assert_eq!(crash_info.state, CommandState::Failed);

    let queued_info = poll_terminal(&manager, &session_id, &queued_id).await;
    assert_eq!(queued_info.state, CommandState::Cancelled);

    let mut saw_recovery = false;
    for _ in 0..400 {
        if let Ok(NotificationEvent::SessionRecovery(ev)) = events.try_recv() {
            if ev.session_id == session_id && ev.success {
                saw_recovery = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(saw_recovery, "expected a successful sessionRecovery notification");

    // The adapter should be usable again after recovery restarted it.
    let post_recovery_id = manager.enqueue(&session_id, "lm".to_string()).await.expect("enqueue after recovery");
    let post_recovery_info = poll_terminal(&manager, &session_id, &post_recovery_id).await;
    assert_eq!(post_recovery_info.state, CommandState::Completed);

    manager.close(&session_id).await;
    let _ = fs::remove_file(&script);
}

#[tokio::test]
async fn snapshot_reports_active_status_for_a_running_session() {
    let script = fake_cdb_script();
    let config = Arc::new(test_config(&script));
    let manager = SessionManager::new(config, test_sink());

    let session_id = manager.create(PathBuf::from("dummy.dmp"), None).await.expect("create session");
    let snapshot = manager.get(&session_id).await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Active);
    assert_eq!(snapshot.dump_path, "dummy.dmp");

    manager.close(&session_id).await;
    let _ = fs::remove_file(&script);
}
