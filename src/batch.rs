//! Batch Processor (C4): eligibility, sentinel script synthesis, and output
//! splitting for coalesced commands.
//!
//! The sentinel shape (`.echo <marker> ; <command> ; .echo <marker>`) is
//! lifted directly from the single-command `.echo <MARKER>` completion
//! sentinel used by the CDB session reference, generalized from one marker
//! per command to a start/end pair per batch member so several commands can
//! share a single CDB round trip. Buffering and the flush timer live in the
//! command queue's dispatcher (`queue.rs`), which is the one place already
//! holding the FIFO and the adapter lock; this module only knows how to
//! decide eligibility, write the script, and read it back apart.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::CoreError;

/// Fixed token marking batch sentinels, distinct from the per-command
/// sentinel the adapter generates for non-batched execution.
pub const SEPARATOR: &str = "MCPCDB";

/// One command being offered to the batch processor.
#[derive(Debug, Clone)]
pub struct BatchMember {
    pub command_id: String,
    pub command_text: String,
}

/// Start/end markers synthesized for one batch member.
#[derive(Debug, Clone)]
pub struct MemberMarkers {
    pub command_id: String,
    pub start_marker: String,
    pub end_marker: String,
}

pub struct BatchProcessor {
    config: Arc<Config>,
}

impl BatchProcessor {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Batching is off entirely when disabled by config, or when either
    /// knob that makes coalescing meaningful has been configured down to
    /// nothing.
    pub fn batching_enabled(&self) -> bool {
        self.config.batching_enabled
            && self.config.max_batch_size > 0
            && !self.config.batch_wait_timeout.is_zero()
    }

    /// A command is batchable iff non-empty after trimming and not a
    /// case-insensitive prefix match against the excluded-commands list.
    pub fn is_batchable(&self, command_text: &str) -> bool {
        let trimmed = command_text.trim();
        if trimmed.is_empty() {
            return false;
        }
        let lower = trimmed.to_lowercase();
        !self.config.excluded_commands.iter().any(|prefix| lower.starts_with(prefix.as_str()))
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    pub fn wait_timeout(&self) -> Duration {
        self.config.batch_wait_timeout
    }

    fn markers_for(&self, command_id: &str) -> MemberMarkers {
        let upper = command_id.to_uppercase();
        MemberMarkers {
            command_id: command_id.to_string(),
            start_marker: format!("{SEPARATOR}_{upper}_START"),
            end_marker: format!("{SEPARATOR}_{upper}_END"),
        }
    }

    /// Synthesizes the literal script sent to CDB for a batch: each member
    /// wrapped in `.echo <start> ; <command> ; .echo <end>`, joined by `; `.
    /// Requires at least two members -- a batch of one is just a direct
    /// execute and the caller should not route it here.
    pub fn synthesize(&self, members: &[BatchMember]) -> (String, Vec<MemberMarkers>) {
        debug_assert!(members.len() >= 2, "a batch must have at least two members");
        let markers: Vec<MemberMarkers> = members.iter().map(|m| self.markers_for(&m.command_id)).collect();
        let script = members
            .iter()
            .zip(markers.iter())
            .map(|(member, marker)| {
                format!(".echo {} ; {} ; .echo {}", marker.start_marker, member.command_text.trim(), marker.end_marker)
            })
            .collect::<Vec<_>>()
            .join("; ");
        (script, markers)
    }

    /// `min(maxBatchTimeoutMinutes, baseTimeoutMs * |members| * multiplier)`.
    pub fn batch_timeout(&self, member_count: usize) -> Duration {
        let scaled = self.config.base_command_timeout.mul_f64(member_count as f64 * self.config.batch_timeout_multiplier);
        scaled.min(self.config.max_batch_timeout)
    }

    /// Splits a completed batch's raw output into per-member results. A
    /// member whose start or end marker is missing fails independently with
    /// a "batch split failure" message; other members are unaffected.
    pub fn split_output(&self, raw_output: &str, markers: &[MemberMarkers]) -> Vec<Result<String, String>> {
        markers
            .iter()
            .map(|marker| {
                let start = raw_output.find(&marker.start_marker);
                let end = start.and_then(|s| raw_output[s..].find(&marker.end_marker).map(|rel| s + rel));
                match (start, end) {
                    (Some(s), Some(e)) if e > s => {
                        let body_start = s + marker.start_marker.len();
                        let body = &raw_output[body_start..e];
                        Ok(body.trim_matches('\n').to_string())
                    }
                    _ => Err(CoreError::BatchSplitFailure(marker.command_id.clone()).to_string()),
                }
            })
            .collect()
    }

    /// Applied when the whole batch times out or the adapter call itself
    /// errors: every member gets the same message rather than attempting to
    /// split partial output.
    pub fn uniform_failure(markers: &[MemberMarkers], message: &str) -> Vec<(String, String)> {
        markers.iter().map(|m| (m.command_id.clone(), message.to_string())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> BatchProcessor {
        BatchProcessor::new(Arc::new(Config::default()))
    }

    #[test]
    fn excluded_prefix_is_not_batchable() {
        let p = processor();
        assert!(!p.is_batchable("!analyze -v"));
        assert!(!p.is_batchable("  "));
        assert!(p.is_batchable("k"));
        assert!(p.is_batchable("lm"));
    }

    #[test]
    fn synthesize_and_split_round_trips() {
        let p = processor();
        let members = vec![
            BatchMember { command_id: "id-one".into(), command_text: "k".into() },
            BatchMember { command_id: "id-two".into(), command_text: "lm".into() },
        ];
        let (script, markers) = p.synthesize(&members);
        assert!(script.contains("ID-ONE_START"));
        assert!(script.contains("ID-TWO_END"));

        // Simulate CDB echoing the script back verbatim with stack frames in between.
        let fake_output = format!(
            "{}\nframe 0\nframe 1\n{}\n{}\nmodule list\n{}",
            markers[0].start_marker, markers[0].end_marker, markers[1].start_marker, markers[1].end_marker
        );
        let split = p.split_output(&fake_output, &markers);
        assert_eq!(split[0].as_ref().unwrap().trim(), "frame 0\nframe 1");
        assert_eq!(split[1].as_ref().unwrap().trim(), "module list");
    }

    #[test]
    fn missing_marker_fails_only_that_member() {
        let p = processor();
        let members = vec![
            BatchMember { command_id: "a".into(), command_text: "k".into() },
            BatchMember { command_id: "b".into(), command_text: "lm".into() },
        ];
        let (_script, markers) = p.synthesize(&members);
        // Output for "b" never arrived (e.g. CDB crashed mid-batch).
        let fake_output = format!("{}\nsome frames\n{}", markers[0].start_marker, markers[0].end_marker);
        let split = p.split_output(&fake_output, &markers);
        assert!(split[0].is_ok());
        assert!(split[1].is_err());
    }

    #[test]
    fn batch_timeout_is_capped_by_max() {
        let mut config = Config::default();
        config.base_command_timeout = Duration::from_secs(600);
        config.batch_timeout_multiplier = 1.0;
        config.max_batch_timeout = Duration::from_secs(60);
        let p = BatchProcessor::new(Arc::new(config));
        // 5 members * 600s would be 3000s, way over the 60s ceiling.
        assert_eq!(p.batch_timeout(5), Duration::from_secs(60));
    }
}
