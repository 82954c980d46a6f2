/*
    fanout.rs - Delivery of one authoring event to its target streams

    Streams are visited sequentially in request order. A stream that keeps
    failing is retried up to the policy's attempt budget and then reported;
    it never fails the authoring call and never undoes earlier streams.
*/

use crate::core_model::{ObjectId, ObjectKind, StreamAction};
use crate::core_stream::{StreamError, StreamService};
use crate::metrics::{self as fed_metrics, Timer, FANOUT_DURATION_MS, FANOUT_FAILURES};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry for streams whose post fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutPolicy {
    /// Total attempts per stream, including the first
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl FanoutPolicy {
    /// Single attempt per stream
    pub fn no_retry() -> Self {
        FanoutPolicy {
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
        }
    }
}

impl Default for FanoutPolicy {
    fn default() -> Self {
        FanoutPolicy {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// What happens when an association names a target that is not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationTargetPolicy {
    /// Accept it; the association fans out to no stream
    #[default]
    Unchecked,
    /// Reject with `NotFound` before anything is persisted
    RequireExisting,
}

impl AssociationTargetPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationTargetPolicy::Unchecked => "unchecked",
            AssociationTargetPolicy::RequireExisting => "require_existing",
        }
    }
}

impl fmt::Display for AssociationTargetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationTargetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "unchecked" => Ok(AssociationTargetPolicy::Unchecked),
            "require_existing" => Ok(AssociationTargetPolicy::RequireExisting),
            other => Err(format!(
                "unknown association target policy '{}' (expected unchecked or require_existing)",
                other
            )),
        }
    }
}

/// A stream that did not receive the event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub stream: String,
    pub attempts: u32,
    pub error: String,
}

/// Per-stream outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutReport {
    pub delivered: Vec<String>,
    pub failed: Vec<StreamFailure>,
}

impl FanoutReport {
    /// Every target stream received the event
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_streams(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.stream.as_str())
    }
}

/// Drop duplicate stream ids, keeping first occurrence order
pub(crate) fn dedup_streams(streams: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(streams.len());
    for stream in streams {
        if !unique.contains(stream) {
            unique.push(stream.clone());
        }
    }
    unique
}

/// One object occurrence to replicate into several streams
pub(crate) struct FanoutEvent<'a> {
    pub object_id: &'a ObjectId,
    pub kind: ObjectKind,
    pub action: StreamAction,
    pub author: &'a str,
}

pub(crate) async fn fan_out(
    streams: &StreamService,
    policy: &FanoutPolicy,
    targets: &[String],
    event: FanoutEvent<'_>,
) -> FanoutReport {
    let timer = Timer::new(FANOUT_DURATION_MS);
    let mut report = FanoutReport::default();
    let max_attempts = policy.max_attempts.max(1);

    for stream in targets {
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match streams
                .post(stream, event.object_id, event.kind, event.action, event.author, None)
                .await
            {
                Ok(_) => break Ok(()),
                Err(e @ StreamError::InvalidStream(_)) => break Err(e),
                Err(e) if attempts >= max_attempts => break Err(e),
                Err(e) => {
                    debug!(stream = %stream, attempt = attempts, error = %e, "Retrying stream post");
                    tokio::time::sleep(policy.retry_backoff).await;
                }
            }
        };

        match outcome {
            Ok(()) => report.delivered.push(stream.clone()),
            Err(e) => {
                warn!(
                    stream = %stream,
                    id = %event.object_id,
                    action = %event.action,
                    attempts,
                    error = %e,
                    "Stream did not receive event"
                );
                fed_metrics::record_counter(FANOUT_FAILURES, 1);
                report.failed.push(StreamFailure {
                    stream: stream.clone(),
                    attempts,
                    error: e.to_string(),
                });
            }
        }
    }

    timer.stop();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_policy_parse() {
        assert_eq!(
            "require-existing".parse::<AssociationTargetPolicy>().unwrap(),
            AssociationTargetPolicy::RequireExisting
        );
        assert_eq!(
            "Unchecked".parse::<AssociationTargetPolicy>().unwrap(),
            AssociationTargetPolicy::Unchecked
        );
        assert!("strict".parse::<AssociationTargetPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&AssociationTargetPolicy::RequireExisting).unwrap(),
            "\"require_existing\""
        );
    }

    #[test]
    fn test_dedup_keeps_order() {
        let streams: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedup_streams(&streams), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_report_completeness() {
        let mut report = FanoutReport {
            delivered: vec!["s1".to_string()],
            failed: Vec::new(),
        };
        assert!(report.is_complete());

        report.failed.push(StreamFailure {
            stream: "s2".to_string(),
            attempts: 3,
            error: "down".to_string(),
        });
        assert!(!report.is_complete());
        assert_eq!(report.failed_streams().collect::<Vec<_>>(), vec!["s2"]);
    }
}
