use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for BuildStatus {
    type Err = BuildStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(BuildStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BuildStatus`] string.
#[derive(Debug, Clone)]
pub struct BuildStatusParseError(pub String);

impl fmt::Display for BuildStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid build status: {:?}", self.0)
    }
}

impl std::error::Error for BuildStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a task within the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Retry,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Retry => "retry",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "retry" => Ok(Self::Retry),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// A node in the fixed pipeline topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Plan,
    Repo,
    Retrieve,
    Patch,
    Validate,
    CreatePr,
    Notify,
}

impl StageKind {
    /// All stage kinds, in dispatcher-tick scan order.
    pub const ALL: [StageKind; 7] = [
        Self::Plan,
        Self::Repo,
        Self::Retrieve,
        Self::Patch,
        Self::Validate,
        Self::CreatePr,
        Self::Notify,
    ];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plan => "plan",
            Self::Repo => "repo",
            Self::Retrieve => "retrieve",
            Self::Patch => "patch",
            Self::Validate => "validate",
            Self::CreatePr => "create_pr",
            Self::Notify => "notify",
        };
        f.write_str(s)
    }
}

impl FromStr for StageKind {
    type Err = StageKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "repo" => Ok(Self::Repo),
            "retrieve" => Ok(Self::Retrieve),
            "patch" => Ok(Self::Patch),
            "validate" => Ok(Self::Validate),
            "create_pr" => Ok(Self::CreatePr),
            "notify" => Ok(Self::Notify),
            other => Err(StageKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StageKind`] string.
#[derive(Debug, Clone)]
pub struct StageKindParseError(pub String);

impl fmt::Display for StageKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stage kind: {:?}", self.0)
    }
}

impl std::error::Error for StageKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One ingested CI failure -- the root entity of a pipeline run.
///
/// `(job, build_number)` is unique; the dispatcher transitions `status` from
/// `processing` to a terminal state and never reverts it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Build {
    pub id: i64,
    pub job: String,
    pub build_number: i64,
    pub branch: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub status: BuildStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable record of intent to execute one stage for one build; the unit
/// of leasing and retry.
///
/// `lease_generation` is a fencing token: it is incremented every time the
/// task is leased, and status writes from a stale worker (one holding an
/// older generation) are rejected rather than silently applied.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub build_id: i64,
    pub kind: StageKind,
    pub status: TaskStatus,
    pub attempt: i32,
    pub max_attempts: i32,
    pub payload: serde_json::Value,
    pub last_error: Option<String>,
    pub lease_generation: i32,
    pub ready_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of the `plan` stage: the structured fix plan derived from the
/// build logs, persisted for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: i64,
    pub build_id: i64,
    pub summary: String,
    pub steps: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A source file the `retrieve` stage judged likely to contain the fault.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateFile {
    pub id: i64,
    pub build_id: i64,
    pub file_path: String,
    pub rank_score: f64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A unified diff produced by the `patch` stage, and whether it applied.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patch {
    pub id: i64,
    pub build_id: i64,
    pub diff: String,
    pub applied: bool,
    pub commit_sha: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of the `validate` stage's recompile (and optional test) attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Validation {
    pub id: i64,
    pub build_id: i64,
    pub passed: bool,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A pull request opened by the `create_pr` stage.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullRequest {
    pub id: i64,
    pub build_id: i64,
    pub external_id: String,
    pub head_branch: String,
    pub base_branch: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An outbound notification emitted by the `notify` stage, or by a
/// terminal-failure hook.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub build_id: i64,
    pub notification_type: String,
    pub recipient: String,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_display_roundtrip() {
        let variants = [
            BuildStatus::Processing,
            BuildStatus::Completed,
            BuildStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: BuildStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn build_status_invalid() {
        assert!("bogus".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Retry,
            TaskStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn stage_kind_display_roundtrip() {
        for v in StageKind::ALL {
            let s = v.to_string();
            let parsed: StageKind = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn stage_kind_invalid() {
        assert!("deploy".parse::<StageKind>().is_err());
    }

    #[test]
    fn stage_kind_matches_topology_order() {
        let names: Vec<String> = StageKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "plan",
                "repo",
                "retrieve",
                "patch",
                "validate",
                "create_pr",
                "notify",
            ]
        );
    }
}
