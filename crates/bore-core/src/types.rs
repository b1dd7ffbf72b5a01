//! Domain records and value enums shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved commander-memory key holding the freeform repo brief.
pub const BRAIN_KEY: &str = "__brain__";

#[derive(Debug, thiserror::Error)]
#[error("invalid {kind} value: {value:?}")]
pub struct InvalidValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = InvalidValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(InvalidValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Task sizing chosen at intake; drives advisory per-complexity caps.
    Complexity, "complexity", {
        Basic => "basic",
        Medium => "medium",
        Complex => "complex",
    }
);

string_enum!(
    /// How the Boss reacts when blocked.
    TaskMode, "mode", {
        JustGetItDone => "just_get_it_done",
        AlertWithIssues => "alert_with_issues",
    }
);

string_enum!(
    /// Lifecycle status shared by tasks and executions.
    ///
    /// Advances monotonically with one exception: any non-terminal status may
    /// jump to `Failed` or `Interrupted`.
    Status, "status", {
        Pending => "pending",
        Review => "review",
        Running => "running",
        DiffReview => "diff_review",
        Completed => "completed",
        Failed => "failed",
        Interrupted => "interrupted",
    }
);

string_enum!(
    AgentType, "agent type", {
        Boss => "boss",
        Worker => "worker",
    }
);

string_enum!(
    Outcome, "outcome", {
        Success => "success",
        Partial => "partial",
        Failed => "failed",
    }
);

string_enum!(
    LessonType, "lesson type", {
        Error => "error",
        Pattern => "pattern",
        Warning => "warning",
        Note => "note",
    }
);

string_enum!(
    EventLevel, "event level", {
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
    }
);

/// A git repository under management. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub repo_path: String,
    pub remote_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Key/value text map scoped to a cluster for the Commander agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderMemory {
    pub id: i64,
    pub cluster_id: i64,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Constraint bundle an execution may run under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crew {
    pub id: i64,
    pub cluster_id: i64,
    pub name: String,
    pub objective: String,
    pub constraints: String,
    pub allowed_commands: String,
    pub ownership_paths: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named grouping of related tasks within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub cluster_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Unit of requested work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub cluster_id: i64,
    pub thread_id: i64,
    pub title: String,
    pub prompt: String,
    pub complexity: Complexity,
    pub mode: TaskMode,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Commander review-phase payload captured during task intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReview {
    pub id: i64,
    pub task_id: i64,
    pub phase: ReviewPhase,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

string_enum!(
    ReviewPhase, "review phase", {
        Clarification => "clarification",
        Options => "options",
        Selection => "selection",
        BaseBranch => "base_branch",
    }
);

/// One concrete run of a task, isolated in its own worktree and branch.
///
/// The execution row owns its worktree directory and exec branch while the
/// status is in {pending, running, diff_review}; the diff action executor
/// releases that ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub task_id: i64,
    pub cluster_id: i64,
    pub crew_id: Option<i64>,
    pub base_branch: String,
    pub exec_branch: String,
    pub worktree_path: String,
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only timeline entry for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: i64,
    pub execution_id: i64,
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub event_type: String,
    pub message: String,
}

/// Durable record of one agent CLI invocation within an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: i64,
    pub execution_id: i64,
    pub agent_type: AgentType,
    pub role: String,
    pub prompt: String,
    pub summary: String,
    pub outcome: Outcome,
    pub files_changed: String,
    pub created_at: DateTime<Utc>,
}

/// Lesson extracted from a boss summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLesson {
    pub id: i64,
    pub execution_id: i64,
    pub agent_type: AgentType,
    pub lesson_type: LessonType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            Status::Pending,
            Status::Review,
            Status::Running,
            Status::DiffReview,
            Status::Completed,
            Status::Failed,
            Status::Interrupted,
        ] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
    }

    #[test]
    fn status_rejects_unknown_value() {
        let err = "done".parse::<Status>().expect_err("unknown status");
        assert_eq!(err.kind, "status");
        assert!(err.to_string().contains("done"));
    }

    #[test]
    fn enums_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskMode::JustGetItDone).unwrap(),
            "\"just_get_it_done\""
        );
        assert_eq!(
            serde_json::to_string(&Status::DiffReview).unwrap(),
            "\"diff_review\""
        );
        assert_eq!(
            serde_json::to_string(&LessonType::Pattern).unwrap(),
            "\"pattern\""
        );
    }

    #[test]
    fn execution_round_trips_through_json() {
        let now = Utc::now();
        let exec = Execution {
            id: 7,
            task_id: 3,
            cluster_id: 1,
            crew_id: None,
            base_branch: "main".to_string(),
            exec_branch: "bore/core-3-add-endpoint".to_string(),
            worktree_path: "/repo/.bore/worktrees/core-3-add-endpoint".to_string(),
            status: Status::Pending,
            started_at: None,
            finished_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&exec).unwrap();
        let decoded: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, exec);
    }
}
