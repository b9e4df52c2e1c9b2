use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle state of a generator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One invocation of the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub command: Vec<String>,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub ended_at: Option<OffsetDateTime>,
}

impl Job {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            state: JobState::Pending,
            exit_code: None,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Mark the process as spawned.
    pub fn mark_running(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::Running;
            self.started_at = Some(OffsetDateTime::now_utc());
        }
    }

    /// Record the process outcome. `None` means the process ended without an
    /// exit code (killed by a signal) and counts as a failure.
    ///
    /// Terminal jobs are never modified again.
    pub fn finish(&mut self, exit_code: Option<i32>) {
        if self.state.is_terminal() {
            return;
        }
        self.exit_code = exit_code;
        self.state = match exit_code {
            Some(0) => JobState::Succeeded,
            _ => JobState::Failed,
        };
        self.ended_at = Some(OffsetDateTime::now_utc());
    }

    /// Command line as shown to operators.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}
