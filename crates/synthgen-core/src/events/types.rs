//! Event types carried from the job runner to stream subscribers.

use serde::{Deserialize, Serialize};

use crate::job::JobState;

/// Sentinel payload telling subscribers to refresh their file view.
pub const REFRESH_FILES: &str = "REFRESH_FILES";

/// Sentinel payload marking the end of a job's stream.
pub const END_OF_STREAM: &str = "CLOSE";

/// Origin of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lines synthesized by the runner (command echo, summaries).
    System,
}

/// One line of captured process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub sequence: u64,
    pub text: String,
    pub stream: LogStream,
}

impl LogLine {
    /// Text as presented to operators; stderr lines are flagged.
    pub fn display_text(&self) -> String {
        match self.stream {
            LogStream::Stderr => format!("Error: {}", self.text),
            LogStream::Stdout | LogStream::System => self.text.clone(),
        }
    }
}

/// Payload of a relay event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayPayload {
    Line(LogLine),
    /// The output directory changed.
    RefreshFiles,
    /// The job reached a terminal state; nothing follows.
    End { state: JobState },
}

/// A sequenced relay event. Sentinels share the job's sequence space so
/// ordering holds across lines and markers alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub sequence: u64,
    pub payload: RelayPayload,
}

impl RelayEvent {
    pub fn is_end(&self) -> bool {
        matches!(self.payload, RelayPayload::End { .. })
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(RelayEvent),
    /// The subscriber fell behind and `missed` events were dropped for it.
    Gap { missed: u64 },
}
