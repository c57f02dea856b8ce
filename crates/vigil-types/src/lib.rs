use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Originator of an event: the human operator, the agent itself, or the
/// execution environment delivering results back to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    User,
    Agent,
    Environment,
}

/// Which side of the request/response split an event sits on.
///
/// Actions are emitted by the agent to request an effect; observations are
/// delivered to the agent as the outcome of an action or environmental input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAxis {
    Action,
    Observation,
}

/// Variants of data carried by session history events.
///
/// The action variants request effects (run a command, read a file, execute a
/// notebook cell, send a message); the observation variants report outcomes.
/// `BrowserOutput` and `AgentStateChanged` are carried for completeness of the
/// observation space but are not inspected by name anywhere in the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum EventPayload {
    /// A conversational message; who said it lives in [`Event::source`].
    Message { content: String },
    /// Request to run a shell command.
    CmdRun { command: String },
    /// Request to read a file.
    FileRead { path: String },
    /// Request to execute a notebook cell.
    IPythonRunCell { code: String },
    /// Placeholder action with no effect.
    NullAction,
    /// Output of a completed shell command.
    CmdOutput { command: String, content: String },
    /// Contents of a read file.
    FileReadObs { path: String, content: String },
    /// Output of an executed notebook cell, including any traceback.
    IPythonRunCellObs { code: String, content: String },
    /// A failed action.
    Error { content: String },
    /// The agent's prompt was trimmed to fit the model's context window.
    AgentCondensation { content: String },
    /// A rendered page snapshot from the browsing tool.
    BrowserOutput { url: String, content: String },
    /// Lifecycle transition of the agent (running, paused, finished, ...).
    AgentStateChanged { status: String },
    /// Placeholder observation with no content.
    NullObservation,
}

impl EventPayload {
    /// Return the [`EventAxis`] this payload belongs to.
    pub fn axis(&self) -> EventAxis {
        match self {
            EventPayload::Message { .. }
            | EventPayload::CmdRun { .. }
            | EventPayload::FileRead { .. }
            | EventPayload::IPythonRunCell { .. }
            | EventPayload::NullAction => EventAxis::Action,
            EventPayload::CmdOutput { .. }
            | EventPayload::FileReadObs { .. }
            | EventPayload::IPythonRunCellObs { .. }
            | EventPayload::Error { .. }
            | EventPayload::AgentCondensation { .. }
            | EventPayload::BrowserOutput { .. }
            | EventPayload::AgentStateChanged { .. }
            | EventPayload::NullObservation => EventAxis::Observation,
        }
    }
}

/// One entry of the ordered session history.
///
/// `id` and `timestamp` exist for bus correlation and persistence in the
/// surrounding controller; loop analysis reads only `source` and `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub payload: EventPayload,
}

impl Event {
    /// Create an event stamped with a fresh id and the current time.
    pub fn new(source: EventSource, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            payload,
        }
    }

    /// Return the [`EventAxis`] of this event's payload.
    pub fn axis(&self) -> EventAxis {
        self.payload.axis()
    }

    /// Structural equivalence for pattern matching: kind and payload fields
    /// must match verbatim. Source, id, and timestamp do not participate.
    pub fn equivalent_to(&self, other: &Event) -> bool {
        self.payload == other.payload
    }
}

/// Category of non-productive loop reported by the kernel.
///
/// The serialized tags are part of the controller contract and must not
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    RepeatingActionObservation,
    RepeatingActionError,
    RepeatingActionObservationPattern,
    Monologue,
    ContextWindowError,
    SyntaxError,
}

impl LoopType {
    /// The wire tag for this loop category.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopType::RepeatingActionObservation => "repeating_action_observation",
            LoopType::RepeatingActionError => "repeating_action_error",
            LoopType::RepeatingActionObservationPattern => {
                "repeating_action_observation_pattern"
            }
            LoopType::Monologue => "monologue",
            LoopType::ContextWindowError => "context_window_error",
            LoopType::SyntaxError => "syntax_error",
        }
    }
}

impl fmt::Display for LoopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a string that names no [`LoopType`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown loop type: {0}")]
pub struct UnknownLoopType(pub String);

impl FromStr for LoopType {
    type Err = UnknownLoopType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repeating_action_observation" => Ok(LoopType::RepeatingActionObservation),
            "repeating_action_error" => Ok(LoopType::RepeatingActionError),
            "repeating_action_observation_pattern" => {
                Ok(LoopType::RepeatingActionObservationPattern)
            }
            "monologue" => Ok(LoopType::Monologue),
            "context_window_error" => Ok(LoopType::ContextWindowError),
            "syntax_error" => Ok(LoopType::SyntaxError),
            other => Err(UnknownLoopType(other.to_string())),
        }
    }
}

/// Structured description of a detected loop.
///
/// `loop_start_idx` indexes the filtered tail the verdict was computed over:
/// user messages and null events are invisible when assigning positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckAnalysis {
    pub loop_type: LoopType,
    pub loop_repeat_times: usize,
    pub loop_start_idx: usize,
}
