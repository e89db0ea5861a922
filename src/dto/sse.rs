use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// `battle.problem`: statement of the room's problem.
pub struct ProblemEvent {
    pub problem_id: String,
    /// Absent when the problem bank could not provide the statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// `battle.started`: the countdown is armed.
pub struct StartedEvent {
    /// RFC 3339 deadline shared by both players.
    pub deadline: String,
    pub remaining_secs: u64,
    /// `MM:SS`.
    pub remaining: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// `battle.tick`: countdown refresh.
pub struct TickEvent {
    pub remaining_secs: u64,
    /// `MM:SS`.
    pub remaining: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// `battle.scores`: both scores from the receiver's point of view.
pub struct ScoresEvent {
    pub mine: i64,
    pub theirs: i64,
}

#[derive(Debug, Serialize, ToSchema)]
/// `battle.ended`: last event of the stream.
pub struct EndedEvent {
    /// `finished`, `timeout` or `error`.
    pub result: String,
    pub headline: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    /// Failure reason when `result` is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
