use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tracing::{info, warn};

use crate::{
    dto::{
        format_system_time,
        sse::{EndedEvent, ProblemEvent, ScoresEvent, ServerEvent, StartedEvent, TickEvent},
    },
    services::battle_service::{BattleSession, BattleUpdate},
    state::battle::SessionResult,
};

/// Convert a live battle session into an SSE response.
///
/// The stream ends right after `battle.ended`. A client disconnect drops the
/// session, which aborts its task and unsubscribes from the room.
pub fn battle_stream(session: BattleSession) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut session = session;
        while let Some(update) = session.next_update().await {
            let ended = matches!(update, BattleUpdate::Ended(_));
            match to_server_event(&update) {
                Ok(payload) => {
                    let mut event = Event::default().data(payload.data);
                    if let Some(name) = payload.event {
                        event = event.event(name);
                    }
                    yield Ok::<_, Infallible>(event);
                }
                Err(err) => warn!(error = %err, "failed to serialise battle update"),
            }
            if ended {
                break;
            }
        }
        info!("battle SSE stream closed");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Named SSE event for one session update.
pub fn to_server_event(update: &BattleUpdate) -> serde_json::Result<ServerEvent> {
    match update {
        BattleUpdate::Problem {
            problem_id,
            problem,
        } => ServerEvent::json(
            Some("battle.problem".to_owned()),
            &ProblemEvent {
                problem_id: problem_id.clone(),
                title: problem.as_ref().map(|p| p.title.clone()),
                description: problem.as_ref().map(|p| p.description.clone()),
            },
        ),
        BattleUpdate::Started {
            deadline,
            remaining,
        } => ServerEvent::json(
            Some("battle.started".to_owned()),
            &StartedEvent {
                deadline: format_system_time(*deadline),
                remaining_secs: remaining.as_secs(),
                remaining: format_remaining(*remaining),
            },
        ),
        BattleUpdate::Tick { remaining } => ServerEvent::json(
            Some("battle.tick".to_owned()),
            &TickEvent {
                remaining_secs: remaining.as_secs(),
                remaining: format_remaining(*remaining),
            },
        ),
        BattleUpdate::Scores { mine, theirs } => ServerEvent::json(
            Some("battle.scores".to_owned()),
            &ScoresEvent {
                mine: *mine,
                theirs: *theirs,
            },
        ),
        BattleUpdate::Ended(report) => {
            let (result, reason) = match &report.result {
                SessionResult::Finished { .. } => ("finished", None),
                SessionResult::Timeout => ("timeout", None),
                SessionResult::Error(reason) => ("error", Some(reason.clone())),
            };
            ServerEvent::json(
                Some("battle.ended".to_owned()),
                &EndedEvent {
                    result: result.to_owned(),
                    headline: report.summary.headline.clone(),
                    details: report.summary.details.clone(),
                    winner_id: report.summary.winner_id.clone(),
                    reason,
                },
            )
        }
    }
}

/// `MM:SS`, rounding partial seconds up so `00:00` only shows at the deadline.
pub fn format_remaining(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::battle_service::{BattleReport, ResultSummary};

    #[test]
    fn remaining_time_is_minutes_and_seconds() {
        assert_eq!(format_remaining(Duration::from_secs(300)), "05:00");
        assert_eq!(format_remaining(Duration::from_secs(61)), "01:01");
        assert_eq!(format_remaining(Duration::from_millis(59_200)), "01:00");
        assert_eq!(format_remaining(Duration::ZERO), "00:00");
    }

    #[test]
    fn ended_event_reports_error_reason() {
        let update = BattleUpdate::Ended(BattleReport {
            result: SessionResult::Error("room disappeared".into()),
            summary: ResultSummary {
                headline: "Battle ended due to error.".into(),
                details: String::new(),
                winner_id: None,
            },
        });
        let event = to_server_event(&update).unwrap();
        assert_eq!(event.event.as_deref(), Some("battle.ended"));
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["result"], "error");
        assert_eq!(data["reason"], "room disappeared");
        assert!(data.get("winner_id").is_none());
    }

    #[test]
    fn scores_event_is_named() {
        let event = to_server_event(&BattleUpdate::Scores { mine: 40, theirs: 70 }).unwrap();
        assert_eq!(event.event.as_deref(), Some("battle.scores"));
        assert_eq!(event.data, r#"{"mine":40,"theirs":70}"#);
    }
}
