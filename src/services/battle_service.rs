//! Battle session runtime.
//!
//! Each `(room, user)` pair gets one task that owns the room subscription and
//! the countdown, feeds the pure [`BattleMachine`] and carries out its effects.
//! Dropping the [`SessionHandle`] aborts the task, which releases both.

use std::{
    pin::Pin,
    time::{Duration, SystemTime},
};

use futures::{StreamExt, future};
use tokio::{
    sync::{mpsc, oneshot},
    task::{AbortHandle, JoinHandle},
    time::{self, Instant, MissedTickBehavior, Sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{RoomEntity, RoomStatus, Slot},
        room_store::RoomSnapshots,
        storage::Backend,
    },
    error::ServiceError,
    external::{Collaborators, problems::Problem},
    services::{finalize_service, rating::Outcome},
    state::{
        SessionEntry, SessionKey, SharedState,
        battle::{BattleEffect, BattleEvent, BattleMachine, SessionResult},
    },
};

const UPDATE_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 8;
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Progress published to the client owning a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattleUpdate {
    /// Problem statement; `None` when the bank could not provide it.
    Problem {
        /// Identifier stored on the room.
        problem_id: String,
        /// Statement, when available.
        problem: Option<Problem>,
    },
    /// Countdown armed.
    Started {
        /// Shared wall-clock deadline.
        deadline: SystemTime,
        /// Time left when the countdown was armed.
        remaining: Duration,
    },
    /// Once-per-second countdown refresh.
    Tick {
        /// Time left.
        remaining: Duration,
    },
    /// Both scores from the local point of view.
    Scores {
        /// Local player's score.
        mine: i64,
        /// Opponent's score.
        theirs: i64,
    },
    /// Final update; nothing follows.
    Ended(BattleReport),
}

/// Outcome delivered exactly once when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleReport {
    /// Why the session ended.
    pub result: SessionResult,
    /// Text shown to the player.
    pub summary: ResultSummary,
}

/// Human readable result of a battle for one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSummary {
    /// `You Won!`, `You Lost!`, `It's a Draw!`, possibly suffixed, or the error line.
    pub headline: String,
    /// Both names and scores, one player per line.
    pub details: String,
    /// Winner identity, `None` on a draw or error.
    pub winner_id: Option<String>,
}

enum SessionCommand {
    Submit {
        code: String,
        reply: oneshot::Sender<Result<i64, ServiceError>>,
    },
}

/// Sending side of a session's command channel.
#[derive(Clone)]
pub struct SessionCommands {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionCommands {
    /// Score `code` and record it in the caller's slot. Returns the score.
    pub async fn submit(&self, code: String) -> Result<i64, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SessionCommand::Submit { code, reply })
            .await
            .map_err(|_| session_gone())?;
        response.await.map_err(|_| session_gone())?
    }
}

fn session_gone() -> ServiceError {
    ServiceError::InvalidState("battle session has ended".into())
}

/// Owns the session task; dropping it tears the session down.
pub struct SessionHandle {
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Handle that can abort the task without owning it.
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything a session task needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Storage the room lives in.
    pub backend: Backend,
    /// Problem bank and judge.
    pub collaborators: Collaborators,
    /// Room being played.
    pub room_id: Uuid,
    /// Local player.
    pub user_id: String,
    /// Battle length counted from `startTime`.
    pub duration: Duration,
}

/// Spawn a session task.
pub fn start_session(
    ctx: SessionContext,
) -> (SessionHandle, SessionCommands, mpsc::Receiver<BattleUpdate>) {
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

    let runtime = SessionRuntime {
        machine: BattleMachine::new(ctx.user_id.clone(), ctx.duration),
        ctx,
        updates: updates_tx,
        snapshots: None,
        countdown: None,
        deadline: None,
    };
    let task = tokio::spawn(runtime.run(commands_rx));

    (
        SessionHandle { task },
        SessionCommands { tx: commands_tx },
        updates_rx,
    )
}

enum Wake {
    Event(BattleEvent),
    Tick,
    Command(SessionCommand),
    CommandsClosed,
}

struct SessionRuntime {
    ctx: SessionContext,
    machine: BattleMachine,
    updates: mpsc::Sender<BattleUpdate>,
    snapshots: Option<RoomSnapshots>,
    countdown: Option<Pin<Box<Sleep>>>,
    deadline: Option<Instant>,
}

impl SessionRuntime {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        match self.ctx.backend.rooms.watch_room(self.ctx.room_id).await {
            Ok(snapshots) => self.snapshots = Some(snapshots),
            Err(err) => {
                self.apply(BattleEvent::StreamFailed(err.to_string())).await;
                return;
            }
        }

        let mut ticker = time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            let wake = tokio::select! {
                event = next_snapshot(&mut self.snapshots) => Wake::Event(event),
                () = countdown_elapsed(&mut self.countdown) => {
                    Wake::Event(BattleEvent::CountdownElapsed)
                }
                _ = ticker.tick(), if self.deadline.is_some() => Wake::Tick,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::CommandsClosed,
                },
            };

            match wake {
                Wake::Event(event) => {
                    if self.apply(event).await {
                        return;
                    }
                }
                Wake::Tick => self.publish_tick().await,
                Wake::Command(command) => self.handle_command(command),
                Wake::CommandsClosed => commands_open = false,
            }
        }
    }

    /// Feed one event to the machine. Returns `true` once the session ended.
    async fn apply(&mut self, event: BattleEvent) -> bool {
        if event == BattleEvent::CountdownElapsed {
            self.countdown = None;
        }

        let effects = self.machine.handle(event, SystemTime::now());
        for effect in effects {
            match effect {
                BattleEffect::LoadProblem(problem_id) => self.load_problem(problem_id),
                BattleEffect::StartCountdown { deadline } => self.arm_countdown(deadline).await,
                BattleEffect::Scores { mine, theirs } => {
                    self.publish(BattleUpdate::Scores { mine, theirs }).await
                }
                BattleEffect::End(result) => {
                    self.end(result).await;
                    return true;
                }
            }
        }
        false
    }

    fn load_problem(&self, problem_id: String) {
        let problems = self.ctx.collaborators.problems.clone();
        let updates = self.updates.clone();
        let room_id = self.ctx.room_id;
        tokio::spawn(async move {
            let problem = match problems.get_problem(problem_id.clone()).await {
                Ok(Some(problem)) => Some(problem),
                Ok(None) => {
                    warn!(room_id = %room_id, problem_id = %problem_id, "problem not found");
                    None
                }
                Err(err) => {
                    warn!(room_id = %room_id, problem_id = %problem_id, error = %err, "problem bank failed");
                    None
                }
            };
            // The session may already be gone; the problem is display-only.
            let _ = updates
                .send(BattleUpdate::Problem {
                    problem_id,
                    problem,
                })
                .await;
        });
    }

    async fn arm_countdown(&mut self, deadline: SystemTime) {
        let remaining = deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        let at = Instant::now() + remaining;
        self.deadline = Some(at);
        self.countdown = Some(Box::pin(time::sleep_until(at)));
        debug!(room_id = %self.ctx.room_id, user_id = %self.ctx.user_id, remaining_secs = remaining.as_secs(), "countdown armed");
        self.publish(BattleUpdate::Started {
            deadline,
            remaining,
        })
        .await;
    }

    async fn publish_tick(&mut self) {
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.publish(BattleUpdate::Tick { remaining }).await;
        }
    }

    fn handle_command(&self, command: SessionCommand) {
        let SessionCommand::Submit { code, reply } = command;
        let slot = match self.machine.ensure_can_submit() {
            Ok(slot) => slot,
            Err(rejected) => {
                let _ = reply.send(Err(ServiceError::InvalidState(rejected.to_string())));
                return;
            }
        };

        let judge = self.ctx.collaborators.judge.clone();
        let rooms = self.ctx.backend.rooms.clone();
        let room_id = self.ctx.room_id;
        let user_id = self.ctx.user_id.clone();
        tokio::spawn(async move {
            let outcome = async {
                let score = judge.score_submission(code.clone()).await?;
                rooms.record_submission(room_id, slot, score, code).await?;
                Ok::<_, ServiceError>(score)
            }
            .await;

            match &outcome {
                Ok(score) => info!(room_id = %room_id, user_id = %user_id, score, "submission recorded"),
                Err(err) => warn!(room_id = %room_id, user_id = %user_id, error = %err, "submission failed"),
            }
            let _ = reply.send(outcome);
        });
    }

    async fn end(&mut self, result: SessionResult) {
        // Unsubscribe and cancel the countdown before anything else happens.
        self.snapshots = None;
        self.countdown = None;
        self.deadline = None;

        let room_id = self.ctx.room_id;
        if self.machine.assignment().is_some() {
            // Detached so an aborted session cannot interrupt a finalize halfway.
            let backend = self.ctx.backend.clone();
            let finalizing =
                tokio::spawn(async move { finalize_service::finalize_with(&backend, room_id).await });
            match finalizing.await {
                Ok(Ok(outcome)) => debug!(room_id = %room_id, ?outcome, "finalize completed"),
                Ok(Err(err)) => warn!(room_id = %room_id, error = %err, "finalize failed"),
                Err(err) => warn!(room_id = %room_id, error = %err, "finalize task failed"),
            }
        }

        let room = match self.ctx.backend.rooms.find_room(room_id).await {
            Ok(room) => room,
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "could not read room for the result");
                None
            }
        };
        let summary = result_summary(room.as_ref(), &self.ctx.user_id, &result);
        info!(
            room_id = %room_id,
            user_id = %self.ctx.user_id,
            headline = %summary.headline,
            "battle session ended"
        );
        self.publish(BattleUpdate::Ended(BattleReport { result, summary }))
            .await;
    }

    async fn publish(&mut self, update: BattleUpdate) {
        if self.updates.send(update).await.is_err() {
            debug!(room_id = %self.ctx.room_id, user_id = %self.ctx.user_id, "session listener gone");
        }
    }
}

async fn next_snapshot(snapshots: &mut Option<RoomSnapshots>) -> BattleEvent {
    let Some(stream) = snapshots else {
        return future::pending().await;
    };
    match stream.next().await {
        Some(Ok(Some(room))) => BattleEvent::Snapshot(room),
        Some(Ok(None)) => BattleEvent::RoomMissing,
        Some(Err(err)) => BattleEvent::StreamFailed(err.to_string()),
        None => BattleEvent::StreamFailed("change stream closed".into()),
    }
}

async fn countdown_elapsed(countdown: &mut Option<Pin<Box<Sleep>>>) {
    match countdown {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

/// Result text for `user_id` given how its session ended.
pub fn result_summary(
    room: Option<&RoomEntity>,
    user_id: &str,
    result: &SessionResult,
) -> ResultSummary {
    let details = room.map(score_details).unwrap_or_default();
    let (headline, winner_id) = match result {
        SessionResult::Error(_) => ("Battle ended due to error.".to_owned(), None),
        SessionResult::Finished { winner_id } => {
            let winner_id = winner_id
                .clone()
                .or_else(|| room.and_then(|room| Outcome::of_room(room).winner_id(room)));
            (verdict(winner_id.as_deref(), user_id).to_owned(), winner_id)
        }
        SessionResult::Timeout => {
            let winner_id = room.and_then(|room| match room.status {
                RoomStatus::Finished => room.winner_id.clone(),
                _ => Outcome::of_room(room).winner_id(room),
            });
            (
                format!("{} (Timeout)", verdict(winner_id.as_deref(), user_id)),
                winner_id,
            )
        }
    };

    ResultSummary {
        headline,
        details,
        winner_id,
    }
}

fn verdict(winner_id: Option<&str>, user_id: &str) -> &'static str {
    match winner_id {
        None => "It's a Draw!",
        Some(winner) if winner == user_id => "You Won!",
        Some(_) => "You Lost!",
    }
}

fn score_details(room: &RoomEntity) -> String {
    format!(
        "{} Score: {}\n{} Score: {}",
        room.player_name(Slot::Player1),
        room.player1_score,
        room.player_name(Slot::Player2),
        room.player2_score
    )
}

/// A live session bound to the caller's connection.
///
/// Dropping it aborts the session and frees its registry entry.
pub struct BattleSession {
    updates: mpsc::Receiver<BattleUpdate>,
    _handle: SessionHandle,
    _registration: Registration,
}

impl BattleSession {
    /// Next update; `None` once the session task is gone.
    pub async fn next_update(&mut self) -> Option<BattleUpdate> {
        self.updates.recv().await
    }
}

struct Registration {
    state: SharedState,
    key: SessionKey,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state
            .sessions()
            .remove_if(&self.key, |_, entry| entry.id == self.id);
    }
}

/// Start the caller's session for `room_id`, replacing any previous one.
pub async fn open_session(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
) -> Result<BattleSession, ServiceError> {
    let backend = state.require_backend().await?;
    let room = backend
        .rooms
        .find_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}`")))?;
    if room.slot_of(user_id).is_none() {
        return Err(ServiceError::Unauthorized(
            "not a player in this room".into(),
        ));
    }

    let ctx = SessionContext {
        backend,
        collaborators: state.collaborators().clone(),
        room_id,
        user_id: user_id.to_owned(),
        duration: state.config().battle_duration(),
    };
    let (handle, commands, updates) = start_session(ctx);

    let id = Uuid::new_v4();
    let key: SessionKey = (room_id, user_id.to_owned());
    let entry = SessionEntry {
        id,
        commands,
        abort: handle.abort_handle(),
    };
    if let Some(previous) = state.sessions().insert(key.clone(), entry) {
        info!(room_id = %room_id, user_id, "replacing live battle session");
        previous.abort.abort();
    }

    Ok(BattleSession {
        updates,
        _handle: handle,
        _registration: Registration {
            state: state.clone(),
            key,
            id,
        },
    })
}

/// Submit code through the caller's live session.
pub async fn submit(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
    code: String,
) -> Result<i64, ServiceError> {
    let commands = state
        .sessions()
        .get(&(room_id, user_id.to_owned()))
        .map(|entry| entry.commands.clone())
        .ok_or_else(|| {
            ServiceError::InvalidState("no live battle session for this room".into())
        })?;
    commands.submit(code).await
}

/// Result summary of a settled room for `user_id`.
pub async fn result_for(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
) -> Result<ResultSummary, ServiceError> {
    let backend = state.require_backend().await?;
    let room = backend
        .rooms
        .find_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}`")))?;
    if room.slot_of(user_id).is_none() {
        return Err(ServiceError::Unauthorized(
            "not a player in this room".into(),
        ));
    }

    let result = match room.status {
        RoomStatus::Finished => SessionResult::Finished {
            winner_id: room.winner_id.clone(),
        },
        RoomStatus::Canceled => SessionResult::Error("room was canceled".into()),
        RoomStatus::Waiting | RoomStatus::Ongoing => {
            return Err(ServiceError::InvalidState(
                "battle has not finished yet".into(),
            ));
        }
    };
    Ok(result_summary(Some(&room), user_id, &result))
}
