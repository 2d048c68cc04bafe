//! Periodic consistency sweeps.
//!
//! Four independent sweeps keep the registries honest:
//!
//! | Sweep            | Looks at                       | Effect                             |
//! |------------------|--------------------------------|------------------------------------|
//! | `IdleWebsocket`  | websockets with no players     | notify idle, then close inactive   |
//! | `IdlePlayer`     | every registered player        | notify idle, unregister inactive   |
//! | `IdleGame`       | every unfinished game          | notify idle, cancel inactive       |
//! | `ObsoleteGame`   | every finished game            | delete once past retention         |
//!
//! Each run is a single critical section driven through the [`Dispatcher`],
//! so notifications go out after the lock is released like any other event.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::minutes_between;
use crate::config::{SweepSchedule, SweepSchedules};
use crate::dispatch::{Dispatcher, EventHandler};
use crate::error::Result;
use crate::state::{ActivityState, ConnectionState};

/// One of the periodic consistency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sweep {
    IdleWebsocket,
    IdlePlayer,
    IdleGame,
    ObsoleteGame,
}

/// What a single sweep run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle: usize,
    pub inactive: usize,
    pub obsolete: usize,
}

impl Sweep {
    pub const ALL: [Sweep; 4] = [
        Sweep::IdleWebsocket,
        Sweep::IdlePlayer,
        Sweep::IdleGame,
        Sweep::ObsoleteGame,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::IdleWebsocket => "idle websocket",
            Self::IdlePlayer => "idle player",
            Self::IdleGame => "idle game",
            Self::ObsoleteGame => "obsolete game",
        }
    }

    pub fn schedule(&self, schedules: &SweepSchedules) -> SweepSchedule {
        match self {
            Self::IdleWebsocket => schedules.idle_websocket_check,
            Self::IdlePlayer => schedules.idle_player_check,
            Self::IdleGame => schedules.idle_game_check,
            Self::ObsoleteGame => schedules.obsolete_game_check,
        }
    }

    /// Run the sweep against the current state. The caller holds the lock.
    pub fn run(self, handler: &mut EventHandler<'_>) -> Result<SweepReport> {
        let report = match self {
            Self::IdleWebsocket => idle_websockets(handler),
            Self::IdlePlayer => idle_players(handler)?,
            Self::IdleGame => idle_games(handler)?,
            Self::ObsoleteGame => obsolete_games(handler),
        };
        debug!(
            "Completed {} sweep: {} idle, {} inactive, {} obsolete",
            self.name(),
            report.idle,
            report.inactive,
            report.obsolete
        );
        Ok(report)
    }
}

/// Only websockets without players are considered; a websocket with players
/// is kept alive through them.
fn idle_websockets(handler: &mut EventHandler<'_>) -> SweepReport {
    let thresholds = handler.config().thresholds;
    let now = handler.manager().now();
    let mut report = SweepReport::default();

    for ws in handler.manager().lookup_websocket_activity() {
        if ws.player_count > 0 {
            continue;
        }
        let minutes = minutes_between(ws.last_active_date, now);
        if minutes >= thresholds.websocket_inactive_thresh_min {
            if ws.activity_state != ActivityState::Inactive {
                handler.handle_websocket_inactive_event(ws.websocket);
                report.inactive += 1;
            }
        } else if minutes >= thresholds.websocket_idle_thresh_min
            && ws.activity_state == ActivityState::Active
        {
            handler.handle_websocket_idle_event(ws.websocket);
            report.idle += 1;
        }
    }
    report
}

/// A disconnected player goes straight to inactive once it reaches the idle
/// threshold.
fn idle_players(handler: &mut EventHandler<'_>) -> Result<SweepReport> {
    let thresholds = handler.config().thresholds;
    let now = handler.manager().now();
    let mut report = SweepReport::default();

    for player in handler.manager().lookup_player_activity() {
        let minutes = minutes_between(player.last_active_date, now);
        let disconnected = player.connection_state == ConnectionState::Disconnected;
        if minutes >= thresholds.player_inactive_thresh_min
            || (minutes >= thresholds.player_idle_thresh_min && disconnected)
        {
            // an earlier unregister in this pass may already have removed it
            if handler.manager().lookup_player(&player.player_id).is_some() {
                handler.handle_player_inactive_event(&player.player_id)?;
                report.inactive += 1;
            }
        } else if minutes >= thresholds.player_idle_thresh_min
            && player.activity_state == ActivityState::Active
        {
            handler.handle_player_idle_event(&player.player_id)?;
            report.idle += 1;
        }
    }
    Ok(report)
}

fn idle_games(handler: &mut EventHandler<'_>) -> Result<SweepReport> {
    let thresholds = handler.config().thresholds;
    let now = handler.manager().now();
    let mut report = SweepReport::default();

    for game in handler.manager().lookup_game_activity() {
        // cancelling one game never finishes another, but check anyway
        let unfinished = handler
            .manager()
            .lookup_game(&game.game_id)
            .is_some_and(|g| g.is_in_progress());
        if !unfinished {
            continue;
        }
        let minutes = minutes_between(game.last_active_date, now);
        if minutes >= thresholds.game_inactive_thresh_min {
            handler.handle_game_inactive_event(&game.game_id)?;
            report.inactive += 1;
        } else if minutes >= thresholds.game_idle_thresh_min
            && game.activity_state == ActivityState::Active
        {
            handler.handle_game_idle_event(&game.game_id)?;
            report.idle += 1;
        }
    }
    Ok(report)
}

fn obsolete_games(handler: &mut EventHandler<'_>) -> SweepReport {
    let retention = handler.config().thresholds.game_retention_thresh_min;
    let now = handler.manager().now();
    let mut report = SweepReport::default();

    for game in handler.manager().lookup_game_completion() {
        if minutes_between(game.completed_date, now) >= retention {
            handler.handle_game_obsolete_event(&game.game_id);
            report.obsolete += 1;
        }
    }
    report
}

/// Owns the four sweep tasks.
#[derive(Debug)]
pub struct ConsistencyScheduler {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsistencyScheduler {
    /// Spawn one task per sweep. Cancelling `token` (or calling
    /// [`ConsistencyScheduler::shutdown`]) stops them all.
    pub fn start(dispatcher: Dispatcher, schedules: &SweepSchedules, token: CancellationToken) -> Self {
        let tasks = Sweep::ALL
            .into_iter()
            .map(|sweep| {
                tokio::spawn(run_sweep_service(
                    dispatcher.clone(),
                    sweep,
                    sweep.schedule(schedules),
                    token.clone(),
                ))
            })
            .collect();
        Self { token, tasks }
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Sweep task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_sweep_service(
    dispatcher: Dispatcher,
    sweep: Sweep,
    schedule: SweepSchedule,
    cancellation_token: CancellationToken,
) {
    info!(
        "Starting {} sweep: every {}s after {}s",
        sweep.name(),
        schedule.period_secs,
        schedule.delay_secs
    );

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            info!("{} sweep shutting down", sweep.name());
            return;
        }
        _ = tokio::time::sleep(schedule.delay()) => {}
    }

    let mut interval = tokio::time::interval(schedule.period().max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("{} sweep shutting down", sweep.name());
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = dispatcher.sweep(sweep).await {
                    error!("Failed to run {} sweep: {}", sweep.name(), e);
                }
            }
        }
    }
}
