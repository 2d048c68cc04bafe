//! Request and event handling.
//!
//! An [`EventHandler`] borrows the [`StateManager`] for the length of one
//! critical section. Every `handle_*_request` validates a client request and
//! raises events; every `handle_*_event` applies one state transition and
//! queues whatever notifications it implies. Nothing here performs I/O.
//!
//! Entities are always addressed by id and re-resolved on each step, since an
//! earlier step in the same request may have changed or deleted them.

use tracing::{info, warn};

use super::message::{Notification, Request};
use super::queue::TaskQueue;
use crate::config::ServerConfig;
use crate::error::{FailureReason, ProcessingError, Result};
use crate::state::engine::MAX_PLAYERS;
use crate::state::{
    ActivityState, AdvertiseGame, CancelledReason, GameId, Move, PlayerId, PlayerState,
    PlayerType, StateManager, TrackedGame, TrackedPlayer, WebsocketId,
};

/// History entries included in each game state change.
const HISTORY_ENTRIES: usize = 10;

/// The sender of a request, resolved while the lock is held.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub websocket: WebsocketId,
    pub player_id: PlayerId,
    pub handle: String,
    pub game_id: Option<GameId>,
}

impl RequestContext {
    fn rejected(&self, reason: FailureReason) -> ProcessingError {
        ProcessingError::rejected(reason, Some(&self.handle))
    }

    fn rejected_with_comment(&self, reason: FailureReason, comment: &str) -> ProcessingError {
        ProcessingError::rejected_with_comment(reason, Some(self.handle.as_str()), comment)
    }

    fn require_game(&self) -> Result<&GameId> {
        self.game_id
            .as_ref()
            .ok_or_else(|| self.rejected(FailureReason::NotPlaying))
    }
}

/// How a participant left a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Quit,
    Disconnected,
}

pub struct EventHandler<'a> {
    manager: &'a mut StateManager,
    config: &'a ServerConfig,
    queue: TaskQueue,
}

impl<'a> EventHandler<'a> {
    pub fn new(manager: &'a mut StateManager, config: &'a ServerConfig) -> Self {
        Self {
            manager,
            config,
            queue: TaskQueue::new(),
        }
    }

    pub fn manager(&self) -> &StateManager {
        &*self.manager
    }

    pub fn config(&self) -> &ServerConfig {
        self.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn into_queue(self) -> TaskQueue {
        self.queue
    }

    // Lookups that must succeed

    fn game(&self, game_id: &GameId) -> Result<&TrackedGame> {
        self.manager
            .lookup_game(game_id)
            .ok_or_else(|| ProcessingError::internal("Unknown game"))
    }

    fn game_mut(&mut self, game_id: &GameId) -> Result<&mut TrackedGame> {
        self.manager
            .lookup_game_mut(game_id)
            .ok_or_else(|| ProcessingError::internal("Unknown game"))
    }

    fn player(&self, player_id: &PlayerId) -> Result<&TrackedPlayer> {
        self.manager
            .lookup_player(player_id)
            .ok_or_else(|| ProcessingError::internal("Unknown player"))
    }

    fn player_mut(&mut self, player_id: &PlayerId) -> Result<&mut TrackedPlayer> {
        self.manager
            .lookup_player_mut(player_id)
            .ok_or_else(|| ProcessingError::internal("Unknown player"))
    }

    fn handle_of(&self, player_id: &PlayerId) -> Result<String> {
        Ok(self.player(player_id)?.handle().to_string())
    }

    /// Registered humans still attached to the game.
    fn current_players(&self, game_id: &GameId) -> Vec<PlayerId> {
        self.manager
            .lookup_game_players(game_id)
            .into_iter()
            .filter(|p| p.game_id.as_ref() == Some(game_id))
            .map(|p| p.player_id().clone())
            .collect()
    }

    fn websockets_for(&self, players: &[PlayerId]) -> Vec<WebsocketId> {
        players
            .iter()
            .filter_map(|id| self.manager.lookup_player(id)?.websocket)
            .collect()
    }

    fn notify_players(&mut self, notification: Notification, players: &[PlayerId]) {
        let destinations = self.websockets_for(players);
        self.queue.message(notification, destinations);
    }

    fn notify_player(&mut self, notification: Notification, player_id: &PlayerId) {
        self.notify_players(notification, std::slice::from_ref(player_id));
    }

    fn notify_game(&mut self, notification: Notification, game_id: &GameId) {
        let players = self.current_players(game_id);
        self.notify_players(notification, &players);
    }

    // Requests

    /// Handle one request. Every request except registration must carry the
    /// id of a registered player.
    pub fn handle_request(
        &mut self,
        websocket: WebsocketId,
        player_id: Option<&PlayerId>,
        request: Request,
    ) -> Result<()> {
        match request {
            Request::RegisterPlayer { handle } => {
                self.handle_register_player_request(websocket, &handle)
            }
            Request::ReregisterPlayer => {
                let request = self.request_context(websocket, player_id, true)?;
                self.handle_reregister_player_request(&request)
            }
            Request::UnregisterPlayer => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_unregister_player_request(&request)
            }
            Request::ListPlayers => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_list_players_request(&request)
            }
            Request::AdvertiseGame(context) => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_advertise_game_request(&request, &context)
            }
            Request::ListAvailableGames => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_list_available_games_request(&request)
            }
            Request::JoinGame { game_id } => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_join_game_request(&request, &game_id)
            }
            Request::QuitGame => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_quit_game_request(&request)
            }
            Request::StartGame => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_start_game_request(&request)
            }
            Request::CancelGame => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_cancel_game_request(&request)
            }
            Request::ExecuteMove { move_id } => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_execute_move_request(&request, &move_id)
            }
            Request::OptimalMove => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_optimal_move_request(&request)
            }
            Request::RetrieveGameState => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_retrieve_game_state_request(&request)
            }
            Request::SendMessage {
                message,
                recipient_handles,
            } => {
                let request = self.request_context(websocket, player_id, false)?;
                self.handle_send_message_request(&request, &message, &recipient_handles)
            }
        }
    }

    /// Resolve the sending player and mark them (and their websocket) active.
    ///
    /// A player whose websocket has gone away may only reregister; anything
    /// else would have nowhere to send its response.
    fn request_context(
        &mut self,
        websocket: WebsocketId,
        player_id: Option<&PlayerId>,
        reregister: bool,
    ) -> Result<RequestContext> {
        let invalid = || ProcessingError::rejected(FailureReason::InvalidPlayer, None);
        let player_id = player_id.ok_or_else(invalid)?;
        let player = self.manager.lookup_player(player_id).ok_or_else(invalid)?;
        let handle = player.handle().to_string();
        if player.websocket.is_none() && !reregister {
            return Err(ProcessingError::rejected_with_comment(
                FailureReason::InvalidPlayer,
                Some(handle.as_str()),
                "Player is disconnected and must reregister",
            ));
        }
        let game_id = player
            .game_id
            .clone()
            .filter(|id| self.manager.lookup_game(id).is_some());

        self.manager.mark_active(player_id)?;
        Ok(RequestContext {
            websocket,
            player_id: player_id.clone(),
            handle,
            game_id,
        })
    }

    pub fn handle_register_player_request(&mut self, websocket: WebsocketId, handle: &str) -> Result<()> {
        info!("Request - REGISTER PLAYER - {} on {}", handle, websocket);
        if handle.trim().is_empty() {
            return Err(ProcessingError::rejected_with_comment(
                FailureReason::InvalidRequest,
                None,
                "Handle must not be empty",
            ));
        }
        if self.manager.get_registered_player_count() >= self.config.limits.registered_player_limit {
            return Err(ProcessingError::rejected(FailureReason::UserLimit, Some(handle)));
        }
        self.handle_player_registered_event(websocket, handle)?;
        Ok(())
    }

    fn handle_reregister_player_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - REREGISTER PLAYER - {}", request.handle);
        self.handle_player_reregistered_event(&request.player_id, request.websocket)
    }

    fn handle_unregister_player_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - UNREGISTER PLAYER - {}", request.handle);
        self.handle_player_unregistered_event(&request.player_id, request.game_id.as_ref())
    }

    fn handle_list_players_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - LIST PLAYERS - {}", request.handle);
        self.handle_registered_players_event(&request.player_id);
        Ok(())
    }

    fn handle_advertise_game_request(
        &mut self,
        request: &RequestContext,
        context: &AdvertiseGame,
    ) -> Result<()> {
        info!("Request - ADVERTISE GAME - {}", request.handle);
        if request.game_id.is_some() {
            return Err(request.rejected(FailureReason::AlreadyPlaying));
        }
        if self.manager.get_total_game_count() >= self.config.limits.total_game_limit {
            return Err(request.rejected(FailureReason::GameLimit));
        }
        if context.name.trim().is_empty() {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidRequest,
                "Game name must not be empty",
            ));
        }
        if !(2..=MAX_PLAYERS).contains(&context.players) {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidRequest,
                "Games must have between 2 and 4 players",
            ));
        }
        self.handle_game_advertised_event(&request.player_id, context)
    }

    fn handle_list_available_games_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - LIST AVAILABLE GAMES - {}", request.handle);
        self.handle_available_games_event(&request.player_id)
    }

    fn handle_join_game_request(&mut self, request: &RequestContext, game_id: &GameId) -> Result<()> {
        info!("Request - JOIN GAME - {} for {}", request.handle, game_id);
        if request.game_id.is_some() {
            return Err(request.rejected(FailureReason::AlreadyPlaying));
        }
        let available = self
            .manager
            .lookup_game(game_id)
            .is_some_and(|g| g.is_available(&request.handle) && !g.is_fully_joined());
        if !available {
            return Err(request.rejected(FailureReason::InvalidGame));
        }
        self.handle_game_joined_event(&request.player_id, game_id)
    }

    fn handle_quit_game_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - QUIT GAME - {} quit {:?}", request.handle, request.game_id);
        let game_id = request.require_game()?;
        let game = self.game(game_id)?;
        if !game.is_in_progress() {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidGame,
                "Game is not in progress",
            ));
        }
        if game.advertiser_handle == request.handle {
            return Err(request.rejected(FailureReason::AdvertiserMayNotQuit));
        }
        self.handle_game_player_quit_event(&request.player_id, game_id)
    }

    fn handle_start_game_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - START GAME - {} started {:?}", request.handle, request.game_id);
        let game_id = request.require_game()?;
        let game = self.game(game_id)?;
        if game.is_playing() {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidGame,
                "Game is already being played",
            ));
        }
        if game.advertiser_handle != request.handle {
            return Err(request.rejected(FailureReason::NotAdvertiser));
        }
        if self.manager.get_in_progress_game_count() >= self.config.limits.in_progress_game_limit {
            return Err(request.rejected(FailureReason::GameLimit));
        }
        self.handle_game_started_event(game_id)
    }

    fn handle_cancel_game_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - CANCEL GAME - {} cancelled {:?}", request.handle, request.game_id);
        let game_id = request.require_game()?;
        let game = self.game(game_id)?;
        if !game.is_in_progress() {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidGame,
                "Game is not in progress",
            ));
        }
        if game.advertiser_handle != request.handle {
            return Err(request.rejected(FailureReason::NotAdvertiser));
        }
        self.handle_game_cancelled_event(game_id, CancelledReason::Cancelled, None, true)
    }

    /// Common checks for requests that act on the sender's pending turn.
    fn require_pending_move(&self, request: &RequestContext) -> Result<GameId> {
        let game_id = request.require_game()?;
        let game = self.game(game_id)?;
        if !game.is_playing() {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidGame,
                "Game is not being played",
            ));
        }
        if !game.is_move_pending(&request.handle) {
            return Err(request.rejected(FailureReason::NoMovePending));
        }
        Ok(game_id.clone())
    }

    fn handle_execute_move_request(&mut self, request: &RequestContext, move_id: &str) -> Result<()> {
        info!(
            "Request - EXECUTE MOVE - {} for {:?}, move {}",
            request.handle, request.game_id, move_id
        );
        let game_id = self.require_pending_move(request)?;
        if !self.game(&game_id)?.is_legal_move(&request.handle, move_id) {
            return Err(request.rejected(FailureReason::IllegalMove));
        }
        self.handle_game_player_move_event(&request.player_id, &game_id, move_id)
    }

    fn handle_optimal_move_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - OPTIMAL MOVE - {} for {:?}", request.handle, request.game_id);
        let game_id = self.require_pending_move(request)?;
        let now = self.manager.now();
        self.game_mut(&game_id)?.mark_active(now);
        self.handle_game_programmatic_move_event(&request.handle, &game_id)
    }

    fn handle_retrieve_game_state_request(&mut self, request: &RequestContext) -> Result<()> {
        info!("Request - RETRIEVE GAME - {} for {:?}", request.handle, request.game_id);
        let game_id = request.require_game()?;
        if !self.game(game_id)?.is_playing() {
            return Err(request.rejected_with_comment(
                FailureReason::InvalidGame,
                "Game is not being played",
            ));
        }
        self.handle_game_state_change_event(game_id, Some(&request.player_id))
    }

    fn handle_send_message_request(
        &mut self,
        request: &RequestContext,
        message: &str,
        recipient_handles: &[String],
    ) -> Result<()> {
        info!(
            "Request - SEND MESSAGE - {} sending {} bytes to {} recipients",
            request.handle,
            message.len(),
            recipient_handles.len()
        );
        self.handle_player_message_received_event(&request.handle, recipient_handles, message);
        Ok(())
    }

    // Server and websocket events

    /// Notify every connection and cancel every game still in progress.
    pub fn handle_server_shutdown_event(&mut self) -> Result<()> {
        info!("Event - SERVER SHUTDOWN");
        let websockets = self.manager.lookup_all_websockets();
        self.queue.message(Notification::ServerShutdown, websockets);
        let games: Vec<GameId> = self
            .manager
            .lookup_in_progress_games()
            .into_iter()
            .map(|g| g.game_id.clone())
            .collect();
        for game_id in games {
            self.handle_game_cancelled_event(&game_id, CancelledReason::Shutdown, None, false)?;
        }
        Ok(())
    }

    pub fn handle_websocket_connected_event(&mut self, websocket: WebsocketId) -> Result<()> {
        info!("Event - WEBSOCKET CONNECTED - {}", websocket);
        if self.manager.get_websocket_count() >= self.config.limits.websocket_limit {
            return Err(ProcessingError::rejected(FailureReason::WebsocketLimit, None));
        }
        self.manager.track_websocket(websocket)
    }

    /// Disconnect every player on the websocket, then stop tracking it.
    pub fn handle_websocket_disconnected_event(&mut self, websocket: WebsocketId) -> Result<()> {
        info!("Event - WEBSOCKET DISCONNECTED - {}", websocket);
        let players: Vec<PlayerId> = self
            .manager
            .lookup_players_for_websocket(websocket)
            .into_iter()
            .map(|p| p.player_id().clone())
            .collect();
        // Every player is disconnected and the websocket dropped even if one
        // of the departures fails; the first failure is reported.
        let mut first_error = None;
        for player_id in players {
            if let Err(e) = self.handle_player_disconnected_event(&player_id) {
                warn!("Failed to disconnect player on {}: {}", websocket, e);
                first_error.get_or_insert(e);
            }
        }
        self.manager.delete_websocket(websocket);
        first_error.map_or(Ok(()), Err)
    }

    pub fn handle_websocket_idle_event(&mut self, websocket: WebsocketId) {
        info!("Event - WEBSOCKET IDLE - {}", websocket);
        if let Some(ws) = self.manager.lookup_websocket_mut(websocket) {
            if ws.activity_state != ActivityState::Idle {
                ws.mark_idle();
                self.queue.message(Notification::WebsocketIdle, [websocket]);
            }
        }
    }

    /// Close the websocket. The resulting disconnect is handled separately.
    pub fn handle_websocket_inactive_event(&mut self, websocket: WebsocketId) {
        info!("Event - WEBSOCKET INACTIVE - {}", websocket);
        if let Some(ws) = self.manager.lookup_websocket_mut(websocket) {
            if ws.activity_state != ActivityState::Inactive {
                ws.mark_inactive();
                self.queue.message(Notification::WebsocketInactive, [websocket]);
                self.queue.disconnect(websocket);
            }
        }
    }

    // Player events

    pub fn handle_registered_players_event(&mut self, player_id: &PlayerId) {
        let players = self
            .manager
            .lookup_all_players()
            .into_iter()
            .map(|p| p.to_registered_player())
            .collect();
        self.notify_player(Notification::RegisteredPlayers { players }, player_id);
    }

    pub fn handle_available_games_event(&mut self, player_id: &PlayerId) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!("Event - AVAILABLE GAMES - {}", handle);
        let games = self
            .manager
            .lookup_available_games(&handle)
            .into_iter()
            .map(|g| g.to_advertised_game())
            .collect();
        self.notify_player(Notification::AvailableGames { games }, player_id);
        Ok(())
    }

    pub fn handle_player_registered_event(
        &mut self,
        websocket: WebsocketId,
        handle: &str,
    ) -> Result<PlayerId> {
        info!("Event - PLAYER REGISTERED - {} on {}", handle, websocket);
        let player_id = self.manager.track_player(websocket, handle)?;
        self.queue.message(
            Notification::PlayerRegistered {
                player_id: player_id.clone(),
                handle: handle.to_string(),
            },
            [websocket],
        );
        Ok(player_id)
    }

    pub fn handle_player_reregistered_event(
        &mut self,
        player_id: &PlayerId,
        websocket: WebsocketId,
    ) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!("Event - PLAYER REREGISTERED - {} on {}", handle, websocket);
        self.manager.retrack_player(player_id, websocket)?;
        self.notify_player(
            Notification::PlayerRegistered {
                player_id: player_id.clone(),
                handle,
            },
            player_id,
        );
        Ok(())
    }

    /// Leave any game, then forget the player.
    pub fn handle_player_unregistered_event(
        &mut self,
        player_id: &PlayerId,
        game_id: Option<&GameId>,
    ) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!("Event - PLAYER UNREGISTERED - {} with game {:?}", handle, game_id);
        self.player_mut(player_id)?.mark_quit();
        if let Some(game_id) = game_id {
            let comment = format!("Player {} unregistered", handle);
            self.handle_game_player_left_event(&handle, game_id, comment, Departure::Quit)?;
        }
        self.notify_player(Notification::PlayerUnregistered { handle }, player_id);
        self.manager.delete_player(player_id);
        Ok(())
    }

    pub fn handle_player_disconnected_event(&mut self, player_id: &PlayerId) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!("Event - PLAYER DISCONNECTED - {}", handle);
        let game_id = self
            .manager
            .lookup_game_for_player(player_id)
            .map(|g| g.game_id.clone());
        self.player_mut(player_id)?.mark_disconnected();
        if let Some(game_id) = game_id {
            let comment = format!("Player {} disconnected", handle);
            self.handle_game_player_left_event(&handle, &game_id, comment, Departure::Disconnected)?;
        }
        Ok(())
    }

    pub fn handle_player_idle_event(&mut self, player_id: &PlayerId) -> Result<()> {
        let player = self.player_mut(player_id)?;
        info!("Event - PLAYER IDLE - {}", player.handle());
        if player.activity_state != ActivityState::Idle {
            player.mark_idle();
            let handle = player.handle().to_string();
            self.notify_player(Notification::PlayerIdle { handle }, player_id);
        }
        Ok(())
    }

    /// Unregister the player. Their websocket is left open since other
    /// players may share it; it ages out on its own once empty.
    pub fn handle_player_inactive_event(&mut self, player_id: &PlayerId) -> Result<()> {
        let player = self.player_mut(player_id)?;
        info!("Event - PLAYER INACTIVE - {}", player.handle());
        if player.activity_state != ActivityState::Inactive {
            player.mark_inactive();
            let handle = player.handle().to_string();
            let game_id = self
                .manager
                .lookup_game_for_player(player_id)
                .map(|g| g.game_id.clone());
            self.notify_player(Notification::PlayerInactive { handle }, player_id);
            self.handle_player_unregistered_event(player_id, game_id.as_ref())?;
        }
        Ok(())
    }

    pub fn handle_player_message_received_event(
        &mut self,
        sender_handle: &str,
        recipient_handles: &[String],
        message: &str,
    ) {
        info!(
            "Event - PLAYER MESSAGE RECEIVED - {} sending {} bytes to {} recipients",
            sender_handle,
            message.len(),
            recipient_handles.len()
        );
        let destinations: Vec<WebsocketId> = recipient_handles
            .iter()
            .filter_map(|handle| self.manager.lookup_player_by_handle(handle)?.websocket)
            .collect();
        self.queue.message(
            Notification::PlayerMessageReceived {
                sender_handle: sender_handle.to_string(),
                recipient_handles: recipient_handles.to_vec(),
                message: message.to_string(),
            },
            destinations,
        );
    }

    // Game events

    /// Track a new game and join the advertiser to it.
    pub fn handle_game_advertised_event(
        &mut self,
        player_id: &PlayerId,
        context: &AdvertiseGame,
    ) -> Result<()> {
        let game_id = self.manager.track_game(player_id, context)?;
        info!("Event - GAME ADVERTISED - {}", game_id);
        self.handle_game_joined_event(player_id, &game_id)?;
        self.handle_game_invitation_event(&game_id)?;
        // summarised after the join so the advertiser counts as joined
        let game = self.game(&game_id)?.to_advertised_game();
        self.notify_player(Notification::GameAdvertised { game }, player_id);
        Ok(())
    }

    pub fn handle_game_invitation_event(&mut self, game_id: &GameId) -> Result<()> {
        info!("Event - GAME INVITATION - {}", game_id);
        let game = self.game(game_id)?;
        if game.invited_handles.is_empty() {
            return Ok(());
        }
        let destinations: Vec<WebsocketId> = game
            .invited_handles
            .iter()
            .filter_map(|handle| self.manager.lookup_player_by_handle(handle)?.websocket)
            .collect();
        let game = game.to_advertised_game();
        self.queue.message(Notification::GameInvitation { game }, destinations);
        Ok(())
    }

    /// Join a player to a game, starting it once every seat is taken.
    pub fn handle_game_joined_event(&mut self, player_id: &PlayerId, game_id: &GameId) -> Result<()> {
        let player = self.player(player_id)?;
        info!("Event - GAME JOINED - {} joined {}", player.handle(), game_id);
        if player.player_state != PlayerState::Waiting {
            return Err(ProcessingError::illegal_state());
        }
        let handle = player.handle().to_string();

        let now = self.manager.now();
        let game = self.game_mut(game_id)?;
        game.mark_joined(&handle)?;
        game.mark_active(now);
        let joined = Notification::GameJoined {
            player_handle: handle,
            game_id: game.game_id.clone(),
            name: game.name.clone(),
            mode: game.mode,
            advertiser_handle: game.advertiser_handle.clone(),
        };
        let fully_joined = game.is_fully_joined();

        self.player_mut(player_id)?.mark_joined(game_id);
        self.notify_player(joined, player_id);
        self.handle_game_player_change_event(game_id, "Player joined game")?;

        if fully_joined {
            if self.manager.get_in_progress_game_count() >= self.config.limits.in_progress_game_limit {
                // The join itself succeeded; the advertiser can start the game later.
                warn!("Game limit reached, so game {} will not be auto-started", game_id);
            } else {
                self.handle_game_started_event(game_id)?;
            }
        }
        Ok(())
    }

    pub fn handle_game_started_event(&mut self, game_id: &GameId) -> Result<()> {
        info!("Event - GAME STARTED - {}", game_id);
        let now = self.manager.now();
        let game = self.game_mut(game_id)?;
        game.mark_started(now)?;
        game.mark_active(now);

        let players = self.current_players(game_id);
        for player_id in &players {
            self.player_mut(player_id)?.mark_playing();
        }
        self.notify_players(
            Notification::GameStarted {
                game_id: game_id.clone(),
            },
            &players,
        );
        self.handle_game_player_change_event(game_id, "Game started")?;
        self.handle_game_state_change_event(game_id, None)?;
        self.handle_game_next_turn_event(game_id)
    }

    /// Cancel a game and release its players. With `notify` unset nobody is
    /// told, which is what shutdown wants.
    pub fn handle_game_cancelled_event(
        &mut self,
        game_id: &GameId,
        reason: CancelledReason,
        comment: Option<String>,
        notify: bool,
    ) -> Result<()> {
        info!(
            "Event - GAME CANCELLED - {} for {:?} ({:?})",
            game_id, reason, comment
        );
        let players = self.current_players(game_id);
        let destinations = self.websockets_for(&players);

        let now = self.manager.now();
        self.game_mut(game_id)?
            .mark_cancelled(reason, comment.clone(), now)?;
        for player_id in &players {
            self.player_mut(player_id)?.mark_quit();
        }

        if notify {
            self.queue.message(
                Notification::GameCancelled {
                    game_id: game_id.clone(),
                    reason,
                    comment,
                },
                destinations,
            );
            self.handle_game_state_change_event(game_id, None)?;
        }
        Ok(())
    }

    pub fn handle_game_completed_event(
        &mut self,
        game_id: &GameId,
        winner: Option<String>,
        comment: Option<String>,
    ) -> Result<()> {
        info!("Event - GAME COMPLETED - {} ({:?})", game_id, comment);
        let players = self.current_players(game_id);
        let destinations = self.websockets_for(&players);

        let now = self.manager.now();
        self.game_mut(game_id)?.mark_completed(comment.clone(), now)?;
        for player_id in &players {
            self.player_mut(player_id)?.mark_quit();
        }

        self.queue.message(
            Notification::GameCompleted {
                game_id: game_id.clone(),
                winner,
                comment,
            },
            destinations,
        );
        self.handle_game_state_change_event(game_id, None)
    }

    pub fn handle_game_idle_event(&mut self, game_id: &GameId) -> Result<()> {
        info!("Event - GAME IDLE - {}", game_id);
        let game = self.game_mut(game_id)?;
        if game.activity_state != ActivityState::Idle {
            game.mark_idle();
            self.notify_game(
                Notification::GameIdle {
                    game_id: game_id.clone(),
                },
                game_id,
            );
        }
        Ok(())
    }

    pub fn handle_game_inactive_event(&mut self, game_id: &GameId) -> Result<()> {
        info!("Event - GAME INACTIVE - {}", game_id);
        let game = self.game_mut(game_id)?;
        if game.activity_state != ActivityState::Inactive {
            game.mark_inactive();
            self.notify_game(
                Notification::GameInactive {
                    game_id: game_id.clone(),
                },
                game_id,
            );
            self.handle_game_cancelled_event(game_id, CancelledReason::Inactive, None, true)?;
        }
        Ok(())
    }

    pub fn handle_game_obsolete_event(&mut self, game_id: &GameId) {
        info!("Event - GAME OBSOLETE - {}", game_id);
        self.manager.delete_game(game_id);
    }

    pub fn handle_game_player_quit_event(&mut self, player_id: &PlayerId, game_id: &GameId) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!("Event - GAME PLAYER QUIT - {} quit {}", handle, game_id);
        let now = self.manager.now();
        self.game_mut(game_id)?.mark_active(now);
        self.player_mut(player_id)?.mark_quit();
        self.notify_player(
            Notification::GamePlayerQuit {
                handle: handle.clone(),
                game_id: game_id.clone(),
            },
            player_id,
        );
        let comment = format!("Player {} quit", handle);
        self.handle_game_player_left_event(&handle, game_id, comment, Departure::Quit)
    }

    /// A participant is gone. The advertiser leaving cancels the game, as
    /// does the game dropping below two available participants. If it was
    /// the leaver's turn, a move is made on their behalf.
    fn handle_game_player_left_event(
        &mut self,
        handle: &str,
        game_id: &GameId,
        comment: String,
        departure: Departure,
    ) -> Result<()> {
        info!("Event - GAME PLAYER LEFT - {} left {} ('{}')", handle, game_id, comment);
        if self.game(game_id)?.advertiser_handle == handle {
            return self.handle_game_cancelled_event(
                game_id,
                CancelledReason::Cancelled,
                Some(comment),
                true,
            );
        }

        let game = self.game_mut(game_id)?;
        match departure {
            Departure::Quit => game.mark_quit(handle)?,
            Departure::Disconnected => game.mark_player_disconnected(handle)?,
        }
        let viable = game.is_viable();
        let pending = game.is_playing() && game.is_move_pending(handle);

        self.handle_game_player_change_event(game_id, &comment)?;
        if !viable {
            self.handle_game_cancelled_event(game_id, CancelledReason::NotViable, Some(comment), true)
        } else if pending {
            self.handle_game_programmatic_move_event(handle, game_id)
        } else {
            Ok(())
        }
    }

    pub fn handle_game_player_move_event(
        &mut self,
        player_id: &PlayerId,
        game_id: &GameId,
        move_id: &str,
    ) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!("Event - GAME PLAYER MOVE - {} for {}, move {}", handle, game_id, move_id);
        self.handle_game_move_event(&handle, game_id, move_id)
    }

    pub fn handle_game_programmatic_move_event(&mut self, handle: &str, game_id: &GameId) -> Result<()> {
        info!("Event - GAME PROGRAMMATIC MOVE - {} for {}", handle, game_id);
        let chosen = self.game(game_id)?.suggest_move(handle)?;
        self.handle_game_move_event(handle, game_id, &chosen.id)
    }

    pub fn handle_game_move_event(&mut self, handle: &str, game_id: &GameId, move_id: &str) -> Result<()> {
        if !self.apply_move(handle, game_id, move_id)? {
            self.handle_game_next_turn_event(game_id)?;
        }
        Ok(())
    }

    /// Execute one move and report it. Returns whether the game completed.
    fn apply_move(&mut self, handle: &str, game_id: &GameId, move_id: &str) -> Result<bool> {
        info!("Event - GAME MOVE - {} for {}, move {}", handle, game_id, move_id);
        let now = self.manager.now();
        let game = self.game_mut(game_id)?;
        game.mark_active(now);
        let result = game.execute_move(handle, move_id, now)?;

        self.handle_game_state_change_event(game_id, None)?;
        if result.completed {
            self.handle_game_completed_event(game_id, result.winner, result.comment)?;
        }
        Ok(result.completed)
    }

    /// Prompt the next human mover. Turns belonging to programmatic players,
    /// or to humans who are no longer playing, are taken automatically until
    /// a human is due or the game ends.
    pub fn handle_game_next_turn_event(&mut self, game_id: &GameId) -> Result<()> {
        loop {
            info!("Event - GAME NEXT TURN - {}", game_id);
            let (handle, player_type) = self.game(game_id)?.get_next_turn()?;

            if player_type == PlayerType::Human {
                let mover = self
                    .manager
                    .lookup_player_by_handle(&handle)
                    .filter(|p| {
                        p.player_state == PlayerState::Playing && p.game_id.as_ref() == Some(game_id)
                    })
                    .map(|p| p.player_id().clone());
                if let Some(player_id) = mover {
                    let moves = self.game(game_id)?.get_legal_moves(&handle)?;
                    self.handle_game_player_turn_event(&player_id, game_id, moves)?;
                    return Ok(());
                }
            }

            info!("Event - GAME PROGRAMMATIC MOVE - {} for {}", handle, game_id);
            let chosen = self.game(game_id)?.suggest_move(&handle)?;
            if self.apply_move(&handle, game_id, &chosen.id)? {
                return Ok(());
            }
        }
    }

    pub fn handle_game_player_change_event(&mut self, game_id: &GameId, comment: &str) -> Result<()> {
        info!("Event - GAME PLAYER CHANGE - {} ('{}')", game_id, comment);
        let players = self.game(game_id)?.get_game_players();
        self.notify_game(
            Notification::GamePlayerChange {
                game_id: game_id.clone(),
                comment: Some(comment.to_string()),
                players,
            },
            game_id,
        );
        Ok(())
    }

    /// Send each current player (or just `only`) their view of a game in play.
    pub fn handle_game_state_change_event(
        &mut self,
        game_id: &GameId,
        only: Option<&PlayerId>,
    ) -> Result<()> {
        info!("Event - GAME STATE CHANGE - {}", game_id);
        let now = self.manager.now();
        let game = self.game_mut(game_id)?;
        game.mark_active(now);
        if !game.is_playing() {
            return Ok(());
        }

        let players = match only {
            Some(player_id) => vec![player_id.clone()],
            None => self.current_players(game_id),
        };
        let recent_history = self.game(game_id)?.get_recent_history(HISTORY_ENTRIES)?;
        for player_id in players {
            let Some(player) = self.manager.lookup_player(&player_id) else {
                continue;
            };
            let websocket = player.websocket;
            let view = self.game(game_id)?.get_player_view(player.handle())?;
            self.queue.message(
                Notification::GameStateChange {
                    game_id: game_id.clone(),
                    view,
                    recent_history: recent_history.clone(),
                },
                websocket,
            );
        }
        Ok(())
    }

    pub fn handle_game_player_turn_event(
        &mut self,
        player_id: &PlayerId,
        game_id: &GameId,
        moves: Vec<Move>,
    ) -> Result<()> {
        let handle = self.handle_of(player_id)?;
        info!(
            "Event - GAME PLAYER TURN - {} for {} ({} moves)",
            handle,
            game_id,
            moves.len()
        );
        self.notify_player(
            Notification::GamePlayerTurn {
                handle,
                game_id: game_id.clone(),
                moves,
            },
            player_id,
        );
        Ok(())
    }
}
