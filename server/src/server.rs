//! The session server engine: authentication and admission, message
//! dispatch, the fixed-period tick driver, and termination with result
//! tokens.
//!
//! [`EngineCore`] holds everything both server flavors share; [`GameServer`]
//! is the "game" mode composition that archives ended sessions. The run loop
//! follows the select shape of the transport event loop: actions from the
//! queue on one arm, the tick interval on the other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, trace};
use serde_json::Value;
use signet_shared::{ConnectionId, MatchGroup, PlayerId, Session};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::queue::{Action, ActionReceiver, ActionSender};
use crate::registry::Registry;
use crate::session::{Delivery, SessionInstance};
use crate::token::{TokenCodec, TokenConfig};
use crate::transport::Transport;

/// Log a stats line every this many ticks.
const STATS_TICKS: u64 = 60;

/// State and behavior shared by the game and matchmaking engines.
pub(crate) struct EngineCore<S: Session, T: Transport> {
    pub(crate) config: EngineConfig,
    pub(crate) codec: TokenCodec,
    pub(crate) transport: Arc<T>,
    pub(crate) registry: Registry<S>,
    pub(crate) metrics: Arc<EngineMetrics>,
    actions: ActionSender,
    /// Matchmaking queues drop an entry once its last participant is gone;
    /// game sessions keep ticking with nobody connected.
    abandon_on_disconnect: bool,
}

impl<S: Session, T: Transport> EngineCore<S, T> {
    pub(crate) fn new(
        config: EngineConfig,
        tokens: &TokenConfig,
        transport: Arc<T>,
        actions: ActionSender,
        abandon_on_disconnect: bool,
    ) -> Arc<Self> {
        let metrics = actions.metrics();
        Arc::new(Self {
            config,
            codec: TokenCodec::new(tokens),
            transport,
            registry: Registry::new(Arc::clone(&metrics)),
            metrics,
            actions,
            abandon_on_disconnect,
        })
    }

    pub(crate) fn handle_action(&self, action: Action) {
        match action {
            Action::Open { conn } => trace!("connection {} opened", conn),
            Action::Close { conn } => self.handle_close(conn),
            Action::Message { conn, text } => {
                if let Err(err) = self.handle_message(conn, &text) {
                    match err {
                        EngineError::UnknownPlayer(_) => error!("{}", err),
                        _ => debug!("connection {}: {}", conn, err),
                    }
                }
            }
            // consumed by the run loops before dispatch
            Action::Shutdown => {}
        }
    }

    fn handle_message(&self, conn: ConnectionId, text: &str) -> Result<(), EngineError> {
        match self.registry.player_for(conn) {
            Some(player) => self.route_update(conn, player, text),
            None => self.admit(conn, text),
        }
    }

    /// First message on an unauthenticated connection: treat it as a connect
    /// token and resolve the session it names. Every failure here is a
    /// silent drop; the socket stays open for a retry.
    fn admit(&self, conn: ConnectionId, token: &str) -> Result<(), EngineError> {
        let claims = self.codec.verify(token)?;
        let (player, sid) = (claims.pid, claims.sid);

        // Ended session: replay the archived result and close.
        if let Some(result) = self.registry.archived_token(sid, player) {
            debug!("player {} reconnected to ended session {}", player, sid);
            if self.transport.send(conn, result).is_err() {
                debug!("could not replay archived result on connection {}", conn);
            }
            self.transport.close(conn, "session ended");
            return Ok(());
        }
        // An archived id never becomes a live session again, not even for a
        // player the archive holds no token for.
        if self.registry.is_archived(sid) {
            debug!("player {} presented ended session {}", player, sid);
            return Ok(());
        }

        // Live session: join it, evicting any redundant connection.
        if let Some(inst) = self.registry.session_by_id(sid) {
            if !inst.permits(player) {
                debug!("player {} is not a participant of session {}", player, sid);
                return Ok(());
            }
            match self.registry.session_of(player) {
                // rostered here but still indexed to another live session
                Some(existing) if !Arc::ptr_eq(&existing, &inst) => {
                    debug!(
                        "player {} is still in live session {}; dropping connect for {}",
                        player,
                        existing.id(),
                        sid
                    );
                    return Ok(());
                }
                Some(_) => {}
                // the index entry was ceded to an earlier session that has
                // since ended; restore it
                None => self.registry.index_player(player, Arc::clone(&inst)),
            }
            self.attach(conn, player, &inst);
            return Ok(());
        }

        // Fresh session: let the host factory judge the payload.
        let game = S::from_payload(&claims.data)?;
        let inst = Arc::new(SessionInstance::new(sid, game));
        if !inst.permits(player) {
            debug!(
                "player {} is missing from the roster of the session they presented",
                player
            );
            return Ok(());
        }
        if self.registry.session_of(player).is_some() {
            debug!(
                "player {} already has a live session; dropping connect for {}",
                player, sid
            );
            return Ok(());
        }
        self.registry.register(Arc::clone(&inst));
        info!(
            "session {} born with {} players",
            sid,
            inst.players().len()
        );
        self.attach(conn, player, &inst);
        Ok(())
    }

    fn attach(&self, conn: ConnectionId, player: PlayerId, inst: &Arc<SessionInstance<S>>) {
        let outcome = inst.connect(player, conn);
        if let Some(evicted) = outcome.evicted {
            debug!(
                "evicting redundant connection {} for player {}",
                evicted, player
            );
            self.registry.unbind(evicted);
            self.transport.close(evicted, "player connected again");
        }
        self.registry.bind(conn, player);
        info!(
            "player {} connected to session {} on connection {}",
            player,
            inst.id(),
            conn
        );
        self.deliver(inst, outcome.outgoing);
    }

    fn route_update(
        &self,
        conn: ConnectionId,
        player: PlayerId,
        text: &str,
    ) -> Result<(), EngineError> {
        let update: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                // drop this message only
                debug!("player {} sent invalid json: {}", player, e);
                return Ok(());
            }
        };
        let inst = self
            .registry
            .session_of(player)
            .ok_or(EngineError::UnknownPlayer(player))?;
        trace!("update from player {} on connection {}", player, conn);
        let outgoing = inst.player_update(player, &update);
        self.deliver(&inst, outgoing);
        Ok(())
    }

    fn handle_close(&self, conn: ConnectionId) {
        let Some(player) = self.registry.unbind(conn) else {
            trace!("connection {} closed before authenticating", conn);
            return;
        };
        let Some(inst) = self.registry.session_of(player) else {
            debug!(
                "connection {} for player {} closed after its session ended",
                conn, player
            );
            return;
        };
        let outgoing = inst.disconnect(player);
        info!("player {} disconnected from session {}", player, inst.id());
        self.deliver(&inst, outgoing);

        if self.abandon_on_disconnect && inst.connected_peers().is_empty() {
            debug!("queue entry {} abandoned", inst.id());
            self.registry.unregister(&inst);
        }
    }

    /// Send routed frames after the session lock has been released. A failed
    /// send silences the participant and enqueues the close so the normal
    /// disconnect path runs; the session itself continues.
    fn deliver(&self, inst: &Arc<SessionInstance<S>>, outgoing: Vec<Delivery>) {
        for delivery in outgoing {
            if self.transport.send(delivery.conn, delivery.text).is_err() {
                debug!(
                    "send to player {} on connection {} failed; marking disconnected",
                    delivery.player, delivery.conn
                );
                inst.mark_send_failed(delivery.player);
                self.actions.push(Action::Close {
                    conn: delivery.conn,
                });
            }
        }
    }

    /// Advance every live session by `delta_ms`, delivering what each emits,
    /// and report the ones that finished. With more than one tick worker the
    /// live list is chunked across that many tasks; sessions never share a
    /// lock, so chunks proceed independently.
    pub(crate) async fn tick_all(self: &Arc<Self>, delta_ms: u64) -> Vec<Arc<SessionInstance<S>>> {
        let live = self.registry.live_snapshot();
        if live.is_empty() {
            return Vec::new();
        }

        let workers = self.config.tick_workers.max(1);
        if workers == 1 || live.len() == 1 {
            let mut done = Vec::new();
            for inst in live {
                if self.tick_one(&inst, delta_ms) {
                    done.push(inst);
                }
            }
            return done;
        }

        let chunk_len = (live.len() + workers - 1) / workers;
        let mut tasks = Vec::with_capacity(workers);
        for chunk in live.chunks(chunk_len) {
            let batch = chunk.to_vec();
            let core = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut done = Vec::new();
                for inst in batch {
                    if core.tick_one(&inst, delta_ms) {
                        done.push(inst);
                    }
                }
                done
            }));
        }

        let mut done = Vec::new();
        for task in tasks {
            match task.await {
                Ok(part) => done.extend(part),
                Err(e) => error!("tick worker panicked: {}", e),
            }
        }
        done
    }

    fn tick_one(&self, inst: &Arc<SessionInstance<S>>, delta_ms: u64) -> bool {
        let outcome = inst.tick(delta_ms);
        self.deliver(inst, outcome.outgoing);
        outcome.done
    }

    /// Game-mode termination: sign a result token for every rostered player,
    /// file them in the archive, hand them to everyone still connected, and
    /// only then withdraw the record from the live registry.
    pub(crate) fn finalize_session(&self, inst: &Arc<SessionInstance<S>>) {
        let sid = inst.id();
        info!("session {} ended", sid);

        let mut tokens = HashMap::new();
        for player in inst.players() {
            let data = inst.result_for(player);
            match self
                .codec
                .mint(player, sid, data, self.config.token_ttl)
            {
                Ok(token) => {
                    tokens.insert(player, token);
                }
                Err(e) => error!("failed to sign result token for player {}: {}", player, e),
            }
        }

        let expires_at = Instant::now() + self.config.archive_retention;
        self.registry.archive(sid, tokens.clone(), expires_at);

        for (player, conn) in inst.connected_peers() {
            if let Some(token) = tokens.get(&player) {
                if self.transport.send(conn, token.clone()).is_err() {
                    debug!("could not deliver result token to player {}", player);
                }
            }
            self.transport.close(conn, "game ended");
            self.registry.unbind(conn);
        }

        self.registry.unregister(inst);
        debug!("session {} archived", sid);
    }

    /// Matchmaking withdrawal: sign the host's cancel payload for everyone
    /// still connected to the entry and drop it from the queue.
    pub(crate) fn finalize_cancelled(&self, inst: &Arc<SessionInstance<S>>, payload: Value) {
        let sid = inst.id();
        info!("queue entry {} cancelled", sid);
        for (player, conn) in inst.connected_peers() {
            match self
                .codec
                .mint(player, sid, payload.clone(), self.config.token_ttl)
            {
                Ok(token) => {
                    if self.transport.send(conn, token).is_err() {
                        debug!("could not deliver cancel token to player {}", player);
                    }
                }
                Err(e) => error!("failed to sign cancel token for player {}: {}", player, e),
            }
            self.transport.close(conn, "cancelled");
            self.registry.unbind(conn);
        }
        self.registry.unregister(inst);
    }

    /// Announce one match: every connected player of every grouped entry
    /// receives a session token naming the new session, then their queue
    /// connection closes.
    pub(crate) fn launch_group(&self, group: &MatchGroup) {
        info!(
            "matched session {} from {} queue entries",
            group.session,
            group.participants.len()
        );
        for sid in &group.participants {
            let Some(inst) = self.registry.session_by_id(*sid) else {
                debug!("matched entry {} is no longer queued", sid);
                continue;
            };
            for (player, conn) in inst.connected_peers() {
                match self.codec.mint(
                    player,
                    group.session,
                    group.payload.clone(),
                    self.config.token_ttl,
                ) {
                    Ok(token) => {
                        if self.transport.send(conn, token).is_err() {
                            debug!("could not deliver session token to player {}", player);
                        }
                    }
                    Err(e) => {
                        error!("failed to sign session token for player {}: {}", player, e)
                    }
                }
                self.transport.close(conn, "matched");
                self.registry.unbind(conn);
            }
            self.registry.unregister(&inst);
        }
    }

    pub(crate) fn log_stats(&self) {
        let snap = self.metrics.snapshot();
        debug!(
            "stats: {} live sessions, {} archived, {} actions queued",
            snap.live_sessions, snap.archived_sessions, snap.queued_actions
        );
    }
}

/// The top-level engine for "game" mode, generic over the host's session
/// type and the transport.
pub struct GameServer<S: Session, T: Transport> {
    core: Arc<EngineCore<S, T>>,
    actions: ActionReceiver,
}

impl<S: Session, T: Transport> GameServer<S, T> {
    /// Wire the engine to a transport and an action queue. The same
    /// `ActionSender` handed here must feed the transport, so events and
    /// engine-internal closes share one FIFO.
    pub fn new(
        config: EngineConfig,
        tokens: &TokenConfig,
        transport: Arc<T>,
        actions_tx: ActionSender,
        actions_rx: ActionReceiver,
    ) -> Self {
        Self {
            core: EngineCore::new(config, tokens, transport, actions_tx, false),
            actions: actions_rx,
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.core.metrics)
    }

    /// Main loop: drain connection events and drive the tick. Returns after
    /// a shutdown action; in-flight sessions are abandoned without result
    /// tokens.
    pub async fn run(&mut self) {
        let mut ticks = interval(self.core.config.tick_period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();
        let mut tick_count: u64 = 0;

        info!(
            "session server running, tick period {:?}",
            self.core.config.tick_period
        );

        loop {
            tokio::select! {
                action = self.actions.recv() => {
                    match action {
                        Some(Action::Shutdown) | None => {
                            info!("session server shutting down");
                            break;
                        }
                        Some(action) => self.core.handle_action(action),
                    }
                }
                _ = ticks.tick() => {
                    let now = Instant::now();
                    let delta_ms = now.duration_since(last_tick).as_millis() as u64;
                    last_tick = now;

                    let done = self.core.tick_all(delta_ms).await;
                    for inst in done {
                        self.core.finalize_session(&inst);
                    }
                    self.core.registry.purge_archive(Instant::now());

                    tick_count += 1;
                    if tick_count % STATS_TICKS == 0 {
                        self.core.log_stats();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::action_queue;
    use crate::session::testutil::EchoGame;
    use crate::transport::testutil::{RecordingTransport, SentFrame};
    use serde_json::json;
    use signet_shared::SessionId;
    use std::time::Duration;

    fn token_config() -> TokenConfig {
        TokenConfig::hs256(b"secret".to_vec(), "auth", "game-server")
    }

    /// A codec playing the external authenticator's role.
    fn auth_codec() -> TokenCodec {
        TokenCodec::new(&TokenConfig::hs256(b"secret".to_vec(), "game-server", "auth"))
    }

    fn connect_token(pid: u64, sid: u64, players: &[u64]) -> String {
        auth_codec()
            .mint(
                PlayerId(pid),
                SessionId(sid),
                json!({ "players": players }),
                Duration::from_secs(60),
            )
            .unwrap()
    }

    struct Harness {
        core: Arc<EngineCore<EchoGame, RecordingTransport>>,
        transport: Arc<RecordingTransport>,
        actions: ActionReceiver,
    }

    fn harness() -> Harness {
        let (tx, rx) = action_queue();
        let transport = Arc::new(RecordingTransport::default());
        let core = EngineCore::new(
            EngineConfig::default(),
            &token_config(),
            Arc::clone(&transport),
            tx,
            false,
        );
        Harness {
            core,
            transport,
            actions: rx,
        }
    }

    fn message(core: &Arc<EngineCore<EchoGame, RecordingTransport>>, conn: u64, text: String) {
        core.handle_action(Action::Message {
            conn: ConnectionId(conn),
            text,
        });
    }

    #[test]
    fn bad_token_leaves_no_trace() {
        let h = harness();
        message(&h.core, 1, "not-a-token".to_string());

        assert!(h.core.registry.player_for(ConnectionId(1)).is_none());
        assert!(h.core.registry.live_snapshot().is_empty());
        assert!(h.transport.frames_for(ConnectionId(1)).is_empty());
    }

    #[test]
    fn bad_payload_leaves_no_trace() {
        let h = harness();
        let token = auth_codec()
            .mint(
                PlayerId(1),
                SessionId(77),
                json!({ "players": "wrong" }),
                Duration::from_secs(60),
            )
            .unwrap();
        message(&h.core, 1, token);

        assert!(h.core.registry.player_for(ConnectionId(1)).is_none());
        assert!(h.core.registry.live_snapshot().is_empty());
    }

    #[test]
    fn unrostered_player_is_dropped() {
        let h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1, 2]));
        message(&h.core, 2, connect_token(9, 77, &[1, 2]));

        assert!(h.core.registry.player_for(ConnectionId(2)).is_none());
    }

    #[tokio::test]
    async fn two_players_share_one_session() {
        let h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1, 2]));
        message(&h.core, 2, connect_token(2, 77, &[1, 2]));

        assert_eq!(h.core.registry.live_snapshot().len(), 1);
        assert_eq!(
            h.core.registry.player_for(ConnectionId(1)),
            Some(PlayerId(1))
        );
        assert_eq!(
            h.core.registry.player_for(ConnectionId(2)),
            Some(PlayerId(2))
        );

        // first tick after both connected: each gets a game-state message
        let done = h.core.tick_all(16).await;
        assert!(done.is_empty());
        assert_eq!(h.transport.texts_for(ConnectionId(1)).len(), 1);
        assert_eq!(h.transport.texts_for(ConnectionId(2)).len(), 1);
    }

    #[test]
    fn redundant_connection_is_evicted() {
        let h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1, 2]));
        message(&h.core, 2, connect_token(1, 77, &[1, 2]));

        // the old connection got the close reason, the new one is bound
        assert_eq!(
            h.transport.closes_for(ConnectionId(1)),
            vec!["player connected again".to_string()]
        );
        assert!(h.core.registry.player_for(ConnectionId(1)).is_none());
        assert_eq!(
            h.core.registry.player_for(ConnectionId(2)),
            Some(PlayerId(1))
        );

        let inst = h.core.registry.session_of(PlayerId(1)).unwrap();
        assert_eq!(inst.connection_of(PlayerId(1)), Some(ConnectionId(2)));
    }

    #[test]
    fn invalid_json_update_is_dropped_silently() {
        let h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1]));
        message(&h.core, 1, "{not json".to_string());

        // session untouched, connection still bound
        assert_eq!(
            h.core.registry.player_for(ConnectionId(1)),
            Some(PlayerId(1))
        );
    }

    #[tokio::test]
    async fn updates_are_echoed_to_connected_players() {
        let h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1, 2]));
        message(&h.core, 2, connect_token(2, 77, &[1, 2]));
        h.core.tick_all(16).await;

        message(&h.core, 1, json!({ "move": [0, 0] }).to_string());
        let texts = h.transport.texts_for(ConnectionId(2));
        assert!(texts.iter().any(|t| t.contains("echo")));
    }

    #[tokio::test]
    async fn finished_session_archives_and_replays_results() {
        let h = harness();
        let token = auth_codec()
            .mint(
                PlayerId(1),
                SessionId(77),
                json!({ "players": [1], "lifetime_ms": 50 }),
                Duration::from_secs(60),
            )
            .unwrap();
        message(&h.core, 1, token.clone());

        let done = h.core.tick_all(60).await; // starts and expires
        let done = if done.is_empty() {
            h.core.tick_all(60).await
        } else {
            done
        };
        assert_eq!(done.len(), 1);
        h.core.finalize_session(&done[0]);

        // the connected player got the result token, then the close
        let frames = h.transport.frames_for(ConnectionId(1));
        let result_token = frames
            .iter()
            .rev()
            .find_map(|f| match f {
                SentFrame::Text(t) => Some(t.clone()),
                SentFrame::Close(_) => None,
            })
            .unwrap();
        assert!(matches!(
            frames.last().unwrap(),
            SentFrame::Close(reason) if reason == "game ended"
        ));

        let verifier = TokenCodec::new(&TokenConfig::hs256(
            b"secret".to_vec(),
            "game-server",
            "auth",
        ));
        let claims = verifier.verify(&result_token).unwrap();
        assert_eq!(claims.sid, SessionId(77));
        assert_eq!(claims.data["outcome"], json!("finished"));

        // live registry is clean, archive answers late reconnects
        assert!(h.core.registry.live_snapshot().is_empty());
        assert!(h.core.registry.session_of(PlayerId(1)).is_none());

        message(&h.core, 5, token);
        let frames = h.transport.frames_for(ConnectionId(5));
        assert!(matches!(&frames[0], SentFrame::Text(t) if *t == result_token));
        assert!(matches!(
            frames.last().unwrap(),
            SentFrame::Close(reason) if reason == "session ended"
        ));
        assert!(h.core.registry.live_snapshot().is_empty());
    }

    #[tokio::test]
    async fn archived_session_id_cannot_be_recreated() {
        let h = harness();
        let token = auth_codec()
            .mint(
                PlayerId(1),
                SessionId(77),
                json!({ "players": [1], "lifetime_ms": 50 }),
                Duration::from_secs(60),
            )
            .unwrap();
        message(&h.core, 1, token);
        let done = h.core.tick_all(60).await;
        h.core.finalize_session(&done[0]);

        // a different player presenting the ended id, even with a roster
        // naming themselves, gets nothing and creates nothing
        message(&h.core, 6, connect_token(2, 77, &[2]));
        assert!(h.core.registry.live_snapshot().is_empty());
        assert!(h.transport.frames_for(ConnectionId(6)).is_empty());
    }

    #[tokio::test]
    async fn send_failure_marks_disconnected_and_enqueues_close() {
        let mut h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1, 2]));
        message(&h.core, 2, connect_token(2, 77, &[1, 2]));

        h.transport.fail_sends_to(ConnectionId(2));
        h.core.tick_all(16).await; // start messages; the one to conn 2 fails

        let inst = h.core.registry.session_of(PlayerId(2)).unwrap();
        assert!(!inst.is_connected(PlayerId(2)));

        // the engine queued a close for the broken connection
        let mut saw_close = false;
        while let Ok(action) = tokio::time::timeout(Duration::from_millis(10), h.actions.recv())
            .await
        {
            if action == Some(Action::Close { conn: ConnectionId(2) }) {
                saw_close = true;
                break;
            }
        }
        assert!(saw_close);
        // and the session is still alive
        assert_eq!(h.core.registry.live_snapshot().len(), 1);
    }

    #[test]
    fn close_of_bound_connection_disconnects_but_keeps_session() {
        let h = harness();
        message(&h.core, 1, connect_token(1, 77, &[1, 2]));
        h.core.handle_action(Action::Close {
            conn: ConnectionId(1),
        });

        assert!(h.core.registry.player_for(ConnectionId(1)).is_none());
        assert_eq!(h.core.registry.live_snapshot().len(), 1);
        let inst = h.core.registry.session_of(PlayerId(1)).unwrap();
        assert!(!inst.is_connected(PlayerId(1)));
    }

    #[test]
    fn close_of_unbound_connection_is_a_noop() {
        let h = harness();
        h.core.handle_action(Action::Close {
            conn: ConnectionId(99),
        });
        assert!(h.core.registry.live_snapshot().is_empty());
    }
}
