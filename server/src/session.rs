//! Per-session engine: owns one host session object together with its
//! participant connection state, all behind one mutex.
//!
//! Every operation locks, mutates, drains the session object's outbound
//! queue into a routed local buffer, and releases. The caller sends the
//! buffered frames after the lock is gone, so transport I/O never runs
//! under the session lock.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use signet_shared::{ConnectionId, Outbound, PlayerId, Session, SessionId};

/// One routed outbound frame: which participant, on which socket, what text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub player: PlayerId,
    pub conn: ConnectionId,
    pub text: String,
}

/// Result of binding a connection to a participant.
pub(crate) struct ConnectOutcome {
    /// A previous live connection for the same player, to be evicted.
    pub evicted: Option<ConnectionId>,
    pub outgoing: Vec<Delivery>,
}

/// Result of one tick of this session.
pub(crate) struct TickOutcome {
    pub outgoing: Vec<Delivery>,
    pub done: bool,
}

/// The engine-owned record for one live session. Shared via `Arc` between
/// the live-session list, the per-player index and in-flight tick tasks.
pub(crate) struct SessionInstance<S: Session> {
    id: SessionId,
    state: Mutex<InstanceState<S>>,
}

struct InstanceState<S: Session> {
    game: S,
    players: Vec<PlayerId>,
    connections: HashMap<PlayerId, ConnectionId>,
    connected: HashMap<PlayerId, bool>,
}

impl<S: Session> SessionInstance<S> {
    pub(crate) fn new(id: SessionId, game: S) -> Self {
        let players = game.players();
        Self {
            id,
            state: Mutex::new(InstanceState {
                game,
                players,
                connections: HashMap::new(),
                connected: HashMap::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn players(&self) -> Vec<PlayerId> {
        self.state.lock().unwrap().players.clone()
    }

    pub(crate) fn permits(&self, player: PlayerId) -> bool {
        self.state.lock().unwrap().players.contains(&player)
    }

    /// Bind `conn` as `player`'s connection. The session object's `connect`
    /// runs only on a disconnected→connected edge, which makes a reconnect
    /// from the same handle idempotent. A distinct previous live connection
    /// is returned for eviction; the handle swap itself is atomic under the
    /// session lock, so there is no instant with two live bindings.
    pub(crate) fn connect(&self, player: PlayerId, conn: ConnectionId) -> ConnectOutcome {
        let mut state = self.state.lock().unwrap();
        let was_connected = state.connected.get(&player).copied().unwrap_or(false);
        let evicted = match state.connections.get(&player) {
            Some(&old) if was_connected && old != conn => Some(old),
            _ => None,
        };
        state.connections.insert(player, conn);
        if !was_connected {
            state.connected.insert(player, true);
            state.game.connect(player);
        }
        let outgoing = state.drain();
        ConnectOutcome { evicted, outgoing }
    }

    pub(crate) fn disconnect(&self, player: PlayerId) -> Vec<Delivery> {
        let mut state = self.state.lock().unwrap();
        state.connected.insert(player, false);
        state.connections.remove(&player);
        state.game.disconnect(player);
        state.drain()
    }

    pub(crate) fn player_update(&self, player: PlayerId, update: &Value) -> Vec<Delivery> {
        let mut state = self.state.lock().unwrap();
        state.game.player_update(player, update);
        state.drain()
    }

    pub(crate) fn tick(&self, delta_ms: u64) -> TickOutcome {
        let mut state = self.state.lock().unwrap();
        state.game.tick(delta_ms);
        let outgoing = state.drain();
        let done = state.game.is_done();
        TickOutcome { outgoing, done }
    }

    /// A send to `player` failed: treat them as disconnected so broadcasts
    /// skip them until the close path runs.
    pub(crate) fn mark_send_failed(&self, player: PlayerId) {
        self.state.lock().unwrap().connected.insert(player, false);
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self, player: PlayerId) -> bool {
        self.state
            .lock()
            .unwrap()
            .connected
            .get(&player)
            .copied()
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn connection_of(&self, player: PlayerId) -> Option<ConnectionId> {
        let state = self.state.lock().unwrap();
        if state.connected.get(&player).copied().unwrap_or(false) {
            state.connections.get(&player).copied()
        } else {
            None
        }
    }

    /// Roster-ordered `(player, connection)` pairs for everyone currently
    /// connected.
    pub(crate) fn connected_peers(&self) -> Vec<(PlayerId, ConnectionId)> {
        let state = self.state.lock().unwrap();
        state
            .players
            .iter()
            .filter(|p| state.connected.get(p).copied().unwrap_or(false))
            .filter_map(|p| state.connections.get(p).map(|&c| (*p, c)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_done(&self) -> bool {
        self.state.lock().unwrap().game.is_done()
    }

    pub(crate) fn result_for(&self, player: PlayerId) -> Value {
        self.state.lock().unwrap().game.result_for(player)
    }
}

impl<S: Session + Clone> SessionInstance<S> {
    /// Snapshot of the session object, taken under the lock. Matchmaking
    /// entries that already withdrew are not worth snapshotting.
    pub(crate) fn snapshot_entry(&self) -> Option<S> {
        let state = self.state.lock().unwrap();
        if state.game.is_done() {
            None
        } else {
            Some(state.game.clone())
        }
    }
}

impl<S: Session> InstanceState<S> {
    /// Move every queued outbound message into a routed buffer. Broadcasts
    /// expand over connected participants in roster order; directed messages
    /// to disconnected participants are dropped.
    fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(msg) = self.game.poll_outbound() {
            match msg {
                Outbound::Broadcast(text) => {
                    for player in &self.players {
                        if !self.connected.get(player).copied().unwrap_or(false) {
                            continue;
                        }
                        if let Some(&conn) = self.connections.get(player) {
                            out.push(Delivery {
                                player: *player,
                                conn,
                                text: text.clone(),
                            });
                        }
                    }
                }
                Outbound::To(player, text) => {
                    if !self.connected.get(&player).copied().unwrap_or(false) {
                        continue;
                    }
                    if let Some(&conn) = self.connections.get(&player) {
                        out.push(Delivery { player, conn, text });
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! A minimal host session for engine unit tests: echoes updates as
    //! broadcasts, greets on tick once everyone has joined, and dies after a
    //! payload-configured lifetime.

    use std::collections::VecDeque;

    use serde_json::{json, Value};
    use signet_shared::{Outbound, PayloadError, PlayerId, Session};

    #[derive(Debug, Clone)]
    pub(crate) struct EchoGame {
        players: Vec<PlayerId>,
        joined: Vec<PlayerId>,
        started: bool,
        remaining_ms: i64,
        outbox: VecDeque<Outbound>,
    }

    impl Session for EchoGame {
        fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
            let players = payload["players"]
                .as_array()
                .ok_or_else(|| PayloadError::new("players missing"))?
                .iter()
                .map(|v| v.as_u64().map(PlayerId))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| PayloadError::new("players must be integers"))?;
            if players.is_empty() {
                return Err(PayloadError::new("empty roster"));
            }
            let remaining_ms = payload["lifetime_ms"].as_i64().unwrap_or(i64::MAX);
            Ok(Self {
                players,
                joined: Vec::new(),
                started: false,
                remaining_ms,
                outbox: VecDeque::new(),
            })
        }

        fn players(&self) -> Vec<PlayerId> {
            self.players.clone()
        }

        fn connect(&mut self, player: PlayerId) {
            if !self.joined.contains(&player) {
                self.joined.push(player);
            }
            if self.started {
                self.outbox.push_back(Outbound::To(
                    player,
                    json!({ "type": "game", "resumed": true }).to_string(),
                ));
            }
        }

        fn disconnect(&mut self, _player: PlayerId) {}

        fn player_update(&mut self, player: PlayerId, update: &Value) {
            self.outbox.push_back(Outbound::Broadcast(
                json!({ "type": "echo", "from": player, "body": update }).to_string(),
            ));
        }

        fn tick(&mut self, delta_ms: u64) {
            if !self.started && self.joined.len() == self.players.len() {
                self.started = true;
                for &player in &self.players {
                    self.outbox
                        .push_back(Outbound::To(player, json!({ "type": "game" }).to_string()));
                }
            }
            if self.started {
                self.remaining_ms -= delta_ms as i64;
            }
        }

        fn poll_outbound(&mut self) -> Option<Outbound> {
            self.outbox.pop_front()
        }

        fn is_done(&self) -> bool {
            self.remaining_ms <= 0
        }

        fn result_for(&self, player: PlayerId) -> Value {
            json!({ "player": player, "outcome": "finished" })
        }
    }

    pub(crate) fn two_player_payload() -> Value {
        json!({ "players": [1, 2] })
    }
}
