//! Tic-tac-toe on the signet engines: a two-player game with chess clocks,
//! the matching queue entry, and the pair-first-two matchmaker.
//!
//! The game session expects a connect-token payload of
//! `{"matched": true, "players": [x, o]}` — exactly what the matchmaker
//! mints — and plays the first rostered player as X. Each player receives
//! personalized `game` state messages (own clock, opponent clock,
//! `your_turn`) plus a `time` push every second while the game runs.

use std::collections::VecDeque;

use log::debug;
use serde_json::{json, Value};
use signet_shared::{MatchGroup, Matchmaker, Outbound, PayloadError, PlayerId, Session, SessionId};

/// Mark values on the board: X positive, O negative, empty zero.
const X_MARK: i8 = 1;
const O_MARK: i8 = -1;

/// Each player's clock at game start.
const INITIAL_CLOCK_MS: i64 = 100_000;

/// How often the running game pushes a `time` state to both players.
const TIME_PUSH_MS: u64 = 1_000;

/// The 3×3 board with win detection.
#[derive(Debug, Clone, Default)]
pub struct Board {
    cells: [i8; 9],
    winner: i8,
    moves: usize,
}

impl Board {
    fn cell(&self, x: usize, y: usize) -> i8 {
        self.cells[x + 3 * y]
    }

    /// Place `mark` at `(x, y)`. Returns false for an occupied cell or an
    /// off-board coordinate.
    pub fn place(&mut self, x: usize, y: usize, mark: i8) -> bool {
        if x > 2 || y > 2 || self.cell(x, y) != 0 {
            return false;
        }
        self.cells[x + 3 * y] = mark;
        self.moves += 1;

        let row = (0..3).all(|i| self.cell(i, y) == mark);
        let col = (0..3).all(|i| self.cell(x, i) == mark);
        let diag = x == y && (0..3).all(|i| self.cell(i, i) == mark);
        let anti = x + y == 2 && (0..3).all(|i| self.cell(i, 2 - i) == mark);
        if row || col || diag || anti {
            self.winner = mark;
        }
        true
    }

    pub fn winner(&self) -> i8 {
        self.winner
    }

    pub fn is_done(&self) -> bool {
        self.winner != 0 || self.moves == 9
    }

    pub fn cells(&self) -> &[i8; 9] {
        &self.cells
    }
}

/// One tic-tac-toe game between two players, with per-player chess clocks.
#[derive(Debug, Clone)]
pub struct TicTacToeGame {
    players: [PlayerId; 2],
    joined: Vec<PlayerId>,
    started: bool,
    clock_expired: bool,
    x_move: bool,
    x_time_ms: i64,
    o_time_ms: i64,
    /// Winner decided by the clocks, overlaid on the board winner.
    overlay: i8,
    since_push_ms: u64,
    moves: Vec<Value>,
    board: Board,
    outbox: VecDeque<Outbound>,
}

impl TicTacToeGame {
    fn is_x(&self, player: PlayerId) -> bool {
        player == self.players[0]
    }

    /// Board winner plus clock overlay; positive means X won.
    fn state(&self) -> i8 {
        self.board.winner() + self.overlay
    }

    fn game_state(&self, player: PlayerId) -> Value {
        let is_x = self.is_x(player);
        json!({
            "type": "game",
            "board": self.board.cells().to_vec(),
            "time": if is_x { self.x_time_ms } else { self.o_time_ms },
            "opponent_time": if is_x { self.o_time_ms } else { self.x_time_ms },
            "xmove": self.x_move,
            "moves": self.moves,
            "state": self.state(),
            "done": self.is_done(),
            "your_turn": is_x == self.x_move,
        })
    }

    fn time_state(&self, player: PlayerId) -> Value {
        let is_x = self.is_x(player);
        json!({
            "type": "time",
            "time": if is_x { self.x_time_ms } else { self.o_time_ms },
            "opponent_time": if is_x { self.o_time_ms } else { self.x_time_ms },
        })
    }

    fn push_game_states(&mut self) {
        for player in self.players {
            let state = self.game_state(player);
            self.outbox
                .push_back(Outbound::To(player, state.to_string()));
        }
    }

    fn apply_move(&mut self, player: PlayerId, update: &Value) {
        let (Some(x), Some(y)) = (
            update["move"][0].as_u64().map(|v| v as usize),
            update["move"][1].as_u64().map(|v| v as usize),
        ) else {
            debug!("player {} sent a malformed move: {}", player, update);
            return;
        };

        let mark = if self.is_x(player) { X_MARK } else { O_MARK };
        let on_turn = self.is_x(player) == self.x_move;
        if !on_turn {
            debug!("player {} sent a move out of turn: {}", player, update);
            return;
        }
        if !self.board.place(x, y, mark) {
            debug!("player {} sent an invalid move: {}", player, update);
            return;
        }

        self.x_move = !self.x_move;
        self.moves.push(update["move"].clone());
        self.push_game_states();
    }
}

impl Session for TicTacToeGame {
    fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
        if payload["matched"] != json!(true) {
            return Err(PayloadError::new("token is not a match token"));
        }
        let players = payload["players"]
            .as_array()
            .ok_or_else(|| PayloadError::new("players missing"))?
            .iter()
            .map(|v| v.as_u64().map(PlayerId))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PayloadError::new("players must be integers"))?;
        let &[x, o] = players.as_slice() else {
            return Err(PayloadError::new("exactly two players required"));
        };
        if x == o {
            return Err(PayloadError::new("players must be distinct"));
        }

        Ok(Self {
            players: [x, o],
            joined: Vec::new(),
            started: false,
            clock_expired: false,
            x_move: true,
            x_time_ms: INITIAL_CLOCK_MS,
            o_time_ms: INITIAL_CLOCK_MS,
            overlay: 0,
            since_push_ms: 0,
            moves: Vec::new(),
            board: Board::default(),
            outbox: VecDeque::new(),
        })
    }

    fn players(&self) -> Vec<PlayerId> {
        self.players.to_vec()
    }

    fn connect(&mut self, player: PlayerId) {
        if !self.joined.contains(&player) {
            self.joined.push(player);
        }
        // a reconnecting player needs the current state right away
        if self.started {
            let state = self.game_state(player);
            self.outbox
                .push_back(Outbound::To(player, state.to_string()));
        }
    }

    fn disconnect(&mut self, _player: PlayerId) {}

    fn player_update(&mut self, player: PlayerId, update: &Value) {
        if !self.started || self.is_done() {
            debug!("player {} moved outside a running game", player);
            return;
        }
        self.apply_move(player, update);
    }

    fn tick(&mut self, delta_ms: u64) {
        if self.started && !self.is_done() {
            if self.x_move {
                self.x_time_ms -= delta_ms as i64;
            } else {
                self.o_time_ms -= delta_ms as i64;
            }
            if self.x_time_ms <= 0 {
                self.x_time_ms = 0;
                self.overlay = O_MARK;
                self.clock_expired = true;
            } else if self.o_time_ms <= 0 {
                self.o_time_ms = 0;
                self.overlay = X_MARK;
                self.clock_expired = true;
            }

            self.since_push_ms += delta_ms;
            if self.since_push_ms >= TIME_PUSH_MS {
                for player in self.players {
                    let state = self.time_state(player);
                    self.outbox
                        .push_back(Outbound::To(player, state.to_string()));
                }
                self.since_push_ms = 0;
            }

            if self.is_done() {
                self.push_game_states();
            }
        } else if !self.started && self.joined.len() == 2 {
            self.started = true;
            self.push_game_states();
        }
    }

    fn poll_outbound(&mut self) -> Option<Outbound> {
        self.outbox.pop_front()
    }

    fn is_done(&self) -> bool {
        self.board.is_done() || self.clock_expired
    }

    fn result_for(&self, player: PlayerId) -> Value {
        let state = self.state();
        let mine = if self.is_x(player) { state } else { -state };
        let result = if mine > 0 {
            "win"
        } else if mine < 0 {
            "loss"
        } else {
            "draw"
        };
        json!({
            "result": result,
            "board": self.board.cells().to_vec(),
        })
    }
}

/// One player waiting in the matchmaking queue. Withdraws on a
/// `{"cancel": true}` message.
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    player: PlayerId,
    cancelled: bool,
    outbox: VecDeque<Outbound>,
}

impl QueuedPlayer {
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

impl Session for QueuedPlayer {
    fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
        if payload["matched"] != json!(false) {
            return Err(PayloadError::new("token is not a queue token"));
        }
        let players = payload["players"]
            .as_array()
            .ok_or_else(|| PayloadError::new("players missing"))?;
        let [player] = players.as_slice() else {
            return Err(PayloadError::new("queue entries hold exactly one player"));
        };
        let player = player
            .as_u64()
            .map(PlayerId)
            .ok_or_else(|| PayloadError::new("players must be integers"))?;

        Ok(Self {
            player,
            cancelled: false,
            outbox: VecDeque::new(),
        })
    }

    fn players(&self) -> Vec<PlayerId> {
        vec![self.player]
    }

    fn connect(&mut self, player: PlayerId) {
        self.outbox.push_back(Outbound::To(
            player,
            json!({ "type": "queued" }).to_string(),
        ));
    }

    fn disconnect(&mut self, _player: PlayerId) {}

    fn player_update(&mut self, player: PlayerId, update: &Value) {
        if update["cancel"] == json!(true) {
            debug!("player {} left the queue", player);
            self.cancelled = true;
        }
    }

    fn tick(&mut self, _delta_ms: u64) {}

    fn poll_outbound(&mut self) -> Option<Outbound> {
        self.outbox.pop_front()
    }

    fn is_done(&self) -> bool {
        self.cancelled
    }

    fn result_for(&self, _player: PlayerId) -> Value {
        Value::Null
    }
}

/// Pairs queued players two at a time, oldest session id first.
pub struct PairMatcher {
    next_session: u64,
}

impl PairMatcher {
    pub fn new(first_session: u64) -> Self {
        Self {
            next_session: first_session,
        }
    }
}

impl Matchmaker for PairMatcher {
    type Entry = QueuedPlayer;

    fn match_groups(
        &mut self,
        queue: &std::collections::HashMap<SessionId, QueuedPlayer>,
        _delta_ms: u64,
    ) -> Vec<MatchGroup> {
        let mut sids: Vec<SessionId> = queue.keys().copied().collect();
        sids.sort();

        let mut groups = Vec::new();
        for pair in sids.chunks(2) {
            if let [a, b] = pair {
                let session = SessionId(self.next_session);
                self.next_session += 1;
                groups.push(MatchGroup {
                    participants: vec![*a, *b],
                    session,
                    payload: json!({
                        "matched": true,
                        "players": [queue[a].player(), queue[b].player()],
                    }),
                });
            }
        }
        groups
    }

    fn cancel_payload(&self) -> Value {
        json!({ "matched": false })
    }
}
