//! # Shared Contracts
//!
//! This crate contains the types both sides of a signet deployment agree on:
//! the server engines on one side, and the host application supplying game
//! logic and matchmaking policy on the other.
//!
//! ## Core Components
//!
//! ### Identifiers
//! Opaque, equality-comparable handles for the three kinds of actors:
//! - [`PlayerId`]: one human/account, taken from a verified token claim
//! - [`SessionId`]: one logical session (a game, a matchmaking slot)
//! - [`ConnectionId`]: one live socket, assigned by the transport and never
//!   stable across reconnects
//!
//! ### Token claims
//! [`Claims`] is the single claims shape used by every signed token in the
//! system: connect tokens presented by clients, result tokens emitted when a
//! session ends, and session tokens minted by the matchmaker. The `data`
//! claim is an opaque JSON payload the engine hands to the host without
//! interpretation.
//!
//! ### Host contracts
//! [`Session`] is the state machine the session engine drives: constructed
//! from a token payload, fed connects/disconnects/updates, advanced on a
//! fixed tick, and drained of tagged outbound messages until it reports
//! itself done. [`Matchmaker`] is the policy object the matchmaking engine
//! consults: it partitions a snapshot of queued entries into [`MatchGroup`]s.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier of a human/account, carried in the `pid` claim of every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical session, carried in the `sid` claim of every
/// token. A session is the unit of isolation: messages, ticks and
/// termination are all scoped to one `SessionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one live socket. Assigned by the transport adapter when a
/// connection is accepted and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Claims body of every token in the system.
///
/// Connect tokens are minted by an external authenticator and verified by
/// the engine; result and session tokens are minted by the engine itself.
/// In all three cases the shape is the same, so a session token handed out
/// by the matchmaker is directly a valid connect token for a game server
/// sharing the same key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer. Pinned on verification.
    pub iss: String,
    /// Expiry as seconds since the Unix epoch.
    pub exp: u64,
    /// The requesting player.
    pub pid: PlayerId,
    /// The target session.
    pub sid: SessionId,
    /// Host payload: handed to [`Session::from_payload`] on connect, set to
    /// the host's result/match/cancel payload on outbound tokens.
    pub data: Value,
}

/// An outbound message produced by a session object, tagged with its
/// audience. Messages are delivered in the order the session emitted them,
/// and only to participants that are currently connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver to every connected participant.
    Broadcast(String),
    /// Deliver to one participant, if connected.
    To(PlayerId, String),
}

/// Rejection of a connect-token payload by a session factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session payload: {0}")]
pub struct PayloadError(String);

impl PayloadError {
    pub fn new(reason: impl Into<String>) -> Self {
        PayloadError(reason.into())
    }
}

/// The session state machine driven by the session engine.
///
/// A `Session` is a bounded, deterministic state machine: it is constructed
/// from the `data` claim of a verified connect token, told about participant
/// connects and disconnects, fed parsed player messages, and advanced on a
/// fixed tick. It communicates outward exclusively through its outbound
/// queue, drained via [`poll_outbound`](Session::poll_outbound) after every
/// engine call.
///
/// Contract notes:
/// - [`players`](Session::players) must be stable for the session's life;
///   the engine treats the roster as fixed at construction.
/// - [`is_done`](Session::is_done) must stay `true` once it turns `true`,
///   and [`result_for`](Session::result_for) must be answerable for every
///   rostered player by that point.
/// - The engine serializes all calls through one lock, so implementations
///   need no interior synchronization.
pub trait Session: Send + 'static {
    /// Builds the session from the token's `data` claim. `Err` drops the
    /// connection that presented the payload.
    fn from_payload(payload: &Value) -> Result<Self, PayloadError>
    where
        Self: Sized;

    /// The fixed participant roster.
    fn players(&self) -> Vec<PlayerId>;

    /// A rostered player connected (or reconnected after a disconnect).
    fn connect(&mut self, player: PlayerId);

    /// A connected player's socket went away.
    fn disconnect(&mut self, player: PlayerId);

    /// A parsed JSON message arrived from a connected player.
    fn player_update(&mut self, player: PlayerId, update: &Value);

    /// Advance time by `delta_ms` milliseconds.
    fn tick(&mut self, delta_ms: u64);

    /// Pop the next queued outbound message, oldest first.
    fn poll_outbound(&mut self) -> Option<Outbound>;

    /// Whether the session has terminated. Monotone.
    fn is_done(&self) -> bool;

    /// The claims payload to sign into `player`'s result token once the
    /// session has terminated.
    fn result_for(&self, player: PlayerId) -> Value;
}

/// One match produced by a [`Matchmaker`]: the queue entries consumed, the
/// session they were merged into, and the payload every participant's
/// session token will carry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchGroup {
    /// Queue entries (by their session id) grouped into this match.
    pub participants: Vec<SessionId>,
    /// The freshly minted session the participants should reconnect to.
    pub session: SessionId,
    /// The `data` claim of each participant's session token.
    pub payload: Value,
}

/// The matching policy consulted by the matchmaking engine on its own
/// periodic tick.
///
/// Entries are plain [`Session`] objects whose `tick` is typically a no-op;
/// an entry withdraws from the queue by reporting `is_done`, which makes the
/// engine send it the signed [`cancel_payload`](Matchmaker::cancel_payload).
pub trait Matchmaker: Send + 'static {
    /// The queue-entry session type. `Clone` is required because the engine
    /// hands the matcher a snapshot taken under lock, not live references.
    type Entry: Session + Clone;

    /// Partition the queued entries into zero or more match groups. Entries
    /// not named in any group stay queued.
    fn match_groups(
        &mut self,
        queue: &HashMap<SessionId, Self::Entry>,
        delta_ms: u64,
    ) -> Vec<MatchGroup>;

    /// The claims payload signed into a withdrawing entry's cancel token.
    fn cancel_payload(&self) -> Value;
}
