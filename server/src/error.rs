//! Engine error taxonomy.
//!
//! Every failure attributable to a single connection or message is local: it
//! is logged by the engine loop and contained there, never propagated to the
//! session or the server. Only transport-subsystem failure is fatal.

use signet_shared::{ConnectionId, PayloadError, PlayerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A connect token failed verification: unknown issuer, bad signature,
    /// expired, or malformed. The connection is kept open and stateless.
    #[error("token rejected: {0}")]
    BadToken(#[source] jsonwebtoken::errors::Error),

    /// Signing an outbound token failed. Points at key configuration.
    #[error("token signing failed: {0}")]
    Token(#[source] jsonwebtoken::errors::Error),

    /// The session factory rejected a verified token's payload.
    #[error(transparent)]
    BadPayload(#[from] PayloadError),

    /// A transport send could not be queued. The target participant is
    /// marked disconnected; the session continues.
    #[error("send failed on connection {0}")]
    SendFailed(ConnectionId),

    /// A message arrived on a bound connection whose session is gone.
    /// Protocol bug; logged at error level.
    #[error("player {0} has no live session")]
    UnknownPlayer(PlayerId),

    /// The transport subsystem itself failed. Shuts the engine down.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}
