//! Token codec: sign and verify the compact signed tokens that carry every
//! identity and result in the system.
//!
//! The algorithm, key and issuers are fixed at construction and never
//! re-negotiated per connection. Verification pins the expected issuer and
//! enforces expiry; signing stamps the engine's own issuer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use signet_shared::{Claims, PlayerId, SessionId};

use crate::error::EngineError;

/// Constructor-time token material. The HMAC family (HS256/384/512) is
/// supported; both directions share the one symmetric secret.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub algorithm: Algorithm,
    pub secret: Vec<u8>,
    /// Issuer required on inbound connect tokens.
    pub expected_issuer: String,
    /// Issuer stamped on outbound result/session tokens.
    pub issuer: String,
}

impl TokenConfig {
    pub fn hs256(
        secret: impl Into<Vec<u8>>,
        expected_issuer: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            secret: secret.into(),
            expected_issuer: expected_issuer.into(),
            issuer: issuer.into(),
        }
    }
}

/// Shared sign/verify handle. Cheap to call from any task.
pub struct TokenCodec {
    header: Header,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        let mut validation = Validation::new(config.algorithm);
        validation.set_issuer(&[&config.expected_issuer]);
        Self {
            header: Header::new(config.algorithm),
            encoding: EncodingKey::from_secret(&config.secret),
            decoding: DecodingKey::from_secret(&config.secret),
            validation,
            issuer: config.issuer.clone(),
        }
    }

    /// Sign an explicit claims body.
    pub fn sign(&self, claims: &Claims) -> Result<String, EngineError> {
        encode(&self.header, claims, &self.encoding).map_err(EngineError::Token)
    }

    /// Sign a token issued by this engine: result tokens at game end,
    /// session and cancel tokens from the matchmaker.
    pub fn mint(
        &self,
        player: PlayerId,
        session: SessionId,
        data: Value,
        ttl: Duration,
    ) -> Result<String, EngineError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs();
        self.sign(&Claims {
            iss: self.issuer.clone(),
            exp: now + ttl.as_secs(),
            pid: player,
            sid: session,
            data,
        })
    }

    /// Verify a compact token and extract its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, EngineError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(EngineError::BadToken)
    }
}
