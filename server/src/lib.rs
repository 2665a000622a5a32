//! # Signet Server Engines
//!
//! This library provides the two server engines behind a signet deployment:
//! a session server that drives host-supplied game objects on a fixed tick,
//! and a matchmaking server that groups queued clients into new sessions.
//! Both authenticate every connection with a signed bearer token and answer
//! with signed tokens of their own.
//!
//! ## Core Responsibilities
//!
//! ### Authentication and Admission
//! The first text frame on every connection is treated as a connect token.
//! Verification failures are dropped silently; a verified token resolves to
//! a fresh session, an existing one (with redundant-connection eviction), or
//! an archived one whose result is replayed.
//!
//! ### Session Multiplexing
//! Connections, players and sessions are tracked in a registry so that every
//! inbound message reaches exactly one session object, inputs from different
//! connections to the same session are linearized by that session's lock,
//! and a player can hold at most one live session at a time.
//!
//! ### The Tick
//! A fixed-period driver advances every live session, drains its outbound
//! messages, and reaps finished sessions: each participant receives a signed
//! result token before the connection closes, and the result stays in an
//! archive for a retention window so late reconnects can still fetch it.
//!
//! ### Matchmaking
//! The matchmaking engine reuses all of the above with queue entries as its
//! sessions and adds a second periodic loop that hands a snapshot of the
//! queue to the host's [`Matchmaker`](signet_shared::Matchmaker) policy,
//! announcing every produced group with freshly signed session tokens.
//!
//! ## Module Organization
//!
//! - [`token`]: sign/verify of the compact signed tokens
//! - [`transport`]: the [`Transport`] trait and the WebSocket implementation
//! - [`queue`]: the FIFO of connection events between transport and engine
//! - `registry` / `session`: the multiplexing state (crate-internal)
//! - [`server`]: the game-mode engine, [`GameServer`]
//! - [`matchmaker`]: the matchmaking engine, [`MatchmakingServer`]
//! - [`config`], [`error`], [`metrics`]: the ambient pieces
//!
//! ## Wiring
//!
//! The binaries own the wiring: build the action queue, hand its sender to
//! the transport, hand both ends to the engine, then run the accept loop and
//! the engine loop as sibling tasks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::Value;
//! use signet_server::{action_queue, EngineConfig, GameServer, TokenConfig, WsTransport};
//! use signet_shared::{Outbound, PayloadError, PlayerId, Session};
//!
//! # #[derive(Clone)] struct MyGame;
//! # impl Session for MyGame {
//! #     fn from_payload(_: &Value) -> Result<Self, PayloadError> { Ok(MyGame) }
//! #     fn players(&self) -> Vec<PlayerId> { vec![] }
//! #     fn connect(&mut self, _: PlayerId) {}
//! #     fn disconnect(&mut self, _: PlayerId) {}
//! #     fn player_update(&mut self, _: PlayerId, _: &Value) {}
//! #     fn tick(&mut self, _: u64) {}
//! #     fn poll_outbound(&mut self) -> Option<Outbound> { None }
//! #     fn is_done(&self) -> bool { false }
//! #     fn result_for(&self, _: PlayerId) -> Value { Value::Null }
//! # }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (actions_tx, actions_rx) = action_queue();
//! let transport = WsTransport::new(actions_tx.clone());
//! let tokens = TokenConfig::hs256(b"secret".to_vec(), "my-auth", "my-server");
//! let mut server: GameServer<MyGame, _> = GameServer::new(
//!     EngineConfig::default(),
//!     &tokens,
//!     Arc::clone(&transport),
//!     actions_tx,
//!     actions_rx,
//! );
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:9090").await?;
//! tokio::spawn(transport.serve(listener));
//! server.run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod matchmaker;
pub mod metrics;
pub mod queue;
mod registry;
pub mod server;
mod session;
pub mod token;
pub mod transport;

pub use config::EngineConfig;
pub use error::EngineError;
pub use matchmaker::MatchmakingServer;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use queue::{action_queue, Action, ActionReceiver, ActionSender};
pub use server::GameServer;
pub use token::{TokenCodec, TokenConfig};
pub use transport::{Transport, WsTransport};
