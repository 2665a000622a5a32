//! Tic-tac-toe matchmaking server.
//!
//! Accepts connect tokens from the external authenticator, pairs queued
//! players two at a time, and answers each with a session token for a fresh
//! game on the game server.
//!
//! Run with:
//! ```not_rust
//! RUST_LOG=debug cargo run --bin matchmaking_server -- --secret my-secret
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use signet_server::{action_queue, EngineConfig, MatchmakingServer, TokenConfig, WsTransport};
use signet_tic_tac_toe::PairMatcher;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value = "9091")]
    port: u16,

    /// Matcher period in milliseconds
    #[clap(short, long, default_value = "100")]
    match_ms: u64,

    /// HMAC secret shared with the authenticator and the game server
    #[clap(short, long, default_value = "secret")]
    secret: String,

    /// Issuer expected on connect tokens
    #[clap(long, default_value = "tic-tac-toe-auth")]
    expected_issuer: String,

    /// Issuer stamped on session and cancel tokens
    #[clap(long, default_value = "tic-tac-toe-matchmaker")]
    issuer: String,

    /// First session id handed to a match
    #[clap(long, default_value = "1")]
    first_session: u64,

    /// Runtime worker threads
    #[clap(long, default_value = "4")]
    workers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        match_period: Duration::from_millis(args.match_ms),
        worker_threads: args.workers,
        ..EngineConfig::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;
    runtime.block_on(serve(args, config))
}

async fn serve(args: Args, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let tokens = TokenConfig::hs256(
        args.secret.into_bytes(),
        args.expected_issuer,
        args.issuer,
    );

    let (actions_tx, actions_rx) = action_queue();
    let transport = WsTransport::new(actions_tx.clone());
    let mut server = MatchmakingServer::new(
        config,
        &tokens,
        Arc::clone(&transport),
        actions_tx,
        actions_rx,
        PairMatcher::new(args.first_session),
    );

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("tic-tac-toe matchmaking server on {}:{}", args.host, args.port);
    tokio::spawn(transport.serve(listener));

    server.run().await;
    Ok(())
}
