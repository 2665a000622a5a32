//! Tic-tac-toe game server.
//!
//! Accepts connect tokens issued by the matchmaker and drives the games to
//! completion, emitting signed result tokens.
//!
//! Run with:
//! ```not_rust
//! RUST_LOG=debug cargo run --bin game_server -- --secret my-secret
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use signet_server::{action_queue, EngineConfig, GameServer, TokenConfig, WsTransport};
use signet_tic_tac_toe::TicTacToeGame;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value = "9090")]
    port: u16,

    /// Session tick period in milliseconds
    #[clap(short, long, default_value = "500")]
    tick_ms: u64,

    /// How long ended games stay retrievable, in seconds
    #[clap(long, default_value = "600")]
    retention_secs: u64,

    /// HMAC secret shared with the matchmaker
    #[clap(short, long, default_value = "secret")]
    secret: String,

    /// Issuer expected on connect tokens
    #[clap(long, default_value = "tic-tac-toe-matchmaker")]
    expected_issuer: String,

    /// Issuer stamped on result tokens
    #[clap(long, default_value = "tic-tac-toe-game")]
    issuer: String,

    /// Runtime worker threads
    #[clap(long, default_value = "4")]
    workers: usize,

    /// Concurrent tick workers across live games
    #[clap(long, default_value = "1")]
    tick_workers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        tick_period: Duration::from_millis(args.tick_ms),
        archive_retention: Duration::from_secs(args.retention_secs),
        tick_workers: args.tick_workers,
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
    let mut server: GameServer<TicTacToeGame, _> = GameServer::new(
        config,
        &tokens,
        Arc::clone(&transport),
        actions_tx,
        actions_rx,
    );

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("tic-tac-toe game server on {}:{}", args.host, args.port);
    tokio::spawn(transport.serve(listener));

    server.run().await;
    Ok(())
}
