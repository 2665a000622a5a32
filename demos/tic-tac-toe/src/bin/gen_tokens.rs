//! Mints test connect tokens the way the external authenticator would, so
//! the demo servers can be driven from any WebSocket client.
//!
//! Queue tokens (one per player) enter the matchmaking server:
//! ```not_rust
//! cargo run --bin gen_tokens -- --session 100 --player 1
//! ```
//! Game tokens (full roster) connect straight to a game server:
//! ```not_rust
//! cargo run --bin gen_tokens -- --mode game --session 77 --player 1 --player 2
//! ```

use std::time::Duration;

use clap::Parser;
use serde_json::json;
use signet_server::{TokenCodec, TokenConfig};
use signet_shared::{PlayerId, SessionId};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// HMAC secret shared with the target server
    #[clap(short, long, default_value = "secret")]
    secret: String,

    /// Issuer to stamp; must match the target server's expected issuer
    #[clap(long, default_value = "tic-tac-toe-auth")]
    issuer: String,

    /// "queue" for matchmaking tokens, "game" for direct game tokens
    #[clap(short, long, default_value = "queue")]
    mode: String,

    /// Session id the tokens name
    #[clap(long)]
    session: u64,

    /// Player ids; repeat for the full roster in game mode
    #[clap(long = "player", required = true)]
    players: Vec<u64>,

    /// Token lifetime in seconds
    #[clap(long, default_value = "3600")]
    ttl_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let codec = TokenCodec::new(&TokenConfig::hs256(
        args.secret.clone().into_bytes(),
        "unused",
        args.issuer.clone(),
    ));

    for &pid in &args.players {
        let data = match args.mode.as_str() {
            "game" => json!({ "matched": true, "players": args.players }),
            _ => json!({ "matched": false, "players": [pid] }),
        };
        let token = codec.mint(
            PlayerId(pid),
            SessionId(args.session),
            data,
            Duration::from_secs(args.ttl_secs),
        )?;
        println!("{}", token);
    }
    Ok(())
}
