//! The matchmaking server engine: a specialization of the session engine
//! whose sessions are queue entries, plus a second periodic loop that hands
//! a snapshot of the queue to the host's matching policy.
//!
//! A matched entry's players each receive a freshly signed session token
//! naming the new session, then their queue connection closes with reason
//! "matched"; the expectation is that the client reconnects to a game server
//! with that token. A withdrawing entry gets the signed cancel payload the
//! same way. A raw disconnect simply abandons the entry.

use std::sync::Arc;
use std::time::Instant;

use log::info;
use signet_shared::Matchmaker;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::queue::{Action, ActionReceiver, ActionSender};
use crate::server::EngineCore;
use crate::token::TokenConfig;
use crate::transport::Transport;

/// Log a stats line every this many matcher passes.
const STATS_PASSES: u64 = 100;

/// The top-level engine for "matchmaking" mode, generic over the host's
/// matching policy and the transport.
pub struct MatchmakingServer<M: Matchmaker, T: Transport> {
    core: Arc<EngineCore<M::Entry, T>>,
    matcher: M,
    actions: ActionReceiver,
}

impl<M: Matchmaker, T: Transport> MatchmakingServer<M, T> {
    pub fn new(
        config: EngineConfig,
        tokens: &TokenConfig,
        transport: Arc<T>,
        actions_tx: ActionSender,
        actions_rx: ActionReceiver,
        matcher: M,
    ) -> Self {
        Self {
            core: EngineCore::new(config, tokens, transport, actions_tx, true),
            matcher,
            actions: actions_rx,
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.core.metrics)
    }

    /// Main loop: connection events, the session tick for the queue entries,
    /// and the matcher pass, each on its own arm.
    pub async fn run(&mut self) {
        let mut ticks = interval(self.core.config.tick_period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut matches = interval(self.core.config.match_period);
        matches.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_tick = Instant::now();
        let mut last_match = Instant::now();
        let mut pass_count: u64 = 0;

        info!(
            "matchmaking server running, match period {:?}",
            self.core.config.match_period
        );

        loop {
            tokio::select! {
                action = self.actions.recv() => {
                    match action {
                        Some(Action::Shutdown) | None => {
                            info!("matchmaking server shutting down");
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
                        let payload = self.matcher.cancel_payload();
                        self.core.finalize_cancelled(&inst, payload);
                    }
                }
                _ = matches.tick() => {
                    let now = Instant::now();
                    let delta_ms = now.duration_since(last_match).as_millis() as u64;
                    last_match = now;

                    self.match_players(delta_ms);
                    pass_count += 1;
                    if pass_count % STATS_PASSES == 0 {
                        self.core.log_stats();
                    }
                }
            }
        }
    }

    /// One matcher pass: clone a read-only snapshot of the queued entries
    /// under lock, let the policy partition it, and announce every group.
    /// The matcher never touches live entries.
    fn match_players(&mut self, delta_ms: u64) {
        let queue = self.core.registry.entry_snapshot();
        if queue.is_empty() {
            return;
        }
        let groups = self.matcher.match_groups(&queue, delta_ms);
        for group in &groups {
            self.core.launch_group(group);
        }
    }
}
