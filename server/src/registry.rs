//! Session registry: who is connected as whom, which session each player is
//! in, the live session list, and the archive of ended sessions.
//!
//! Each map sits behind its own mutex. Lock order, where nesting is needed:
//! a registry map may be followed by a session record's own mutex, never the
//! reverse. No registry lock is held across transport I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::warn;
use signet_shared::{ConnectionId, PlayerId, Session, SessionId};

use crate::metrics::EngineMetrics;
use crate::session::SessionInstance;

/// Result tokens of one ended session, retrievable until `expires_at`.
struct ArchiveEntry {
    tokens: HashMap<PlayerId, String>,
    expires_at: Instant,
}

pub(crate) struct Registry<S: Session> {
    connections: Mutex<HashMap<ConnectionId, PlayerId>>,
    players: Mutex<HashMap<PlayerId, Arc<SessionInstance<S>>>>,
    live: Mutex<HashMap<SessionId, Arc<SessionInstance<S>>>>,
    archive: Mutex<HashMap<SessionId, ArchiveEntry>>,
    metrics: Arc<EngineMetrics>,
}

impl<S: Session> Registry<S> {
    pub(crate) fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            players: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            archive: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    pub(crate) fn bind(&self, conn: ConnectionId, player: PlayerId) {
        self.connections.lock().unwrap().insert(conn, player);
    }

    pub(crate) fn unbind(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.connections.lock().unwrap().remove(&conn)
    }

    pub(crate) fn player_for(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.connections.lock().unwrap().get(&conn).copied()
    }

    /// Add a freshly constructed session to the live list and index its
    /// roster. A player already indexed to another live session keeps their
    /// existing mapping; the collision is logged and that player will never
    /// be admitted here.
    pub(crate) fn register(&self, inst: Arc<SessionInstance<S>>) {
        for player in inst.players() {
            let mut players = self.players.lock().unwrap();
            if players.contains_key(&player) {
                warn!(
                    "player {} is already in a live session; not indexing into session {}",
                    player,
                    inst.id()
                );
            } else {
                players.insert(player, Arc::clone(&inst));
            }
        }
        self.live.lock().unwrap().insert(inst.id(), inst);
        self.metrics.session_opened();
    }

    /// Drop a session from the live list and from the player index. Only
    /// index entries that point at this very record are removed.
    pub(crate) fn unregister(&self, inst: &Arc<SessionInstance<S>>) {
        {
            let mut players = self.players.lock().unwrap();
            for player in inst.players() {
                let owned_here = players
                    .get(&player)
                    .map_or(false, |current| Arc::ptr_eq(current, inst));
                if owned_here {
                    players.remove(&player);
                }
            }
        }
        if self.live.lock().unwrap().remove(&inst.id()).is_some() {
            self.metrics.session_closed();
        }
    }

    pub(crate) fn session_of(&self, player: PlayerId) -> Option<Arc<SessionInstance<S>>> {
        self.players.lock().unwrap().get(&player).cloned()
    }

    /// Restore a player's index entry after an earlier collision resolved.
    pub(crate) fn index_player(&self, player: PlayerId, inst: Arc<SessionInstance<S>>) {
        self.players.lock().unwrap().entry(player).or_insert(inst);
    }

    pub(crate) fn session_by_id(&self, id: SessionId) -> Option<Arc<SessionInstance<S>>> {
        self.live.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn live_snapshot(&self) -> Vec<Arc<SessionInstance<S>>> {
        self.live.lock().unwrap().values().cloned().collect()
    }

    /// File the result tokens of an ended session. Called before the record
    /// leaves the live list, so no reconnect window is ever uncovered.
    pub(crate) fn archive(
        &self,
        id: SessionId,
        tokens: HashMap<PlayerId, String>,
        expires_at: Instant,
    ) {
        self.archive
            .lock()
            .unwrap()
            .insert(id, ArchiveEntry { tokens, expires_at });
        self.metrics.session_archived();
    }

    pub(crate) fn is_archived(&self, id: SessionId) -> bool {
        self.archive.lock().unwrap().contains_key(&id)
    }

    /// The archived result token for one player of one ended session.
    pub(crate) fn archived_token(&self, id: SessionId, player: PlayerId) -> Option<String> {
        self.archive
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|entry| entry.tokens.get(&player).cloned())
    }

    /// Drop archive entries past their retention. Monotone by age; an entry
    /// never comes back.
    pub(crate) fn purge_archive(&self, now: Instant) -> usize {
        let mut archive = self.archive.lock().unwrap();
        let before = archive.len();
        archive.retain(|_, entry| entry.expires_at > now);
        let purged = before - archive.len();
        if purged > 0 {
            self.metrics.archive_purged(purged as u64);
        }
        purged
    }
}

impl<S: Session + Clone> Registry<S> {
    /// Clone every queued entry under its own lock: the read-only snapshot
    /// handed to the matcher. Entries that already withdrew are skipped.
    pub(crate) fn entry_snapshot(&self) -> HashMap<SessionId, S> {
        let live = self.live.lock().unwrap();
        live.iter()
            .filter_map(|(id, inst)| inst.snapshot_entry().map(|entry| (*id, entry)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testutil::{two_player_payload, EchoGame};
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> Registry<EchoGame> {
        Registry::new(Arc::new(EngineMetrics::default()))
    }

    fn session(id: u64, payload: &serde_json::Value) -> Arc<SessionInstance<EchoGame>> {
        Arc::new(SessionInstance::new(
            SessionId(id),
            EchoGame::from_payload(payload).unwrap(),
        ))
    }

    #[test]
    fn register_indexes_every_rostered_player() {
        let reg = registry();
        let inst = session(77, &two_player_payload());
        reg.register(Arc::clone(&inst));

        for pid in [PlayerId(1), PlayerId(2)] {
            let found = reg.session_of(pid).unwrap();
            assert_eq!(found.id(), SessionId(77));
        }
        assert_eq!(reg.live_snapshot().len(), 1);
    }

    #[test]
    fn a_player_is_never_indexed_to_two_live_sessions() {
        let reg = registry();
        let first = session(77, &two_player_payload());
        let second = session(78, &json!({ "players": [2, 3] }));
        reg.register(Arc::clone(&first));
        reg.register(Arc::clone(&second));

        // player 2 keeps their original session; player 3 joins the new one
        assert_eq!(reg.session_of(PlayerId(2)).unwrap().id(), SessionId(77));
        assert_eq!(reg.session_of(PlayerId(3)).unwrap().id(), SessionId(78));
    }

    #[test]
    fn unregister_leaves_foreign_index_entries_alone() {
        let reg = registry();
        let first = session(77, &two_player_payload());
        let second = session(78, &json!({ "players": [2, 3] }));
        reg.register(Arc::clone(&first));
        reg.register(Arc::clone(&second));

        reg.unregister(&second);
        assert_eq!(reg.session_of(PlayerId(2)).unwrap().id(), SessionId(77));
        assert!(reg.session_of(PlayerId(3)).is_none());
        assert!(reg.session_by_id(SessionId(78)).is_none());
    }

    #[test]
    fn bindings_resolve_both_ways() {
        let reg = registry();
        let inst = session(77, &two_player_payload());
        reg.register(Arc::clone(&inst));
        reg.bind(ConnectionId(5), PlayerId(1));
        inst.connect(PlayerId(1), ConnectionId(5));

        // invariant: reverse lookup from the player yields the session whose
        // connection map holds this very connection
        let player = reg.player_for(ConnectionId(5)).unwrap();
        let found = reg.session_of(player).unwrap();
        assert_eq!(found.connection_of(player), Some(ConnectionId(5)));

        assert_eq!(reg.unbind(ConnectionId(5)), Some(PlayerId(1)));
        assert_eq!(reg.player_for(ConnectionId(5)), None);
    }

    #[test]
    fn archive_roundtrip_and_purge() {
        let reg = registry();
        let mut tokens = HashMap::new();
        tokens.insert(PlayerId(1), "token-1".to_string());
        let now = Instant::now();
        reg.archive(SessionId(77), tokens, now + Duration::from_secs(60));

        assert_eq!(
            reg.archived_token(SessionId(77), PlayerId(1)).as_deref(),
            Some("token-1")
        );
        assert_eq!(reg.archived_token(SessionId(77), PlayerId(2)), None);

        assert_eq!(reg.purge_archive(now + Duration::from_secs(30)), 0);
        assert_eq!(reg.purge_archive(now + Duration::from_secs(61)), 1);
        assert_eq!(reg.archived_token(SessionId(77), PlayerId(1)), None);
    }

    #[test]
    fn archive_never_resurrects_a_session() {
        let reg = registry();
        reg.archive(
            SessionId(77),
            HashMap::new(),
            Instant::now() + Duration::from_secs(60),
        );
        assert!(reg.session_by_id(SessionId(77)).is_none());
        assert_eq!(reg.live_snapshot().len(), 0);
    }
}
