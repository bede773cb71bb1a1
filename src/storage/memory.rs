// src/storage/memory.rs
use dashmap::DashMap;
use std::net::SocketAddrV4;
use crate::models::server::{AppId, ServerRecord};
use crate::utils::unix_now;

#[derive(Debug, Clone)]
struct BookEntry {
    record: ServerRecord,
    favorite: bool,
}

/// In-memory favorites and history. Backs the Favorites and History list
/// kinds; nothing here is written to disk.
pub struct ServerBook {
    entries: DashMap<(AppId, SocketAddrV4), BookEntry>,
    max_history_entries: usize,
}

impl ServerBook {
    pub fn new(max_history_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_history_entries,
        }
    }

    /// Returns false when the server was already a favorite.
    pub fn add_favorite(&self, app_id: AppId, addr: SocketAddrV4) -> bool {
        let mut entry = self.entries.entry((app_id, addr)).or_insert_with(|| BookEntry {
            record: ServerRecord { app_id, ..ServerRecord::unknown(addr) },
            favorite: false,
        });
        let added = !entry.favorite;
        entry.favorite = true;
        added
    }

    pub fn remove_favorite(&self, app_id: AppId, addr: SocketAddrV4) -> bool {
        let key = (app_id, addr);
        let removed = match self.entries.get_mut(&key) {
            Some(mut entry) if entry.favorite => {
                entry.favorite = false;
                true
            }
            _ => false,
        };
        // Drop entries that are neither favorite nor history.
        self.entries.remove_if(&key, |_, entry| !entry.favorite && entry.record.time_last_played == 0);
        removed
    }

    /// Records a play session, evicting the oldest history entries past the
    /// configured limit.
    pub fn record_played(&self, app_id: AppId, addr: SocketAddrV4, when: Option<u32>) {
        let when = when.unwrap_or_else(unix_now);
        {
            let mut entry = self.entries.entry((app_id, addr)).or_insert_with(|| BookEntry {
                record: ServerRecord { app_id, ..ServerRecord::unknown(addr) },
                favorite: false,
            });
            entry.record.time_last_played = when;
        }

        let mut history: Vec<((AppId, SocketAddrV4), u32)> = self
            .entries
            .iter()
            .filter(|r| r.key().0 == app_id && r.value().record.time_last_played > 0)
            .map(|r| (*r.key(), r.value().record.time_last_played))
            .collect();
        if history.len() <= self.max_history_entries {
            return;
        }
        history.sort_by_key(|(_, played)| *played);
        let excess = history.len() - self.max_history_entries;
        for (key, _) in history.into_iter().take(excess) {
            let keep = match self.entries.get_mut(&key) {
                Some(mut entry) if entry.favorite => {
                    entry.record.time_last_played = 0;
                    true
                }
                _ => false,
            };
            if !keep {
                self.entries.remove(&key);
            }
        }
    }

    /// Stores the latest snapshot for a server already in the book.
    pub fn remember(&self, record: &ServerRecord) {
        if let Some(mut entry) = self.entries.get_mut(&(record.app_id, record.addr())) {
            let played = entry.record.time_last_played;
            entry.record = record.clone();
            entry.record.time_last_played = played;
        }
    }

    pub fn favorites(&self, app_id: AppId) -> Vec<ServerRecord> {
        self.collect(app_id, |entry| entry.favorite)
    }

    /// Most recently played first.
    pub fn history(&self, app_id: AppId) -> Vec<ServerRecord> {
        let mut records = self.collect(app_id, |entry| entry.record.time_last_played > 0);
        records.sort_by(|a, b| b.time_last_played.cmp(&a.time_last_played));
        records
    }

    fn collect(&self, app_id: AppId, keep: impl Fn(&BookEntry) -> bool) -> Vec<ServerRecord> {
        let mut records: Vec<ServerRecord> = self
            .entries
            .iter()
            .filter(|r| r.key().0 == app_id && keep(r.value()))
            .map(|r| r.value().record.clone())
            .collect();
        if records.len() > 1 {
            records.sort_by_key(|r| (r.ip, r.port));
        }
        records
    }
}
