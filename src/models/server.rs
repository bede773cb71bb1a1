// src/models/server.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use crate::utils::{format_ipv4, ipv4_from_u32, ipv4_to_u32};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AppId(pub u32);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform identity of a game server. Zero means the server never
/// registered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ServerId(pub u64);

impl ServerId {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Snapshot of one server as of its last successful response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Host-order IPv4 address.
    pub ip: u32,
    pub port: u16,
    pub app_id: AppId,
    pub server_id: ServerId,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub game_dir: String,
    #[serde(default)]
    pub game_description: String,
    /// Comma-delimited tags.
    #[serde(default)]
    pub game_tags: String,
    /// Comma-delimited game data, matched by the `gamedata*` filters.
    #[serde(default)]
    pub game_data: String,
    pub server_version: u32,
    pub max_players: u32,
    /// Total players, bots included.
    pub players: u32,
    pub bot_players: u32,
    pub password: bool,
    pub secure: bool,
    pub dedicated: bool,
    pub linux: bool,
    /// Round trip in milliseconds.
    pub ping: u32,
    pub had_successful_response: bool,
    pub do_not_refresh: bool,
    /// Unix time this server was last played on, for favorites and history.
    pub time_last_played: u32,
}

impl ServerRecord {
    /// A record that only knows where the server lives.
    pub fn unknown(addr: SocketAddrV4) -> Self {
        Self {
            ip: ipv4_to_u32(*addr.ip()),
            port: addr.port(),
            ..Self::default()
        }
    }

    pub fn addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip_addr(), self.port)
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        ipv4_from_u32(self.ip)
    }

    pub fn address_string(&self) -> String {
        format_ipv4(self.ip, self.port)
    }

    /// Display name, or `IP:port` while the server has not reported one.
    pub fn name(&self) -> String {
        if self.server_name.is_empty() {
            self.address_string()
        } else {
            self.server_name.clone()
        }
    }

    pub fn is_full(&self) -> bool {
        self.players >= self.max_players
    }

    pub fn human_players(&self) -> u32 {
        self.players.saturating_sub(self.bot_players)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        split_list(&self.game_tags)
    }

    pub fn game_data_items(&self) -> impl Iterator<Item = &str> {
        split_list(&self.game_data)
    }

    /// Folds a fresh probe result into this record, keeping what the probe
    /// cannot know.
    pub fn merge_response(&mut self, fresh: ServerRecord) {
        let time_last_played = self.time_last_played;
        let app_id = self.app_id;
        *self = fresh;
        if self.time_last_played == 0 {
            self.time_last_played = time_last_played;
        }
        if self.app_id.0 == 0 {
            self.app_id = app_id;
        }
        self.had_successful_response = true;
        self.do_not_refresh = false;
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Which directory a server list is enumerated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListKind {
    Internet,
    Lan,
    Friends,
    Favorites,
    History,
    Spectator,
}

impl ListKind {
    pub const ALL: [ListKind; 6] = [
        ListKind::Internet,
        ListKind::Lan,
        ListKind::Friends,
        ListKind::Favorites,
        ListKind::History,
        ListKind::Spectator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Internet => "internet",
            ListKind::Lan => "lan",
            ListKind::Friends => "friends",
            ListKind::Favorites => "favorites",
            ListKind::History => "history",
            ListKind::Spectator => "spectator",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ListKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown list kind '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDetail {
    pub name: String,
    pub score: i32,
    /// Seconds connected.
    pub time_played: f32,
}

impl PlayerDetail {
    pub fn new(name: impl Into<String>, score: i32, time_played: f32) -> Self {
        Self { name: name.into(), score, time_played }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRule {
    pub key: String,
    pub value: String,
}

impl ServerRule {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}
