// src/models/master.rs
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use crate::models::server::{AppId, PlayerDetail, ServerRecord, ServerRule};
use crate::utils::ipv4_to_u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub gen: i32,
    pub lvl: i32,
    pub team: i32,
}

/// One entry of the master server list, as published by the heartbeat
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub id: String,
    pub host_name: String,
    pub map_name: String,
    pub game_mode: String,
    #[serde(default)]
    pub players: Vec<Player>,
    pub max_players: i32,
    pub port: i32,
    pub ip: String,
    #[serde(default)]
    pub last_heartbeat: u64,
}

impl ServerInfo {
    /// None for IPv6 or out of range ports, which the directory does not
    /// support.
    pub fn addr(&self) -> Option<SocketAddrV4> {
        let ip: Ipv4Addr = self.ip.trim().parse().ok()?;
        let port = u16::try_from(self.port).ok()?;
        Some(SocketAddrV4::new(ip, port))
    }

    pub fn to_record(&self, app_id: AppId) -> Option<ServerRecord> {
        let addr = self.addr()?;
        Some(ServerRecord {
            ip: ipv4_to_u32(*addr.ip()),
            port: addr.port(),
            app_id,
            server_name: self.host_name.clone(),
            map: self.map_name.clone(),
            game_description: self.game_mode.clone(),
            game_tags: self.game_mode.clone(),
            max_players: u32::try_from(self.max_players).unwrap_or(0),
            players: self.players.len() as u32,
            ..ServerRecord::default()
        })
    }

    /// Player level doubles as the score; the master does not track time
    /// connected.
    pub fn player_details(&self) -> Vec<PlayerDetail> {
        self.players
            .iter()
            .map(|p| PlayerDetail::new(p.name.as_str(), p.lvl, 0.0))
            .collect()
    }

    pub fn rules(&self) -> Vec<ServerRule> {
        vec![
            ServerRule::new("hostname", self.host_name.as_str()),
            ServerRule::new("map", self.map_name.as_str()),
            ServerRule::new("gamemode", self.game_mode.as_str()),
            ServerRule::new("maxplayers", self.max_players.to_string()),
        ]
    }
}
