// src/backend/master.rs
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::Arc;
use crate::backend::{challenge, Backend};
use crate::config::Config;
use crate::error::{BackendError, DirectoryError};
use crate::models::filter::{matches_all, Filter};
use crate::models::master::ServerInfo;
use crate::models::server::{AppId, ListKind, PlayerDetail, ServerRecord, ServerRule};
use crate::storage::memory::ServerBook;

/// Directory backed by an r1 master server list, with servers probed over
/// UDP through the `connect` challenge.
///
/// Internet lists come from the master, LAN lists from a broadcast across
/// the configured network, favorites and history from the [`ServerBook`].
/// There is no friends or spectator directory; those lists come back empty.
pub struct MasterServerBackend {
    config: Config,
    http: reqwest::Client,
    book: Arc<ServerBook>,
    listings: DashMap<SocketAddrV4, (AppId, ServerInfo)>,
}

impl MasterServerBackend {
    pub fn new(config: Config, book: Arc<ServerBook>) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(config.master_timeout())
            .build()
            .map_err(|e| DirectoryError::Config(format!("Could not build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            book,
            listings: DashMap::new(),
        })
    }

    pub fn book(&self) -> &Arc<ServerBook> {
        &self.book
    }

    async fn fetch_listings(&self) -> Result<Vec<ServerInfo>, BackendError> {
        debug!("Fetching server list from {}", self.config.master_url);
        let response = self.http.get(&self.config.master_url).send().await?;
        let response = response.error_for_status()?;
        let listings: Vec<ServerInfo> = response.json().await?;
        info!("Master server listed {} servers", listings.len());
        Ok(listings)
    }

    async fn internet_servers(&self, app_id: AppId, filters: &[Filter]) -> Result<Vec<ServerRecord>, BackendError> {
        let listings = self.fetch_listings().await?;
        let mut records = Vec::with_capacity(listings.len());
        let mut listed = HashSet::with_capacity(listings.len());
        for listing in listings {
            let Some(record) = listing.to_record(app_id) else {
                warn!("Skipping listing {} with unsupported address {}:{}", listing.id, listing.ip, listing.port);
                continue;
            };
            let addr = record.addr();
            listed.insert(addr);
            self.listings.insert(addr, (app_id, listing));
            if matches_all(filters, &record) {
                records.push(record);
            }
        }
        // Servers gone from the master no longer have listing data.
        self.listings.retain(|addr, _| listed.contains(addr));
        Ok(records)
    }

    async fn lan_servers(&self, app_id: AppId) -> Result<Vec<ServerRecord>, BackendError> {
        let broadcast = self.config.lan_network.broadcast();
        let targets: Vec<SocketAddrV4> = (self.config.lan_port_min..=self.config.lan_port_max)
            .map(|port| SocketAddrV4::new(broadcast, port))
            .collect();
        debug!("Broadcasting LAN challenge to {} on {} ports", broadcast, targets.len());
        let found = challenge::broadcast(&targets, self.config.lan_window()).await?;
        Ok(found
            .into_iter()
            .map(|(addr, _)| ServerRecord { app_id, ..ServerRecord::unknown(addr) })
            .collect())
    }

    /// Known servers only have to pass the filters once we have data on
    /// them; never-seen entries are always listed so they get probed.
    fn booked(records: Vec<ServerRecord>, filters: &[Filter]) -> Vec<ServerRecord> {
        records
            .into_iter()
            .filter(|r| !r.had_successful_response || matches_all(filters, r))
            .collect()
    }

    fn listing(&self, addr: SocketAddrV4) -> Option<(AppId, ServerInfo)> {
        self.listings.get(&addr).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl Backend for MasterServerBackend {
    async fn enumerate(
        &self,
        kind: ListKind,
        app_id: AppId,
        filters: &[Filter],
    ) -> Result<Vec<ServerRecord>, BackendError> {
        match kind {
            ListKind::Internet => self.internet_servers(app_id, filters).await,
            ListKind::Lan => self.lan_servers(app_id).await,
            ListKind::Favorites => Ok(Self::booked(self.book.favorites(app_id), filters)),
            ListKind::History => Ok(Self::booked(self.book.history(app_id), filters)),
            ListKind::Friends | ListKind::Spectator => {
                debug!("No {} directory available, listing nothing", kind);
                Ok(Vec::new())
            }
        }
    }

    async fn ping(&self, addr: SocketAddrV4) -> Result<ServerRecord, BackendError> {
        let rtt = challenge::probe(addr, self.config.probe_timeout()).await?;
        let mut record = self
            .listing(addr)
            .and_then(|(app_id, info)| info.to_record(app_id))
            .unwrap_or_else(|| ServerRecord::unknown(addr));
        record.ping = rtt.as_millis().min(u32::MAX as u128) as u32;
        record.had_successful_response = true;
        self.book.remember(&record);
        debug!("{} answered in {}ms", addr, record.ping);
        Ok(record)
    }

    async fn players(&self, addr: SocketAddrV4) -> Result<Vec<PlayerDetail>, BackendError> {
        challenge::probe(addr, self.config.probe_timeout()).await?;
        Ok(self
            .listing(addr)
            .map(|(_, info)| info.player_details())
            .unwrap_or_default())
    }

    async fn rules(&self, addr: SocketAddrV4) -> Result<Vec<ServerRule>, BackendError> {
        challenge::probe(addr, self.config.probe_timeout()).await?;
        Ok(self
            .listing(addr)
            .map(|(_, info)| info.rules())
            .unwrap_or_default())
    }
}
