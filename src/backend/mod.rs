// src/backend/mod.rs
//! Network side of the directory client.
//!
//! A backend answers four questions: which servers a directory lists, and
//! what a single server says to a ping, a player query or a rules query.
//! It never sees handles or listeners; the client owns that bookkeeping.

pub mod challenge;
pub mod master;

use async_trait::async_trait;
use std::net::SocketAddrV4;
use crate::error::BackendError;
use crate::models::filter::Filter;
use crate::models::server::{AppId, ListKind, PlayerDetail, ServerRecord, ServerRule};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Lists the servers of one directory. Returned records seed the list
    /// before any probe answers; only the address is required.
    async fn enumerate(
        &self,
        kind: ListKind,
        app_id: AppId,
        filters: &[Filter],
    ) -> Result<Vec<ServerRecord>, BackendError>;

    async fn ping(&self, addr: SocketAddrV4) -> Result<ServerRecord, BackendError>;

    async fn players(&self, addr: SocketAddrV4) -> Result<Vec<PlayerDetail>, BackendError>;

    async fn rules(&self, addr: SocketAddrV4) -> Result<Vec<ServerRule>, BackendError>;
}
