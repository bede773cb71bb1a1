// src/models/mod.rs
pub mod filter;
pub mod master;
pub mod server;
