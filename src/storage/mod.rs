// src/storage/mod.rs
pub mod handles;
pub mod memory;
