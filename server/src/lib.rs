//! `SyncGuard` Server
//!
//! Burst-aware admission control for chat endpoints, served as axum
//! middleware in front of the application routes.

pub mod api;
pub mod config;
pub mod ratelimit;
