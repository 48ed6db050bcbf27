//! # Geosync
//!
//! Primary/secondary replication engine for self-hosted git installations,
//! usable both as a standalone binary and as a library.
//!
//! A primary appends to an ordered event log; each secondary runs a sync
//! scheduler that picks never-synced, failed and dirty projects under an
//! exclusive lease and dispatches one mirroring job per project. Per-node
//! registries record the outcome and feed the status endpoint.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! geosync = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geosync::config::GeoConfig;
//! use geosync::server::{AppState, create_router};
//! use geosync::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::new("./data/geosync.db").unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(
//!     Arc::new(store),
//!     Arc::new(GeoConfig::default()),
//!     "https://geo-2.example.com/",
//! ));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod geo;
pub mod server;
pub mod store;
pub mod types;
