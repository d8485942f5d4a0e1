//! Bundle Vault
//!
//! Content-addressed storage for plain files and zip bundles, with on-demand
//! reconstruction of the original archives.
//!
//! - [`ingest`]: files and zip containers into deduplicated blobs plus bundle records
//! - [`reconstruct`]: bundle name back into a byte stream (rebuilt zip or raw file)
//! - [`storage`]: blob stores, remote blob source and metadata repositories
//! - [`server`]: thin HTTP delivery layer

pub mod archive;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod reconstruct;
pub mod server;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result};
