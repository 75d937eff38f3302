//! Runtime asset provisioning
//!
//! Assets are downloaded once, verified against their sha256 and unpacked
//! into `<cache_dir>/deps/<hash>`. Commands see them through the derived
//! [`Environment`].

pub mod archive;
pub mod fetch;
pub mod manager;

pub use fetch::{Fetcher, HttpFetcher};
pub use manager::{AssetManager, Environment};
