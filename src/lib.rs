pub mod config;
pub mod cookies;
pub mod download;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod logging;
pub mod manifest;
pub mod store;
