pub mod fingerprint;
mod migrations;
pub mod store;
