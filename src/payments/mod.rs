//! Payment gateway integration: wire types, the gateway trait and its providers.

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;
