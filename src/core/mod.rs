pub mod config;
pub mod fingerprint;
pub mod paths;
pub mod schema;
pub mod signal;
