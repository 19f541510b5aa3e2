// Infrastructure layer - External dependencies and adapters
pub mod archiver_client;
pub mod config;
