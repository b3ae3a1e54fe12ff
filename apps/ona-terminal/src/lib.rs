pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod services;
pub mod store;
