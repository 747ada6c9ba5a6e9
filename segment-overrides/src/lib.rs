pub mod api;
pub mod assembler;
pub mod client;
pub mod config;
pub mod merge;
pub mod models;
pub mod reconcile;
pub mod reindex;
pub mod session;
pub mod value;
