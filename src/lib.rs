pub mod auth;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod resolver;
pub mod server;
pub mod storage;
