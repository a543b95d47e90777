pub mod config;
pub mod error;
pub mod identity;
pub mod resources;
pub mod security;
pub mod server;
pub mod storage;
pub mod users;
