//! CLI command modules.

pub mod connect;
pub mod http;
pub mod keys;
