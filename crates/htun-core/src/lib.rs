//! htun-core — shared types, wire format, and cryptographic primitives.
//! All other htun crates depend on this one.

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod framing;
pub mod packet;
pub mod setting;

pub use setting::ClientSetting;
