//! Wire access to cluster members.

pub mod client;
pub mod probe;
pub mod resp;

pub use client::{
    RedisClientError, RedisClientResult, RedisConnection, TlsMode, client_cert_secret_name,
    fetch_tls_material, server_cert_secret_name,
};
pub use probe::RespTopologyProbe;
pub use resp::{RespError, RespValue};
