//! Fixed-response TCP fixture and the load generators that drive it.
//!
//! - `server`: listener and per-connection dispatch
//! - `runtime`: tokio runtime setup and the read-respond handler
//! - `protocols::hello`: the request and response bytes
//! - `bench`: throughput and latency clients

pub mod bench;
pub mod config;
pub mod protocols;
pub mod runtime;
pub mod server;
