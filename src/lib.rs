//! # Shortstack
//!
//! A URL-shortening platform of three cooperating services glued by a
//! message bus and a shared cache.
//!
//! ## Architecture
//!
//! - **Shortener**: owns the URL <-> code mapping (Postgres), serves the
//!   gRPC contract, emits analytics events, and warms the resolution cache
//!   from the hot-set topic
//! - **Statistics**: consumes events into batched ClickHouse writes and
//!   periodically publishes the top-resolved set under a cache-elected
//!   leader lock
//! - **Gateway**: HTTP façade translating the RPC to JSON and redirects
//!
//! Codes are the base-62, least-significant-digit-first rendering of the
//! store's 64-bit auto-incremented row id.

pub mod base62;
pub mod bus;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod models;
pub mod scheduler;
pub mod shortener;
pub mod statistics;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Generated RPC contract.
pub mod proto {
    pub mod shortener {
        pub mod v1 {
            tonic::include_proto!("shortener.v1");
        }
    }
}
