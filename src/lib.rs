//! Floodgate - In-Process Request Rate Limiting
//!
//! This crate implements a request-rate-limiting engine: each incoming
//! request is mapped to one or more composite identity keys, and each key
//! is charged against a token-bucket budget held in a concurrent,
//! TTL-expiring store. The engine is a pure in-memory decision function;
//! the HTTP transport, configuration source, and telemetry sinks are
//! external collaborators.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
