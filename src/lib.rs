//! Gatekeeper - Per-Client Admission Control
//!
//! This crate implements a token bucket rate limiter keyed by client identity.
//! Per-client state lives in a concurrent registry, a background task evicts
//! idle clients, and an axum middleware admits or rejects each request before
//! it reaches the application behind it.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
