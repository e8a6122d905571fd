//! Tollgate - Store-backed Request Rate Limiting
//!
//! This crate implements a fixed-window request rate limiter that runs as a
//! stage in an HTTP request pipeline. Counters live in a record store
//! (in-process or Redis) and each decision is a single atomic store call,
//! so any number of gateway instances can share one limit.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use http::StatusBody;
