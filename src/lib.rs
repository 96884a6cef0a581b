//! Turnstile - In-Process Admission Control
//!
//! This crate implements a rate limiting engine for request-serving frontends.
//! Each inbound request is resolved to an identity (client IP, user token, or
//! either one scoped to an endpoint) and checked against a time-windowed
//! attempt log that expires lazily as new attempts arrive.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod replay;
