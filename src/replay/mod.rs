//! Line-oriented replay of requests through the admission engine.
//!
//! Stands in for a request-serving frontend: each line names a client
//! address, a verb, a resource, and optionally an authorization value.

mod harness;
mod request;

pub use harness::{ReplayHarness, Verdict, STATUS_DROPPED};
pub use request::RequestContext;
