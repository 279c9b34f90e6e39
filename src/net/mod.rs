//! Network collaborator used by the agent.
//!
//! The agent never builds requests itself: it receives `Request`
//! descriptors at the interception boundary and hands misses to a
//! `Network` implementation. `HttpNetwork` is the reqwest-backed one.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{cache_key, resolve_url, Request, Response};

#[cfg(test)]
pub mod testing;
