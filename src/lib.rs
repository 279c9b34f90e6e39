//! Offline cache agent for web application shells.
//!
//! The agent precaches a fixed asset list under a versioned cache
//! identifier, prunes older generations when it activates, and answers
//! GET requests cache-first, falling back to the network and then to the
//! cached shell page.

pub mod agent;
pub mod cache;
pub mod config;
pub mod host;
pub mod logging;
pub mod net;
