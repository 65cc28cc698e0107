//! Powerwall gateway module
//!
//! Provides the reading source the coordinator polls.

pub mod client;
pub mod source;
pub mod types;

pub use client::PowerwallClient;
pub use source::ReadingSource;
pub use types::*;
