//! Interception layer
//!
//! - [`tracked`]: `UsageTracker::intercept*`, the generic wrapper
//! - [`client`]: `TrackedClient`, a proxy over a concrete client

pub mod client;
pub mod tracked;

pub use client::{BlockingMessagesApi, MESSAGES_CREATE, MessagesApi, TrackedClient, TrackedMessages};
