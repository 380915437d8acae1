//! Data types shared across the tracker

pub mod call;
pub mod event;
pub mod options;
pub mod usage;

pub use call::{ApiError, CallError, classify_error};
pub use event::{PROVIDER, UNKNOWN_MODEL, UsageEvent, UsageEventBuilder};
pub use options::TrackingOptions;
pub use usage::{MessagesResponse, MessagesUsage, ReportedUsage, UsageSource};
