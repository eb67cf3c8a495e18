#![deny(warnings)]

//! Scheduling runtime for the AI lab progression engine.
//!
//! [`Engine`] is the request/response facade used by an application layer.
//! Each entry point runs as one short transaction against a [`Store`]
//! (admit, debit and persist; or complete, reward and promote), then hands
//! completion callbacks to a [`CompletionScheduler`] and notification
//! records to a [`NotificationSink`] after the transaction commits.
//!
//! Deadlines are kept in per-owner effective time. The [`TimeAuthority`]
//! maps them to the real instants callbacks are registered at.

mod admission;
mod capacity;
mod clock;
mod engine;
mod lifecycle;
mod notify;
mod progression;
mod scheduler;
mod store;
#[cfg(test)]
mod test_support;
mod time;

pub use admission::*;
pub use capacity::*;
pub use clock::*;
pub use engine::*;
pub use lifecycle::{
    CompletionOutcome, CompletionRecord, JobOptions, JobQuote, Promotion, StartOutcome,
};
pub use notify::*;
pub use progression::*;
pub use scheduler::*;
pub use store::*;
pub use time::*;
