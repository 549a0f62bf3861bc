//! Core record model, delivery events, and time abstraction.
//!
//! Provides the types shared between the delivery engine and its callers:
//! the [`Record`] submitted by producers, the [`DeliveryEvent`] stream emitted
//! by consumer workers, and the [`Clock`] used for backoff sleeps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod models;
pub mod time;

pub use events::{
    AbandonReason, AttemptFailedEvent, BatchAbandonedEvent, BatchDeliveredEvent, DeliveryEvent,
    EventHandler, MulticastEventHandler, NoOpEventHandler,
};
pub use models::{Record, RecordMeta};
pub use time::{Clock, RealClock, TestClock};
