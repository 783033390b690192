//! Event delivery: listener registries, generators and waiters.

pub mod generator;
pub mod listener;
pub mod wait;

pub use generator::{EventCallback, EventGenerator, EventStack, ListChange, ListEventGenerator};
pub use listener::{listener_fn, ListenerId, ListenerRegistry, TaurusListener};
pub use wait::AttributeEventWait;
