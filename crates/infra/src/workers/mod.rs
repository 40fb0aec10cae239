//! Background threads that consume bus subscriptions.

pub mod subscriber_worker;

pub use subscriber_worker::{SubscriberWorker, WorkerHandle};
