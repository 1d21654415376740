//! Event stream fan-out and durable event logging.

pub mod log;
pub mod stream;
pub mod subscribers;

pub use log::EventLogWriter;
pub use stream::{EventStream, Subscriber, SubscriberHandle, SUBSCRIBER_QUEUE_CAPACITY};
pub use subscribers::EventLogSubscriber;
