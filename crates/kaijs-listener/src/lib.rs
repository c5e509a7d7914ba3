//! The kaijs listener.
//!
//! Subscribes to broker topics through a `BrokerSource`, converts every
//! accepted message into a spool envelope, and acknowledges the broker only
//! after the envelope is durably on disk. Malformed JSON is acknowledged
//! and dropped: it can never be re-processed, and a negative ack would
//! poison-pill the subscription.

pub mod config;
pub mod listener;
pub mod source;

pub use config::{ListenerConfig, TopicSpec};
pub use listener::{Listener, ListenerError};
pub use source::{BrokerSource, Delivery, LinkHealth};
