//! The broker ingress contract.
//!
//! Both broker clients (AMQP 1.0 UMB and AMQP 0.9.1 RabbitMQ) live outside
//! this crate; each yields the same delivery shape through this trait. The
//! listener owns the source for its whole life and drives it serially.

use async_trait::async_trait;
use serde_json::Value;

use crate::listener::ListenerError;

/// One message handed over by a broker client.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned message id; stable across redeliveries.
    pub msg_id: String,
    /// Raw topic as subscribed (a `topic://` prefix is tolerated).
    pub topic: String,
    /// Undecoded message body.
    pub body: Vec<u8>,
    /// Verbatim broker headers.
    pub headers: Value,
}

impl Delivery {
    /// Timestamp from the broker headers, normalized to unix seconds.
    /// Millisecond values are recognized by magnitude.
    pub fn header_ts(&self) -> Option<i64> {
        let raw = self.headers.get("timestamp")?.as_i64()?;
        if raw > 100_000_000_000 {
            Some(raw / 1000)
        } else {
            Some(raw)
        }
    }
}

/// Link and session counters for the liveness snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHealth {
    pub links_open_local: u32,
    pub links_open_remote: u32,
    pub links_closed: u32,
    pub sessions_closed: u32,
}

impl LinkHealth {
    /// A violated snapshot makes the listener exit for the orchestrator to
    /// restart it.
    pub fn violation(&self) -> Option<ListenerError> {
        if self.links_open_local != self.links_open_remote {
            return Some(ListenerError::LinkMismatch {
                local: self.links_open_local,
                remote: self.links_open_remote,
            });
        }
        if self.links_closed > 0 {
            return Some(ListenerError::LinkClosed {
                count: self.links_closed,
            });
        }
        if self.sessions_closed > 0 {
            return Some(ListenerError::SessionClosed {
                count: self.sessions_closed,
            });
        }
        None
    }
}

/// A broker subscription.
#[async_trait]
pub trait BrokerSource: Send {
    /// The next delivery, or `None` when the connection has closed.
    async fn receive(&mut self) -> Result<Option<Delivery>, ListenerError>;

    /// Positively acknowledge a delivery.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), ListenerError>;

    /// Current link/session counters.
    fn health(&self) -> LinkHealth;

    /// Close links with their sessions, then the connection.
    async fn close(&mut self) -> Result<(), ListenerError>;
}

/// Placeholder source for builds without a broker client: never yields a
/// delivery and reports one healthy link, so the listener idles until
/// signalled.
#[derive(Debug, Default)]
pub struct IdleSource;

#[async_trait]
impl BrokerSource for IdleSource {
    async fn receive(&mut self) -> Result<Option<Delivery>, ListenerError> {
        std::future::pending().await
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), ListenerError> {
        Ok(())
    }

    fn health(&self) -> LinkHealth {
        LinkHealth {
            links_open_local: 1,
            links_open_remote: 1,
            ..LinkHealth::default()
        }
    }

    async fn close(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// In-memory source for tests: deliveries are scripted up front and acks
/// are recorded.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    deliveries: std::collections::VecDeque<Delivery>,
    acked: Vec<String>,
    health: LinkHealth,
    closed: bool,
}

impl ScriptedSource {
    pub fn new(deliveries: Vec<Delivery>) -> Self {
        ScriptedSource {
            deliveries: deliveries.into(),
            acked: Vec::new(),
            health: LinkHealth {
                links_open_local: 1,
                links_open_remote: 1,
                ..LinkHealth::default()
            },
            closed: false,
        }
    }

    pub fn set_health(&mut self, health: LinkHealth) {
        self.health = health;
    }

    pub fn acked(&self) -> &[String] {
        &self.acked
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl BrokerSource for ScriptedSource {
    async fn receive(&mut self) -> Result<Option<Delivery>, ListenerError> {
        Ok(self.deliveries.pop_front())
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), ListenerError> {
        self.acked.push(delivery.msg_id.clone());
        Ok(())
    }

    fn health(&self) -> LinkHealth {
        self.health
    }

    async fn close(&mut self) -> Result<(), ListenerError> {
        self.closed = true;
        Ok(())
    }
}
