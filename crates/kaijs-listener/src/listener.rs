//! The listener loop.
//!
//! Serial on one source: receive, decode, append to the spool, then ack.
//! The spool append happens before the ack, so a crash in between leaves
//! the message unacknowledged at the broker and it is redelivered.
//! At-least-once, deduplicated downstream by `broker_msg_id`.

use std::time::Duration;

use kaijs_domain::SpoolMessage;
use kaijs_fq::FileQueue;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::source::{BrokerSource, Delivery};

/// Listener failure taxonomy; each broker condition has its own process
/// exit code for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("broker error: {0}")]
    Broker(String),

    #[error("open link count mismatch: local {local} != remote {remote}")]
    LinkMismatch { local: u32, remote: u32 },

    #[error("{count} link(s) closed")]
    LinkClosed { count: u32 },

    #[error("{count} session(s) closed")]
    SessionClosed { count: u32 },

    #[error("broker connection closed")]
    ConnectionClosed,

    #[error("spool error: {0}")]
    Spool(#[from] kaijs_fq::FqError),

    #[error("signal handler setup failed: {0}")]
    Signals(#[from] std::io::Error),
}

impl ListenerError {
    /// Process exit code; `0` is reserved for clean signal shutdown.
    pub fn exit_code(&self) -> i32 {
        match self {
            ListenerError::LinkMismatch { .. } => 11,
            ListenerError::LinkClosed { .. } => 12,
            ListenerError::SessionClosed { .. } => 21,
            ListenerError::ConnectionClosed => 22,
            ListenerError::Broker(_) => 31,
            ListenerError::Spool(_) | ListenerError::Signals(_) => 1,
        }
    }
}

/// The listener.
pub struct Listener<S: BrokerSource> {
    source: S,
    queue: FileQueue,
    provider_name: String,
    status_interval: Duration,
    queued: u64,
    consumed: u64,
}

impl<S: BrokerSource> Listener<S> {
    pub fn new(
        source: S,
        queue: FileQueue,
        provider_name: impl Into<String>,
        status_interval: Duration,
    ) -> Self {
        Listener {
            source,
            queue,
            provider_name: provider_name.into(),
            status_interval,
            queued: 0,
            consumed: 0,
        }
    }

    /// Run until the broker fails or a signal arrives. A clean signal
    /// shutdown closes the source and returns `Ok`.
    pub async fn run(&mut self) -> Result<(), ListenerError> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut status = tokio::time::interval(self.status_interval);
        status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        status.tick().await; // immediate first tick

        enum Event {
            Signal,
            Status,
            Received(Option<Delivery>),
        }

        loop {
            let event = tokio::select! {
                _ = sigint.recv() => Event::Signal,
                _ = sigterm.recv() => Event::Signal,
                _ = status.tick() => Event::Status,
                received = self.source.receive() => Event::Received(received?),
            };
            match event {
                Event::Signal => break,
                Event::Status => self.report_status()?,
                Event::Received(Some(delivery)) => self.handle(delivery).await?,
                Event::Received(None) => return Err(ListenerError::ConnectionClosed),
            }
        }

        info!("closing broker connection");
        self.source.close().await?;
        Ok(())
    }

    /// Drain the source until it is empty. Exposed for tests.
    pub async fn drain(&mut self) -> Result<(), ListenerError> {
        while let Some(delivery) = self.source.receive().await? {
            self.handle(delivery).await?;
        }
        Ok(())
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.queued, self.consumed)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn handle(&mut self, delivery: Delivery) -> Result<(), ListenerError> {
        self.consumed += 1;

        let body: serde_json::Value = match serde_json::from_slice(&delivery.body) {
            Ok(body) => body,
            Err(err) => {
                // Malformed JSON can never be re-processed; ack it away so
                // the broker does not redeliver a poison pill.
                warn!(
                    msg_id = %delivery.msg_id,
                    topic = %delivery.topic,
                    %err,
                    "dropping undecodable message body"
                );
                self.source.ack(&delivery).await?;
                return Ok(());
            }
        };

        let env = SpoolMessage::new(
            &self.provider_name,
            &delivery.msg_id,
            &delivery.topic,
            body,
            delivery.headers.clone(),
            delivery.header_ts(),
        );
        // Durable on disk first; only then does the broker forget it.
        self.queue.push(&env)?;
        self.source.ack(&delivery).await?;
        self.queued += 1;
        Ok(())
    }

    fn report_status(&self) -> Result<(), ListenerError> {
        let health = self.source.health();
        info!(
            queued = self.queued,
            consumed = self.consumed,
            links_open_local = health.links_open_local,
            links_open_remote = health.links_open_remote,
            links_closed = health.links_closed,
            sessions_closed = health.sessions_closed,
            "listener status"
        );
        match health.violation() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LinkHealth, ScriptedSource};
    use serde_json::json;

    fn delivery(msg_id: &str, body: &[u8]) -> Delivery {
        Delivery {
            msg_id: msg_id.to_string(),
            topic: "topic://VirtualTopic.eng.ci.osci.brew-build.test.complete".to_string(),
            body: body.to_vec(),
            headers: json!({"timestamp": 1_700_000_000}),
        }
    }

    fn listener(deliveries: Vec<Delivery>) -> (tempfile::TempDir, Listener<ScriptedSource>) {
        let dir = tempfile::tempdir().unwrap();
        let queue = FileQueue::open(dir.path()).unwrap();
        let listener = Listener::new(
            ScriptedSource::new(deliveries),
            queue,
            "umb",
            Duration::from_secs(60),
        );
        (dir, listener)
    }

    #[tokio::test]
    async fn valid_messages_are_spooled_then_acked() {
        let (dir, mut listener) = listener(vec![delivery(
            "m-1",
            br#"{"version": "1.1.14", "artifact": {"type": "brew-build"}}"#,
        )]);
        listener.drain().await.unwrap();

        assert_eq!(listener.counters(), (1, 1));
        assert_eq!(listener.source().acked(), ["m-1"]);

        let consumer = FileQueue::open(dir.path()).unwrap();
        let (env, claim) = consumer.tpop().unwrap().unwrap();
        assert_eq!(env.broker_msg_id, "m-1");
        assert_eq!(
            env.broker_topic,
            "VirtualTopic.eng.ci.osci.brew-build.test.complete"
        );
        assert_eq!(env.header_ts, Some(1_700_000_000));
        claim.commit().unwrap();
    }

    #[tokio::test]
    async fn malformed_json_is_acked_and_dropped() {
        let (dir, mut listener) = listener(vec![
            delivery("m-bad", b"{not json"),
            delivery("m-good", br#"{"version": "1.1.14"}"#),
        ]);
        listener.drain().await.unwrap();

        // Both acked, only the decodable one spooled.
        assert_eq!(listener.source().acked(), ["m-bad", "m-good"]);
        assert_eq!(listener.counters(), (1, 2));
        let consumer = FileQueue::open(dir.path()).unwrap();
        assert_eq!(consumer.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn health_violation_surfaces_its_exit_code() {
        let (_dir, mut listener) = listener(vec![]);
        listener.source.set_health(LinkHealth {
            links_open_local: 1,
            links_open_remote: 0,
            ..LinkHealth::default()
        });
        let err = listener.report_status().unwrap_err();
        assert_eq!(err.exit_code(), 11);

        listener.source.set_health(LinkHealth {
            links_open_local: 1,
            links_open_remote: 1,
            sessions_closed: 2,
            ..LinkHealth::default()
        });
        assert_eq!(listener.report_status().unwrap_err().exit_code(), 21);
    }

    #[test]
    fn exit_codes_match_the_contract() {
        assert_eq!(ListenerError::ConnectionClosed.exit_code(), 22);
        assert_eq!(ListenerError::Broker("x".to_string()).exit_code(), 31);
        assert_eq!(
            ListenerError::LinkClosed { count: 1 }.exit_code(),
            12
        );
    }
}
