//! Listener configuration.

use std::time::Duration;

pub mod defaults {
    pub const FQ_DIR: &str = "/var/spool/kaijs";
    pub const PROVIDER_NAME: &str = "kaijs-listener";
    pub const STATUS_INTERVAL_SECS: u64 = 60;
}

/// One topic subscription, optionally with a JMS selector
/// (`topic=selector` in the environment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub topic: String,
    pub selector: Option<String>,
}

impl TopicSpec {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((topic, selector)) => TopicSpec {
                topic: topic.trim().to_string(),
                selector: Some(selector.trim().to_string()),
            },
            None => TopicSpec {
                topic: raw.trim().to_string(),
                selector: None,
            },
        }
    }
}

/// Runtime configuration of the `listener` executable.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub fq_dir: String,
    pub provider_name: String,
    pub topics: Vec<TopicSpec>,
    pub status_interval: Duration,
}

impl ListenerConfig {
    /// Load from `KAIJS_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let topics = var("KAIJS_TOPICS")
            .map(|raw| {
                raw.split(',')
                    .filter(|t| !t.trim().is_empty())
                    .map(TopicSpec::parse)
                    .collect()
            })
            .unwrap_or_default();
        let status_interval = match var("KAIJS_STATUS_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("KAIJS_STATUS_INTERVAL_SECS: {e}"))?,
            ),
            None => Duration::from_secs(defaults::STATUS_INTERVAL_SECS),
        };
        Ok(ListenerConfig {
            fq_dir: var("KAIJS_FQ_DIR").unwrap_or_else(|| defaults::FQ_DIR.to_string()),
            provider_name: var("KAIJS_PROVIDER_NAME")
                .unwrap_or_else(|| defaults::PROVIDER_NAME.to_string()),
            topics,
            status_interval,
        })
    }
}
