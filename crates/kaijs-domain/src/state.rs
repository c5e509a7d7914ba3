//! State construction from broker messages.
//!
//! `kai_state` is built deterministically from the topic tail, the body
//! version, and the generated-at timestamp. For test-stage messages the
//! test-case name is part of the state.

use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{KaiState, Origin};
use crate::envelope::SpoolMessage;
use crate::error::KaijsError;
use crate::thread_id::derive_thread_id;

/// Pipeline stage, the second-from-last topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Build,
    Test,
    Dispatch,
    Promote,
    Gate,
}

/// Message state, the last topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateName {
    Queued,
    Running,
    Complete,
    Error,
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Stage::Build),
            "test" => Ok(Stage::Test),
            "dispatch" => Ok(Stage::Dispatch),
            "promote" => Ok(Stage::Promote),
            "gate" => Ok(Stage::Gate),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

impl std::str::FromStr for StateName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(StateName::Queued),
            "running" => Ok(StateName::Running),
            "complete" => Ok(StateName::Complete),
            "error" => Ok(StateName::Error),
            other => Err(format!("unknown state: {other}")),
        }
    }
}

/// Extract `(stage, state)` from a topic such as
/// `VirtualTopic.eng.ci.osci.brew-build.test.complete`.
pub fn stage_state_from_topic(topic: &str) -> Result<(Stage, StateName), KaijsError> {
    let segments: Vec<&str> = topic.split('.').collect();
    if segments.len() < 2 {
        return Err(KaijsError::Validation(format!(
            "topic has no stage/state tail: {topic}"
        )));
    }
    let stage = segments[segments.len() - 2]
        .parse::<Stage>()
        .map_err(KaijsError::Validation)?;
    let state = segments[segments.len() - 1]
        .parse::<StateName>()
        .map_err(KaijsError::Validation)?;
    Ok((stage, state))
}

fn test_case_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\S+\.\S+\.\S+$").expect("static regex"))
}

/// Derive the test case name `namespace.type.category` from the body.
///
/// Messages at version 0.1.x carry the three fields at the top level; newer
/// messages carry them under `test`.
pub fn test_case_name(body: &Value, version: &str) -> Result<String, KaijsError> {
    let holder = if version.starts_with("0.1") {
        body
    } else {
        body.get("test").unwrap_or(&Value::Null)
    };
    let part = |key: &str| -> Result<&str, KaijsError> {
        holder
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| KaijsError::Validation(format!("test case name: missing '{key}'")))
    };
    let name = format!("{}.{}.{}", part("namespace")?, part("type")?, part("category")?);
    if !test_case_name_re().is_match(&name) {
        return Err(KaijsError::Validation(format!(
            "malformed test case name: {name}"
        )));
    }
    Ok(name)
}

/// Parse `body.generated_at` as unix seconds.
///
/// Accepts an RFC 3339 string, unix seconds, or unix milliseconds.
pub fn parse_generated_at(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp()),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 100_000_000_000 {
                Some(raw / 1000)
            } else {
                Some(raw)
            }
        }
        _ => None,
    }
}

/// Build the canonical `kai_state` for an envelope.
///
/// The timestamp prefers `body.generated_at` and falls back to the
/// listener's receive time.
pub fn make_state(env: &SpoolMessage) -> Result<KaiState, KaijsError> {
    let (stage, state) = stage_state_from_topic(&env.broker_topic)?;
    let version = env
        .body_version()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| KaijsError::WrongVersion(env.broker_topic.clone()))?
        .to_string();

    let test_case = if stage == Stage::Test {
        Some(test_case_name(&env.body, &version)?)
    } else {
        None
    };
    let thread_id = derive_thread_id(&env.body, stage, test_case.as_deref())?;
    let timestamp = env
        .body
        .get("generated_at")
        .and_then(parse_generated_at)
        .unwrap_or(env.provider_ts);

    Ok(KaiState {
        thread_id,
        msg_id: env.broker_msg_id.clone(),
        version,
        stage,
        state,
        timestamp,
        origin: Origin::loader(),
        test_case_name: test_case,
    })
}
