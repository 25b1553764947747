// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Topics, Selectors and Messages
//!
//! A published topic is `{selector}.{message_id}`: the selector names the
//! subject (`v3.asset.domain_name`), the final dot segment carries the
//! message identity. Message ids never contain dots, only dashes.
//!
//! Subscription matching is a whole-segment prefix test:
//! `v3.fingerprint` matches `v3.fingerprint.domain_name` but never
//! `v3.fingerprinter`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Returns `true` when `selector` is a whole-segment prefix of `topic`
/// (or equal to it).
pub fn selector_matches(selector: &str, topic: &str) -> bool {
    if selector.is_empty() {
        return false;
    }
    match topic.strip_prefix(selector) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// Returns `true` when any of `selectors` matches `topic`.
pub fn any_selector_matches<S: AsRef<str>>(selectors: &[S], topic: &str) -> bool {
    selectors.iter().any(|s| selector_matches(s.as_ref(), topic))
}

/// Rejects empty selectors, empty segments and segments containing
/// whitespace.
pub fn validate_selector(selector: &str) -> Result<(), String> {
    if selector.is_empty() {
        return Err("selector cannot be empty".to_string());
    }
    for segment in selector.split('.') {
        if segment.is_empty() {
            return Err(format!("selector '{}' has an empty segment", selector));
        }
        if segment.chars().any(char::is_whitespace) {
            return Err(format!("selector '{}' contains whitespace", selector));
        }
    }
    Ok(())
}

/// Correlation identifier: `{uuid}` or `{uuid}-{trace_id}-{span_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh bare identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Joins a selector and a message id into a publish topic.
pub fn topic_for(selector: &str, message_id: &MessageId) -> String {
    format!("{}.{}", selector, message_id.as_str())
}

/// Splits a published topic into `(selector, message_id)`. Topics without an
/// identity segment yield the whole topic as selector and no id.
pub fn split_topic(topic: &str) -> (&str, Option<MessageId>) {
    match topic.rsplit_once('.') {
        Some((selector, id)) if looks_like_message_id(id) => (selector, Some(MessageId::new(id))),
        _ => (topic, None),
    }
}

fn looks_like_message_id(segment: &str) -> bool {
    // A uuid always contains dashes; selector segments never do.
    segment.contains('-')
}

/// Raw message as carried by the fabric: the full topic plus the encoded
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(selector: &str, message_id: &MessageId, payload: Vec<u8>) -> Self {
        Self {
            topic: topic_for(selector, message_id),
            payload,
        }
    }

    pub fn selector(&self) -> &str {
        split_topic(&self.topic).0
    }

    pub fn message_id(&self) -> Option<MessageId> {
        split_topic(&self.topic).1
    }
}
