//! Fake participants and the sinks their published data lands in.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::room::CHAT_TOPIC;

/// Receives text a local participant publishes.
pub trait OutputSink: Send + Sync {
    fn deliver(&self, text: String, topic: &str);
}

/// Turn-scoped buffer of published text fragments.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    fragments: Arc<Mutex<Vec<String>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: impl Into<String>) {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.into());
    }

    pub fn len(&self) -> usize {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragments(&self) -> Vec<String> {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fragments joined with single spaces, `None` when nothing was captured.
    pub fn joined(&self) -> Option<String> {
        let fragments = self.fragments();
        if fragments.is_empty() {
            None
        } else {
            Some(fragments.join(" "))
        }
    }
}

impl OutputSink for OutputBuffer {
    fn deliver(&self, text: String, topic: &str) {
        tracing::debug!(topic, chars = text.len(), "Captured agent output");
        self.push(text);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParticipantKind {
    Standard,
    Agent,
}

struct ParticipantInner {
    identity: String,
    name: String,
    sid: String,
    metadata: String,
    kind: ParticipantKind,
    attributes: Mutex<HashMap<String, String>>,
    sink: Option<Arc<dyn OutputSink>>,
}

/// In-process stand-in for a room participant. Cheap to clone.
#[derive(Clone)]
pub struct FakeParticipant {
    inner: Arc<ParticipantInner>,
}

impl FakeParticipant {
    /// A remote participant with no output sink.
    pub fn remote(identity: impl Into<String>, name: impl Into<String>, metadata: impl Into<String>) -> Self {
        Self::build(identity.into(), name.into(), metadata.into(), ParticipantKind::Standard, None)
    }

    /// The local (agent) participant; everything it publishes goes to `sink`.
    pub fn local(identity: impl Into<String>, name: impl Into<String>, sink: Arc<dyn OutputSink>) -> Self {
        Self::build(
            identity.into(),
            name.into(),
            "{}".to_string(),
            ParticipantKind::Standard,
            Some(sink),
        )
    }

    fn build(
        identity: String,
        name: String,
        metadata: String,
        kind: ParticipantKind,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Self {
        let name = if name.is_empty() { identity.clone() } else { name };
        Self {
            inner: Arc::new(ParticipantInner {
                sid: format!("PA_{identity}"),
                identity,
                name,
                metadata,
                kind,
                attributes: Mutex::new(HashMap::new()),
                sink,
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn sid(&self) -> &str {
        &self.inner.sid
    }

    pub fn metadata(&self) -> &str {
        &self.inner.metadata
    }

    pub fn kind(&self) -> ParticipantKind {
        self.inner.kind
    }

    /// Publish a data packet. Bytes are decoded as lossy UTF-8 and handed to
    /// the output sink; nothing leaves the process.
    pub fn publish_data(&self, data: &[u8], topic: &str) {
        match &self.inner.sink {
            Some(sink) => sink.deliver(String::from_utf8_lossy(data).into_owned(), topic),
            None => tracing::warn!(
                identity = %self.inner.identity,
                "publish_data called on a participant without an output sink"
            ),
        }
    }

    /// Publish text on the chat topic.
    pub fn publish_text(&self, text: &str) {
        self.publish_data(text.as_bytes(), CHAT_TOPIC);
    }

    pub fn set_attributes<I, K, V>(&self, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut current = self
            .inner
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (key, value) in attributes {
            current.insert(key.into(), value.into());
        }
        tracing::debug!(identity = %self.inner.identity, count = current.len(), "Participant attributes set");
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.inner
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn attributes(&self) -> HashMap<String, String> {
        self.inner
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn same_as(&self, other: &FakeParticipant) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FakeParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeParticipant")
            .field("identity", &self.inner.identity)
            .field("name", &self.inner.name)
            .field("sid", &self.inner.sid)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_publish_lands_in_buffer() {
        let buffer = OutputBuffer::new();
        let local = FakeParticipant::local("agent", "Agent", Arc::new(buffer.clone()));
        local.publish_data("Echo: Hello!".as_bytes(), CHAT_TOPIC);
        local.publish_text("again");
        assert_eq!(buffer.joined().as_deref(), Some("Echo: Hello! again"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let buffer = OutputBuffer::new();
        let local = FakeParticipant::local("agent", "Agent", Arc::new(buffer.clone()));
        local.publish_data(&[b'o', b'k', 0xff], CHAT_TOPIC);
        assert_eq!(buffer.fragments(), vec!["ok\u{fffd}".to_string()]);
    }

    #[test]
    fn empty_buffer_joins_to_none() {
        assert_eq!(OutputBuffer::new().joined(), None);
    }

    #[test]
    fn remote_participant_shape() {
        let user = FakeParticipant::remote("user", "", "{}");
        assert_eq!(user.name(), "user");
        assert_eq!(user.sid(), "PA_user");
        assert_eq!(user.kind().to_string(), "standard");
        user.publish_text("ignored");

        user.set_attributes([("lk.agent.state", "listening")]);
        assert_eq!(user.attribute("lk.agent.state").as_deref(), Some("listening"));
    }
}
