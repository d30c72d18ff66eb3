//! Fake room: event-handler registry, lifecycle bookkeeping and the session hook slot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;

use super::participant::{FakeParticipant, OutputSink};
use crate::agents::session::SessionHook;
use crate::error::{BoxError, LiveTxtError};

/// Topic used for chat text.
pub const CHAT_TOPIC: &str = "lk.chat";

/// Room event names.
pub mod events {
    pub const DATA_RECEIVED: &str = "data_received";
    pub const PARTICIPANT_CONNECTED: &str = "participant_connected";
    pub const PARTICIPANT_DISCONNECTED: &str = "participant_disconnected";
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
}

/// Registration handle returned by `on`; pass it to `off` to remove one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// A `data_received` payload.
#[derive(Debug, Clone)]
pub struct DataPacket {
    pub data: Vec<u8>,
    pub topic: String,
    pub participant: Option<FakeParticipant>,
}

impl DataPacket {
    /// UTF-8 text packet on the chat topic.
    pub fn chat(text: &str, participant: FakeParticipant) -> Self {
        Self {
            data: text.as_bytes().to_vec(),
            topic: CHAT_TOPIC.to_string(),
            participant: Some(participant),
        }
    }

    /// Payload decoded as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Debug, Clone)]
pub enum RoomEvent {
    DataReceived(DataPacket),
    ParticipantConnected(FakeParticipant),
    ParticipantDisconnected(FakeParticipant),
    Connected,
    Disconnected,
}

impl RoomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DataReceived(_) => events::DATA_RECEIVED,
            Self::ParticipantConnected(_) => events::PARTICIPANT_CONNECTED,
            Self::ParticipantDisconnected(_) => events::PARTICIPANT_DISCONNECTED,
            Self::Connected => events::CONNECTED,
            Self::Disconnected => events::DISCONNECTED,
        }
    }
}

type SyncHandler = Arc<dyn Fn(&RoomEvent) -> Result<(), BoxError> + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(RoomEvent) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A registered event callback, plain or async.
#[derive(Clone)]
pub enum EventHandler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

impl EventHandler {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&RoomEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(RoomEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |event| Box::pin(f(event))))
    }

    async fn invoke(&self, event: &RoomEvent) -> Result<(), LiveTxtError> {
        let outcome = match self {
            Self::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(event))),
            Self::Async(f) => AssertUnwindSafe(f(event.clone())).catch_unwind().await,
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(LiveTxtError::agent(error.as_ref())),
            Err(payload) => Err(LiveTxtError::from_panic(payload)),
        }
    }
}

struct RoomInner {
    name: String,
    sid: String,
    metadata: String,
    local: FakeParticipant,
    remotes: BTreeMap<String, FakeParticipant>,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, EventHandler)>>>,
    next_handler: AtomicU64,
    connected: watch::Sender<bool>,
    session_hook: Mutex<Option<Arc<dyn SessionHook>>>,
}

/// In-process stand-in for a live room. Clones share the same room.
#[derive(Clone)]
pub struct FakeRoom {
    inner: Arc<RoomInner>,
}

impl FakeRoom {
    pub fn new(
        name: impl Into<String>,
        sid: impl Into<String>,
        metadata: impl Into<String>,
        local: FakeParticipant,
        remotes: Vec<FakeParticipant>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(RoomInner {
                name: name.into(),
                sid: sid.into(),
                metadata: metadata.into(),
                local,
                remotes: remotes
                    .into_iter()
                    .map(|p| (p.identity().to_string(), p))
                    .collect(),
                handlers: Mutex::new(HashMap::new()),
                next_handler: AtomicU64::new(1),
                connected,
                session_hook: Mutex::new(None),
            }),
        }
    }

    /// Room for one stateless turn: remote identity `user`.
    pub fn for_job(job_id: &str, sink: Arc<dyn OutputSink>) -> Self {
        Self::new(
            format!("session_{job_id}"),
            format!("RM_{job_id}"),
            "{}",
            FakeParticipant::local("agent", "Agent", sink),
            vec![FakeParticipant::remote("user", "User", "{}")],
        )
    }

    /// Room for a persistent messaging session: remote identity `sms_<phone>`.
    pub fn for_sms_session(session_id: &str, phone: &str, sink: Arc<dyn OutputSink>) -> Self {
        let metadata = serde_json::json!({ "phone": phone }).to_string();
        Self::new(
            session_id,
            format!("RM_sms_{session_id}"),
            metadata.clone(),
            FakeParticipant::local("agent", "SMS Agent", sink),
            vec![FakeParticipant::remote(format!("sms_{phone}"), phone, metadata)],
        )
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

    pub fn local_participant(&self) -> FakeParticipant {
        self.inner.local.clone()
    }

    pub fn remote_participants(&self) -> BTreeMap<String, FakeParticipant> {
        self.inner.remotes.clone()
    }

    pub fn remote_participant(&self, identity: &str) -> Option<FakeParticipant> {
        self.inner.remotes.get(identity).cloned()
    }

    /// The first remote participant: the user on the other end of the turn.
    pub fn primary_remote(&self) -> Option<FakeParticipant> {
        self.inner.remotes.values().next().cloned()
    }

    /// Register a handler for `event`. Handlers run in registration order.
    pub fn on(&self, event: &str, handler: EventHandler) -> HandlerId {
        let id = HandlerId::new(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        self.lock_handlers()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        tracing::debug!(room = %self.inner.name, event, "Event handler registered");
        id
    }

    pub fn on_sync<F>(&self, event: &str, f: F) -> HandlerId
    where
        F: Fn(&RoomEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on(event, EventHandler::sync(f))
    }

    pub fn on_async<F, Fut>(&self, event: &str, f: F) -> HandlerId
    where
        F: Fn(RoomEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on(event, EventHandler::future(f))
    }

    /// Register a `data_received` handler that only sees the packet.
    pub fn on_data_received<F>(&self, f: F) -> HandlerId
    where
        F: Fn(&DataPacket) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_sync(events::DATA_RECEIVED, move |event| match event {
            RoomEvent::DataReceived(packet) => f(packet),
            _ => Ok(()),
        })
    }

    /// Remove one handler, or every handler for `event` when `id` is `None`.
    /// Returns how many were removed.
    pub fn off(&self, event: &str, id: Option<HandlerId>) -> usize {
        let mut handlers = self.lock_handlers();
        let Some(registered) = handlers.get_mut(event) else {
            return 0;
        };
        let before = registered.len();
        match id {
            Some(id) => registered.retain(|(existing, _)| *existing != id),
            None => registered.clear(),
        }
        before - registered.len()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.lock_handlers().get(event).map_or(0, Vec::len)
    }

    pub fn registered_events(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_handlers()
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Invoke every handler for the event in registration order. A failing
    /// handler is logged and does not stop the rest. Returns how many ran.
    pub async fn emit(&self, event: RoomEvent) -> usize {
        let name = event.name();
        let snapshot: Vec<EventHandler> = self
            .lock_handlers()
            .get(name)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in &snapshot {
            if let Err(error) = handler.invoke(&event).await {
                tracing::error!(room = %self.inner.name, event = name, %error, "Error in event handler");
            }
        }
        snapshot.len()
    }

    /// Mark connected and announce the remote participants. Idempotent.
    pub async fn connect(&self) {
        if self.inner.connected.send_replace(true) {
            return;
        }
        tracing::info!(room = %self.inner.name, "Agent connected to fake room");
        self.emit(RoomEvent::Connected).await;
        let remotes: Vec<FakeParticipant> = self.inner.remotes.values().cloned().collect();
        for participant in remotes {
            self.emit(RoomEvent::ParticipantConnected(participant)).await;
        }
    }

    pub async fn disconnect(&self) {
        if !self.inner.connected.send_replace(false) {
            return;
        }
        tracing::info!(room = %self.inner.name, "Agent disconnected from fake room");
        self.emit(RoomEvent::Disconnected).await;
    }

    /// True between `connect` and `disconnect`.
    ///
    /// Unlike a real messaging transport this is not pinned to true: it
    /// reads false before the entrypoint connects and again after it
    /// disconnects. Readiness injection relies on the first case to report
    /// entrypoints that never connected; resident gateway sessions watch
    /// `subscribe_connected` for the second.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Watch the connection flag.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Deliver inbound user text as `data_received` from the primary remote participant.
    pub async fn handle_incoming_message(&self, text: &str) -> usize {
        let Some(sender) = self.primary_remote() else {
            tracing::warn!(room = %self.inner.name, "No remote participant to attribute message to");
            return 0;
        };
        tracing::debug!(room = %self.inner.name, chars = text.len(), "Incoming message");
        let delivered = self
            .emit(RoomEvent::DataReceived(DataPacket::chat(text, sender)))
            .await;
        if delivered == 0 {
            tracing::warn!(room = %self.inner.name, "No data_received handlers registered");
        }
        delivered
    }

    pub fn register_byte_stream_handler(&self, topic: &str) {
        tracing::debug!(topic, "register_byte_stream_handler ignored (no transport)");
    }

    pub fn register_text_stream_handler(&self, topic: &str) {
        tracing::debug!(topic, "register_text_stream_handler ignored (no transport)");
    }

    pub fn unregister_byte_stream_handler(&self, topic: &str) {
        tracing::debug!(topic, "unregister_byte_stream_handler ignored (no transport)");
    }

    pub fn unregister_text_stream_handler(&self, topic: &str) {
        tracing::debug!(topic, "unregister_text_stream_handler ignored (no transport)");
    }

    /// Attach the hook consulted by `AgentSession::start`. Only one at a time.
    pub fn set_session_hook(&self, hook: Arc<dyn SessionHook>) -> Result<(), LiveTxtError> {
        let mut slot = self
            .inner
            .session_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(LiveTxtError::InvalidState(format!(
                "room {} already has a session hook",
                self.inner.name
            )));
        }
        *slot = Some(hook);
        Ok(())
    }

    pub fn clear_session_hook(&self) -> Option<Arc<dyn SessionHook>> {
        self.inner
            .session_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn session_hook(&self) -> Option<Arc<dyn SessionHook>> {
        self.inner
            .session_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(HandlerId, EventHandler)>>> {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FakeRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeRoom")
            .field("name", &self.inner.name)
            .field("sid", &self.inner.sid)
            .field("connected", &self.is_connected())
            .field("events", &self.registered_events())
            .finish()
    }
}
