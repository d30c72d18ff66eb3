//! Long-lived worker: one live fake room per gateway session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::client::{GatewayClient, ResponseSender};
use super::protocol::{InboundMessage, SessionMessage};
use crate::config::LiveTxtConfig;
use crate::error::Result;
use crate::executor::{inject_when_ready, Entrypoint};
use crate::shim::{JobContext, OutputSink};

/// Routes a session's published text back through the gateway.
struct GatewaySink {
    session_id: String,
    sender: Arc<dyn ResponseSender>,
}

impl OutputSink for GatewaySink {
    fn deliver(&self, text: String, topic: &str) {
        tracing::debug!(session_id = %self.session_id, topic, "Publishing agent reply");
        self.sender.send_response(&self.session_id, &text);
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to a session that was already running.
    Injected,
    /// Started a new session with it.
    Started,
    /// Missing session id, sender or text.
    Dropped,
}

struct LiveSession {
    ctx: JobContext,
    task: Option<AbortHandle>,
}

/// Owns the live sessions and decides where each inbound message goes.
#[derive(Clone)]
pub struct SessionRouter {
    entrypoint: Entrypoint,
    sender: Arc<dyn ResponseSender>,
    settle_delay: Duration,
    sessions: Arc<Mutex<HashMap<String, LiveSession>>>,
}

impl SessionRouter {
    pub fn new(entrypoint: Entrypoint, sender: Arc<dyn ResponseSender>, settle_delay: Duration) -> Self {
        Self {
            entrypoint,
            sender,
            settle_delay,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, LiveSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn dispatch(&self, inbound: InboundMessage) -> Dispatch {
        let Some(message) = inbound.clone().validate() else {
            tracing::error!(message = ?inbound, "Invalid message data");
            return Dispatch::Dropped;
        };
        tracing::info!(session_id = %message.session_id, from = %message.from, "Message received");

        let live = self.sessions().get(&message.session_id).map(|session| session.ctx.clone());
        match live {
            Some(ctx) => {
                ctx.room().handle_incoming_message(&message.text).await;
                Dispatch::Injected
            }
            None => {
                self.start_session(message);
                Dispatch::Started
            }
        }
    }

    fn start_session(&self, message: SessionMessage) {
        tracing::info!(session_id = %message.session_id, "New session");
        let sink = GatewaySink {
            session_id: message.session_id.clone(),
            sender: Arc::clone(&self.sender),
        };
        let ctx = JobContext::for_sms_session(&message.session_id, &message.from, Arc::new(sink));
        self.sessions().insert(
            message.session_id.clone(),
            LiveSession {
                ctx: ctx.clone(),
                task: None,
            },
        );

        let router = self.clone();
        let session_id = message.session_id.clone();
        let text = message.text;
        let task = tokio::spawn(async move {
            let (done_tx, done_rx) = watch::channel(false);
            let run = async {
                let outcome = router.entrypoint.invoke(ctx.clone()).await;
                done_tx.send_replace(true);
                outcome
            };
            let inject = inject_when_ready(ctx.room(), &text, router.settle_delay, done_rx);
            let (outcome, _) = tokio::join!(run, inject);
            if let Err(error) = outcome {
                tracing::error!(session_id = %session_id, %error, "Error in entrypoint");
            }
            router.sessions().remove(&session_id);
            tracing::info!(session_id = %session_id, "Session ended");
        });

        // The task may already have finished and removed its entry.
        if let Some(session) = self.sessions().get_mut(&message.session_id) {
            session.task = Some(task.abort_handle());
        }
    }

    /// Abort every running session.
    pub fn shutdown(&self) {
        let sessions: Vec<(String, LiveSession)> = self.sessions().drain().collect();
        for (session_id, session) in sessions {
            if let Some(task) = session.task {
                task.abort();
            }
            tracing::debug!(session_id = %session_id, "Session aborted");
        }
    }
}

/// Gateway-connected worker.
pub struct GatewayWorker {
    config: LiveTxtConfig,
    entrypoint: Entrypoint,
}

impl GatewayWorker {
    pub fn new(config: LiveTxtConfig, entrypoint: Entrypoint) -> Self {
        Self { config, entrypoint }
    }

    /// Run until ctrl-c or until the gateway connection is lost for good.
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down");
                signal.cancel();
            }
        });
        self.run_until(shutdown).await
    }

    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let (client, mut inbound) = GatewayClient::connect(&self.config).await?;
        let router = SessionRouter::new(
            self.entrypoint,
            Arc::new(client.clone()),
            self.config.settle_delay,
        );
        tracing::info!(worker_id = ?client.worker_id(), "Worker started and ready");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => {
                        router.dispatch(message).await;
                    }
                    None => {
                        tracing::warn!("Gateway connection lost");
                        break;
                    }
                },
            }
        }

        router.shutdown();
        client.disconnect().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl ResponseSender for Recorder {
        fn send_response(&self, session_id: &str, message: &str) {
            self.0
                .lock()
                .unwrap()
                .push((session_id.to_string(), message.to_string()));
        }
    }

    /// Echoes every message and stays alive until the room disconnects.
    fn resident_echo() -> Entrypoint {
        Entrypoint::new(|ctx: JobContext| async move {
            let agent = ctx.agent();
            ctx.room().on_data_received(move |packet| {
                agent.publish_text(&format!("Echo: {}", packet.text()));
                Ok(())
            });
            ctx.connect().await;
            let mut connected = ctx.room().subscribe_connected();
            let _ = connected.wait_for(|connected| !*connected).await;
            Ok::<(), BoxError>(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn new_then_existing_sessions() {
        let recorder = Arc::new(Recorder::default());
        let router = SessionRouter::new(resident_echo(), recorder.clone(), Duration::from_millis(300));

        assert_eq!(router.dispatch(InboundMessage::new("s1", "+15550001", "hi")).await, Dispatch::Started);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(router.active_sessions(), vec!["s1".to_string()]);

        assert_eq!(router.dispatch(InboundMessage::new("s1", "+15550001", "again")).await, Dispatch::Injected);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                ("s1".to_string(), "Echo: hi".to_string()),
                ("s1".to_string(), "Echo: again".to_string()),
            ]
        );

        router.shutdown();
        assert!(router.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn invalid_messages_are_dropped() {
        let router = SessionRouter::new(resident_echo(), Arc::new(Recorder::default()), Duration::ZERO);
        let inbound = InboundMessage {
            session_id: Some("s1".into()),
            from: None,
            message: Some("hi".into()),
        };
        assert_eq!(router.dispatch(inbound).await, Dispatch::Dropped);
        assert!(router.active_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_entrypoints_release_their_session() {
        let entry = Entrypoint::new(|ctx: JobContext| async move {
            ctx.connect().await;
            Ok::<(), BoxError>(())
        });
        let router = SessionRouter::new(entry, Arc::new(Recorder::default()), Duration::from_millis(300));
        router.dispatch(InboundMessage::new("s2", "+1", "hello")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(router.active_sessions().is_empty());
    }
}
