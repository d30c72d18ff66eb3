//! Persistent websocket connection to the gateway.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{parse_frame, worker_connect_url, Frame, GatewayEvent, InboundMessage};
use crate::config::LiveTxtConfig;
use crate::error::{LiveTxtError, Result};
use crate::types::chat::now_timestamp;

type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Something that can deliver an agent reply for a session.
pub trait ResponseSender: Send + Sync {
    fn send_response(&self, session_id: &str, message: &str);
}

#[derive(Clone)]
struct ConnectParams {
    url: String,
    heartbeat_interval: Duration,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

/// Handle to a running gateway connection. Clones share the connection.
#[derive(Clone)]
pub struct GatewayClient {
    outbound: mpsc::UnboundedSender<String>,
    connected: watch::Receiver<bool>,
    worker_id: Arc<Mutex<Option<String>>>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl GatewayClient {
    /// Connect, complete the welcome handshake and start the supervisor.
    ///
    /// Inbound `message` frames arrive on the returned receiver, which closes
    /// once the connection is lost for good or the client is shut down.
    pub async fn connect(config: &LiveTxtConfig) -> Result<(Self, mpsc::UnboundedReceiver<InboundMessage>)> {
        config.validate_for_gateway()?;
        let (Some(gateway_url), Some(api_key)) = (config.gateway_url.as_deref(), config.api_key.as_deref()) else {
            return Err(LiveTxtError::Configuration("gateway url and api key are required".into()));
        };
        let params = ConnectParams {
            url: worker_connect_url(gateway_url, api_key)?,
            heartbeat_interval: config.heartbeat_interval,
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
        };

        tracing::info!(gateway = %gateway_url, "Connecting to gateway");
        let mut socket = open_socket(&params.url).await?;
        let worker_id = handshake(&mut socket).await?;
        tracing::info!(worker_id = %worker_id, "Connected to gateway");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(true);
        let worker_id = Arc::new(Mutex::new(Some(worker_id)));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_supervisor_loop(
            socket,
            params,
            outbound_rx,
            inbound_tx,
            connected_tx,
            Arc::clone(&worker_id),
            shutdown.clone(),
        ));

        Ok((
            Self {
                outbound: outbound_tx,
                connected: connected_rx,
                worker_id,
                shutdown,
                task: Arc::new(Mutex::new(Some(task))),
            },
            inbound_rx,
        ))
    }

    pub fn worker_id(&self) -> Option<String> {
        self.worker_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once the connection is gone for good.
    pub async fn disconnected(&self) {
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|connected| !*connected).await;
    }

    /// Queue an event. Frames queued while reconnecting go out after reconnect.
    pub fn send_event(&self, event: &GatewayEvent) -> Result<()> {
        let frame = event.to_frame()?;
        self.outbound
            .send(frame)
            .map_err(|_| LiveTxtError::Gateway("gateway connection is closed".into()))
    }

    /// Close the connection and wait for the supervisor to stop.
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(%error, "Gateway supervisor task failed");
            }
        }
        tracing::info!("Disconnected from gateway");
    }
}

impl ResponseSender for GatewayClient {
    fn send_response(&self, session_id: &str, message: &str) {
        let event = GatewayEvent::Response {
            session_id: session_id.to_string(),
            message: message.to_string(),
        };
        if let Err(error) = self.send_event(&event) {
            tracing::error!(session_id, %error, "Failed to send response");
        }
    }
}

enum ConnectionOutcome {
    Shutdown,
    Disconnected,
}

async fn run_supervisor_loop(
    mut socket: GatewaySocket,
    params: ConnectParams,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    connected: watch::Sender<bool>,
    worker_id: Arc<Mutex<Option<String>>>,
    shutdown: CancellationToken,
) {
    let mut reconnect_attempt = 0u32;
    loop {
        let outcome = run_active_connection(&mut socket, &params, &mut outbound, &inbound, &shutdown).await;
        if matches!(outcome, ConnectionOutcome::Shutdown) || shutdown.is_cancelled() {
            break;
        }

        if reconnect_attempt >= params.reconnect_attempts {
            tracing::error!(attempts = reconnect_attempt, "Gateway reconnect attempts exhausted");
            break;
        }
        reconnect_attempt += 1;

        let delay = compute_backoff_delay(reconnect_attempt, params.reconnect_delay, MAX_RECONNECT_DELAY);
        tracing::warn!(attempt = reconnect_attempt, delay_ms = delay.as_millis() as u64, "Gateway connection lost, reconnecting");
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }

        match open_socket(&params.url).await {
            Ok(mut reconnected) => match handshake(&mut reconnected).await {
                Ok(id) => {
                    tracing::info!(worker_id = %id, "Reconnected to gateway");
                    *worker_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
                    socket = reconnected;
                    reconnect_attempt = 0;
                }
                Err(error) => tracing::error!(%error, "Gateway handshake failed during reconnect"),
            },
            Err(error) => {
                tracing::error!(%error, "Gateway reconnect failed");
                if error.is_fatal_at_startup() {
                    break;
                }
            }
        }
    }

    connected.send_replace(false);
}

async fn run_active_connection(
    socket: &mut GatewaySocket,
    params: &ConnectParams,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    inbound: &mpsc::UnboundedSender<InboundMessage>,
    shutdown: &CancellationToken,
) -> ConnectionOutcome {
    let mut heartbeat = time::interval(params.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return ConnectionOutcome::Shutdown;
            }
            _ = heartbeat.tick() => {
                let frame = GatewayEvent::Heartbeat { timestamp: now_timestamp() }.to_frame();
                let sent = match frame {
                    Ok(frame) => socket.send(Message::Text(frame.into())).await,
                    Err(_) => Ok(()),
                };
                if let Err(error) = sent {
                    tracing::error!(%error, "Gateway heartbeat failed");
                    return ConnectionOutcome::Disconnected;
                }
            }
            Some(frame) = outbound.recv() => {
                if let Err(error) = socket.send(Message::Text(frame.into())).await {
                    tracing::error!(%error, "Gateway send failed");
                    return ConnectionOutcome::Disconnected;
                }
            }
            frame = socket.next() => {
                match frame {
                    Some(Ok(message)) => {
                        if let Err(error) = handle_server_message(socket, inbound, message).await {
                            tracing::warn!(%error, "Gateway connection closed");
                            return ConnectionOutcome::Disconnected;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::error!(%error, "Gateway receive failed");
                        return ConnectionOutcome::Disconnected;
                    }
                    None => return ConnectionOutcome::Disconnected,
                }
            }
        }
    }
}

async fn handle_server_message(
    socket: &mut GatewaySocket,
    inbound: &mpsc::UnboundedSender<InboundMessage>,
    message: Message,
) -> std::result::Result<(), WsError> {
    match message {
        Message::Text(text) => route_frame(&text, inbound),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => route_frame(&text, inbound),
            Err(_) => tracing::warn!("Ignoring non-UTF-8 binary frame"),
        },
        Message::Ping(payload) => socket.send(Message::Pong(payload)).await?,
        Message::Pong(_) | Message::Frame(_) => {}
        Message::Close(_) => return Err(WsError::ConnectionClosed),
    }
    Ok(())
}

fn route_frame(text: &str, inbound: &mpsc::UnboundedSender<InboundMessage>) {
    match parse_frame(text) {
        Frame::Event(GatewayEvent::Message(message)) => {
            if inbound.send(message).is_err() {
                tracing::warn!("Inbound message dropped, no receiver");
            }
        }
        Frame::Event(GatewayEvent::HeartbeatAck) => {}
        Frame::Event(other) => tracing::debug!(event = ?other, "Ignoring gateway event"),
        Frame::Unknown(event) => tracing::warn!(event = ?event, "Unknown gateway event"),
        Frame::Invalid(error) => tracing::error!(%error, frame = %text, "Invalid gateway frame"),
    }
}

async fn open_socket(url: &str) -> Result<GatewaySocket> {
    let request = url
        .into_client_request()
        .map_err(|error| LiveTxtError::Configuration(format!("Invalid gateway websocket URL: {error}")))?;
    connect_async(request)
        .await
        .map(|(socket, _)| socket)
        .map_err(map_connect_error)
}

/// Wait for the `connected` welcome and answer with `ready`. Returns the worker id.
async fn handshake(socket: &mut GatewaySocket) -> Result<String> {
    let welcome = time::timeout(WELCOME_TIMEOUT, next_text(socket))
        .await
        .map_err(|_| LiveTxtError::Gateway("no welcome from gateway".into()))??;
    let worker_id = match parse_frame(&welcome) {
        Frame::Event(GatewayEvent::Connected { worker_id }) => worker_id.unwrap_or_default(),
        other => {
            return Err(LiveTxtError::Gateway(format!("unexpected welcome frame: {other:?}")));
        }
    };
    let ready = GatewayEvent::Ready {
        worker_id: Some(worker_id.clone()),
    }
    .to_frame()?;
    socket
        .send(Message::Text(ready.into()))
        .await
        .map_err(|error| LiveTxtError::Gateway(format!("failed to send ready: {error}")))?;
    Ok(worker_id)
}

async fn next_text(socket: &mut GatewaySocket) -> Result<String> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Binary(bytes))) => {
                return String::from_utf8(bytes.to_vec())
                    .map_err(|error| LiveTxtError::Gateway(format!("non-UTF-8 welcome: {error}")));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(LiveTxtError::Gateway("gateway closed the connection".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(error)) => return Err(LiveTxtError::Gateway(error.to_string())),
        }
    }
}

fn map_connect_error(error: WsError) -> LiveTxtError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                LiveTxtError::Configuration(format!("gateway rejected the api key with status {status}"))
            } else {
                LiveTxtError::Gateway(format!("gateway handshake failed with status {status}"))
            }
        }
        WsError::Io(error) => LiveTxtError::Io(error),
        WsError::Url(error) => LiveTxtError::Configuration(format!("Invalid gateway websocket URL: {error}")),
        other => LiveTxtError::Gateway(format!("gateway connect failed: {other}")),
    }
}

fn compute_backoff_delay(attempt: u32, base: Duration, max_delay: Duration) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1)) as f64;
    let scaled = base.as_secs_f64() * multiplier;
    Duration::from_secs_f64(scaled.min(max_delay.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(compute_backoff_delay(1, base, MAX_RECONNECT_DELAY), Duration::from_secs(2));
        assert_eq!(compute_backoff_delay(3, base, MAX_RECONNECT_DELAY), Duration::from_secs(8));
        assert_eq!(compute_backoff_delay(10, base, MAX_RECONNECT_DELAY), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn routed_messages_reach_the_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        route_frame(r#"{"event":"message","session_id":"s","from":"+1","message":"hi"}"#, &tx);
        route_frame(r#"{"event":"heartbeat_ack"}"#, &tx);
        route_frame("garbage", &tx);
        assert_eq!(rx.try_recv().unwrap(), InboundMessage::new("s", "+1", "hi"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_fails_fast_without_configuration() {
        let err = GatewayClient::connect(&LiveTxtConfig::default()).await.err().unwrap();
        assert!(err.is_fatal_at_startup());
    }
}
