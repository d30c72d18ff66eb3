//! Delivery of the triggering user message into a fake room.

use std::time::Duration;

use tokio::sync::watch;

use crate::shim::FakeRoom;

/// Deliver `text` as `data_received` once the agent is ready for it.
///
/// Waits for the room to connect, then for whichever comes first: the
/// settling delay elapsing or the entrypoint finishing (`done` turning true).
/// An entrypoint that finishes without ever connecting gets no message.
/// Returns whether the message was delivered.
pub async fn inject_when_ready(
    room: &FakeRoom,
    text: &str,
    settle_delay: Duration,
    mut done: watch::Receiver<bool>,
) -> bool {
    let mut connected = room.subscribe_connected();
    tokio::select! {
        ready = connected.wait_for(|connected| *connected) => {
            if ready.is_err() {
                return false;
            }
        }
        _ = done.wait_for(|done| *done) => {
            if !room.is_connected() {
                tracing::debug!(room = room.name(), "Entrypoint finished without connecting, nothing injected");
                return false;
            }
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(settle_delay) => {}
        _ = done.wait_for(|done| *done) => {}
    }

    tracing::debug!(room = room.name(), handlers = ?room.registered_events(), "Injecting user message");
    room.handle_incoming_message(text).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shim::OutputBuffer;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn waits_for_settle_delay_while_entrypoint_runs() {
        let buffer = OutputBuffer::new();
        let room = FakeRoom::for_job("inj", Arc::new(buffer.clone()));
        let local = room.local_participant();
        room.on_data_received(move |packet| {
            local.publish_text(&packet.text());
            Ok(())
        });
        room.connect().await;

        let (_done_tx, done_rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        assert!(inject_when_ready(&room, "ping", Duration::from_millis(300), done_rx).await);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(buffer.joined().as_deref(), Some("ping"));
    }

    #[tokio::test(start_paused = true)]
    async fn entrypoint_completion_short_circuits_delay() {
        let room = FakeRoom::for_job("inj2", Arc::new(OutputBuffer::new()));
        room.connect().await;
        let (done_tx, done_rx) = watch::channel(false);
        done_tx.send_replace(true);

        let started = tokio::time::Instant::now();
        assert!(inject_when_ready(&room, "ping", Duration::from_secs(5), done_rx).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn never_connected_means_no_injection() {
        let room = FakeRoom::for_job("inj3", Arc::new(OutputBuffer::new()));
        let (done_tx, done_rx) = watch::channel(false);
        done_tx.send_replace(true);
        assert!(!inject_when_ready(&room, "ping", Duration::from_millis(10), done_rx).await);
    }
}
