//! livetxt: run voice-room conversational agents against text turns.
//!
//! Agent code written for a live, audio-first room runtime is driven here
//! by one text message at a time. A turn builds an in-process fake room,
//! runs the agent's entrypoint in it, injects the user's text as a chat
//! data packet once the entrypoint is listening, and collects whatever the
//! agent publishes back. Conversation history is serialized into the
//! result so the next turn can restore it.
//!
//! # Quick Start
//!
//! ```no_run
//! use livetxt::prelude::*;
//!
//! # async fn example() {
//! let echo = Entrypoint::new(|ctx: JobContext| async move {
//!     let me = ctx.agent();
//!     ctx.room().on_data_received(move |packet| {
//!         me.publish_text(&format!("Echo: {}", packet.text()));
//!         Ok(())
//!     });
//!     ctx.connect().await;
//!     Ok::<(), BoxError>(())
//! });
//! let result = TurnExecutor::default()
//!     .execute(&echo, &JobRequest::new("job-1", "Hello!"))
//!     .await;
//! assert_eq!(result.response_text.as_deref(), Some("Echo: Hello!"));
//! # }
//! ```

pub mod agents;
pub mod capture;
pub mod config;
pub mod demo;
pub mod error;
pub mod executor;
pub mod loader;
pub mod prelude;
pub mod serialization;
pub mod shim;
pub mod tools;
pub mod types;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
