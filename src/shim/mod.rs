//! In-process stand-ins for the live room runtime: rooms, participants and job contexts.
//!
//! Nothing here touches a network. Published data is routed to an
//! [`OutputSink`], inbound text is delivered as a `data_received` event.

pub mod context;
pub mod participant;
pub mod room;

pub use context::{JobContext, JobInfo};
pub use participant::{FakeParticipant, OutputBuffer, OutputSink, ParticipantKind};
pub use room::{events, DataPacket, EventHandler, FakeRoom, HandlerId, RoomEvent, CHAT_TOPIC};
