//! Gateway connection and the persistent-session worker (feature `gateway`).

pub mod client;
pub mod protocol;
pub mod worker;

pub use client::{GatewayClient, ResponseSender};
pub use protocol::{
    parse_frame, worker_connect_url, Frame, GatewayEvent, InboundMessage, SessionMessage,
};
pub use worker::{Dispatch, GatewayWorker, SessionRouter};
