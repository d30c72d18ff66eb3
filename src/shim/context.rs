//! The job context handed to agent entrypoints.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::participant::{FakeParticipant, OutputBuffer, OutputSink};
use super::room::FakeRoom;
use crate::error::LiveTxtError;
use crate::types::job::JobRequest;

/// Static description of the job, as agent code sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInfo {
    pub id: String,
    /// Always `"room"`.
    pub kind: String,
    pub room_name: String,
    pub agent_name: String,
    /// JSON document as a string.
    pub metadata: String,
}

struct JobContextInner {
    job: JobInfo,
    room: FakeRoom,
}

/// Context passed to an entrypoint. Cheap to clone.
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<JobContextInner>,
}

impl JobContext {
    pub fn new(job: JobInfo, room: FakeRoom) -> Self {
        Self {
            inner: Arc::new(JobContextInner { job, room }),
        }
    }

    /// Context for one stateless turn; published text lands in `buffer`.
    pub fn for_turn(request: &JobRequest, buffer: OutputBuffer) -> Self {
        let room = FakeRoom::for_job(request.job_id(), Arc::new(buffer));
        let job = JobInfo {
            id: request.job_id().to_string(),
            kind: "room".to_string(),
            room_name: room.name().to_string(),
            agent_name: "text-agent".to_string(),
            metadata: "{}".to_string(),
        };
        Self::new(job, room)
    }

    /// Context for a persistent messaging session.
    pub fn for_sms_session(session_id: &str, phone: &str, sink: Arc<dyn OutputSink>) -> Self {
        let room = FakeRoom::for_sms_session(session_id, phone, sink);
        let job = JobInfo {
            id: session_id.to_string(),
            kind: "room".to_string(),
            room_name: room.name().to_string(),
            agent_name: "sms-agent".to_string(),
            metadata: room.metadata().to_string(),
        };
        Self::new(job, room)
    }

    pub fn job(&self) -> &JobInfo {
        &self.inner.job
    }

    pub fn room(&self) -> &FakeRoom {
        &self.inner.room
    }

    /// The local participant the agent publishes through.
    pub fn agent(&self) -> FakeParticipant {
        self.inner.room.local_participant()
    }

    pub async fn connect(&self) {
        self.inner.room.connect().await;
    }

    /// Connect from a blocking entrypoint running on a worker thread.
    ///
    /// Must not be called from async code; it blocks on the current runtime.
    pub fn connect_blocking(&self) -> Result<(), LiveTxtError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LiveTxtError::InvalidState(format!("no tokio runtime available: {e}")))?;
        handle.block_on(self.inner.room.connect());
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.inner.room.disconnect().await;
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.inner.job)
            .field("room", &self.inner.room)
            .finish()
    }
}
