//! Agent entrypoints: async functions run on the runtime, blocking ones on the blocking pool.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{BoxError, LiveTxtError};
use crate::shim::JobContext;

type AsyncEntry = Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type BlockingEntry = Arc<dyn Fn(JobContext) -> Result<(), BoxError> + Send + Sync>;

/// A function that receives the job context and sets the agent up.
#[derive(Clone)]
pub enum Entrypoint {
    Async(AsyncEntry),
    Blocking(BlockingEntry),
}

impl Entrypoint {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Synchronous entrypoint; runs on the blocking thread pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(JobContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }

    /// Run to completion. Errors and panics come back as `AgentExecution`.
    ///
    /// Dropping the future cancels an async entrypoint. A blocking one keeps
    /// running on its thread until it returns.
    pub async fn invoke(&self, ctx: JobContext) -> Result<(), LiveTxtError> {
        match self {
            Self::Async(f) => match AssertUnwindSafe(f(ctx)).catch_unwind().await {
                Ok(outcome) => outcome.map_err(|e| LiveTxtError::agent(e.as_ref())),
                Err(payload) => Err(LiveTxtError::from_panic(payload)),
            },
            Self::Blocking(f) => {
                let f = Arc::clone(f);
                match tokio::task::spawn_blocking(move || f(ctx)).await {
                    Ok(outcome) => outcome.map_err(|e| LiveTxtError::agent(e.as_ref())),
                    Err(join_error) if join_error.is_panic() => {
                        Err(LiveTxtError::from_panic(join_error.into_panic()))
                    }
                    Err(join_error) => Err(LiveTxtError::AgentExecution {
                        kind: "Cancelled".to_string(),
                        message: join_error.to_string(),
                    }),
                }
            }
        }
    }
}

impl fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("Entrypoint::Async"),
            Self::Blocking(_) => f.write_str("Entrypoint::Blocking"),
        }
    }
}
