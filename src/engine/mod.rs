//! Dispatch engine
//!
//! Runs one protocol session over an input and an output stream:
//! - a single reader loop decodes operations strictly in stream order
//! - `get`/`put` operations run on a bounded pool of workers, concurrently
//!   with further reading
//! - responses are written whole, one at a time, in completion order
//!
//! Any failure aborts the session. The reader stops, in-flight workers are
//! allowed to finish, and the first error is returned.

mod error;
mod state;

pub use error::EngineError;
pub use state::SessionState;

use std::io;
use std::sync::{Arc, Mutex as StdMutex};

use cacheprog_protocol::{
    Command, Operation, ProtocolError, RecordReader, Response, ResponseWriter,
};
use cacheprog_store::{ActionKey, ObjectKey, Provider, StoreError};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of `get`/`put` operations executing at once.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { workers: 2 * cpus }
    }
}

impl EngineConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }

    /// Worker budget, clamped to at least one.
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

type SharedWriter<W> = Arc<Mutex<ResponseWriter<W>>>;

/// A validated `get` or `put`, ready for a worker.
enum Job {
    Get {
        id: i64,
        action: ActionKey,
    },
    Put {
        id: i64,
        action: ActionKey,
        object: ObjectKey,
        body: Vec<u8>,
    },
}

impl Job {
    /// Validate a decoded operation. `Ok(None)` is a `close`.
    fn from_operation(op: Operation) -> Result<Option<Self>, ProtocolError> {
        match op {
            Operation::Close { .. } => Ok(None),
            Operation::Get { id, action_id } => {
                if action_id.is_empty() {
                    return Err(ProtocolError::InvalidActionId { id });
                }
                Ok(Some(Job::Get {
                    id,
                    action: ActionKey::from_bytes(action_id),
                }))
            }
            Operation::Put {
                id,
                action_id,
                output_id,
                body,
            } => {
                if action_id.is_empty() {
                    return Err(ProtocolError::InvalidActionId { id });
                }
                if output_id.is_empty() {
                    return Err(ProtocolError::InvalidOutputId { id });
                }
                Ok(Some(Job::Put {
                    id,
                    action: ActionKey::from_bytes(action_id),
                    object: ObjectKey::from_bytes(output_id),
                    body,
                }))
            }
        }
    }

    fn id(&self) -> i64 {
        match self {
            Job::Get { id, .. } | Job::Put { id, .. } => *id,
        }
    }

    fn command(&self) -> Command {
        match self {
            Job::Get { .. } => Command::Get,
            Job::Put { .. } => Command::Put,
        }
    }
}

/// First error of a session. Recording one stops the reader.
#[derive(Default)]
struct Failure {
    first: StdMutex<Option<EngineError>>,
    token: CancellationToken,
}

impl Failure {
    fn record(&self, err: EngineError) {
        if let Ok(mut first) = self.first.lock() {
            if first.is_none() {
                *first = Some(err);
            } else {
                debug!(error = %err, "ignoring error after session failure");
            }
        }
        self.token.cancel();
    }

    fn take(&self) -> Option<EngineError> {
        self.first.lock().ok().and_then(|mut first| first.take())
    }
}

/// Protocol engine serving one session at a time from a [`Provider`].
pub struct Engine {
    provider: Arc<dyn Provider>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    /// Run a session to completion.
    ///
    /// Returns `Ok(())` on end of input or after a `close` (once every
    /// in-flight operation has responded and the provider has been closed).
    /// End of input does not close the provider.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<(), EngineError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let workers = self.config.effective_workers();
        let mut state = SessionState::Starting;
        let writer: SharedWriter<W> = Arc::new(Mutex::new(ResponseWriter::new(output)));

        let handshake = Response::handshake(self.provider.known_commands());
        if let Err(e) = writer.lock().await.write(&handshake).await {
            transition(&mut state, SessionState::Terminated);
            error!(error = %e, "failed to send handshake");
            return Err(e.into());
        }
        transition(&mut state, SessionState::Reading);
        info!(workers, "session started");

        let failure = Arc::new(Failure::default());
        let permits = Arc::new(Semaphore::new(workers));
        let mut reader = RecordReader::new(input);
        let mut tasks = JoinSet::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    failure.record(EngineError::Worker(e.to_string()));
                }
            }

            let next = tokio::select! {
                biased;
                _ = failure.token.cancelled() => break,
                next = reader.next_operation() => next,
            };

            let op = match next {
                Ok(Some(op)) => op,
                Ok(None) => {
                    debug!("end of input");
                    break;
                }
                Err(e) => {
                    fail(&writer, &failure, e.into()).await;
                    break;
                }
            };
            debug!(id = op.id(), command = %op.command(), "received operation");

            let job = match Job::from_operation(op) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    transition(&mut state, SessionState::Draining);
                    break;
                }
                Err(e) => {
                    fail(&writer, &failure, e.into()).await;
                    break;
                }
            };

            // Blocks the reader while every worker slot is busy
            let permit = tokio::select! {
                biased;
                _ = failure.token.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let provider = Arc::clone(&self.provider);
            let writer = Arc::clone(&writer);
            let failure = Arc::clone(&failure);
            tasks.spawn(async move {
                let _permit = permit;
                run_job(provider.as_ref(), &writer, &failure, job).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                failure.record(EngineError::Worker(e.to_string()));
            }
        }

        let mut outcome = failure.take();
        if outcome.is_none() && state == SessionState::Draining {
            if let Err(e) = self.provider.close().await {
                outcome = Some(EngineError::Close(e));
            }
        }
        transition(&mut state, SessionState::Terminated);

        match outcome {
            Some(err) => {
                error!(error = %err, "session failed");
                Err(err)
            }
            None => {
                info!("session finished");
                Ok(())
            }
        }
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid session transition {} -> {}",
        state,
        next
    );
    debug!(from = %state, to = %next, "session state");
    *state = next;
}

/// Record a reader-side failure, answering the offending request if known.
async fn fail<W>(writer: &SharedWriter<W>, failure: &Failure, err: EngineError)
where
    W: AsyncWrite + Unpin + Send,
{
    if let Some(id) = err.request_id() {
        let response = Response::error(id, err.to_string());
        if let Err(e) = writer.lock().await.write(&response).await {
            debug!(id, error = %e, "failed to report error");
        }
    }
    failure.record(err);
}

async fn run_job<W>(provider: &dyn Provider, writer: &SharedWriter<W>, failure: &Failure, job: Job)
where
    W: AsyncWrite + Unpin + Send,
{
    let id = job.id();
    let command = job.command();

    let response = match execute(provider, job).await {
        Ok(response) => response,
        Err(source) => {
            let err = EngineError::Operation {
                id,
                command,
                source,
            };
            let response = Response::error(id, err.to_string());
            failure.record(err);
            response
        }
    };

    if let Err(e) = writer.lock().await.write(&response).await {
        failure.record(e.into());
    }
}

async fn execute(provider: &dyn Provider, job: Job) -> Result<Response, StoreError> {
    match job {
        Job::Get { id, action } => {
            let Some(hit) = provider.get(&action).await? else {
                debug!(id, action = %action, "miss");
                return Ok(Response::miss(id));
            };

            let stat = tokio::fs::metadata(&hit.disk_path).await;
            let meta = match stat {
                Ok(meta) => meta,
                // Removed since the lookup
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(id, action = %action, "object vanished after lookup");
                    return Ok(Response::miss(id));
                }
                Err(source) => {
                    return Err(StoreError::Path {
                        path: hit.disk_path,
                        source,
                    })
                }
            };
            let modified = meta.modified().map_err(|source| StoreError::Path {
                path: hit.disk_path.clone(),
                source,
            })?;
            let size = i64::try_from(meta.len()).unwrap_or(i64::MAX);

            debug!(id, action = %action, size, "hit");
            Ok(Response::hit(
                id,
                hit.object.into_bytes(),
                size,
                DateTime::<Utc>::from(modified),
                hit.disk_path.to_string_lossy(),
            ))
        }
        Job::Put {
            id,
            action,
            object,
            body,
        } => {
            let mut reader: &[u8] = &body;
            let disk_path = provider.put(&action, &object, &mut reader).await?;
            debug!(id, action = %action, size = body.len(), "stored");
            Ok(Response::stored(id, disk_path.to_string_lossy()))
        }
    }
}
