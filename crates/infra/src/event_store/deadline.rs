use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use autoshop_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

type Job<S> = Box<dyn FnOnce(&S) + Send>;

/// Bounds every call to the wrapped store.
///
/// Calls run one at a time on a single long-lived worker thread; if a call
/// has not answered within `timeout` the caller gets
/// `EventStoreError::Unavailable` instead of hanging. A write that times out
/// may still land later, so callers re-read before retrying. Calls queued
/// behind a stalled one time out too rather than piling up threads.
pub struct DeadlineEventStore<S> {
    inner: Arc<S>,
    jobs: Mutex<Option<mpsc::Sender<Job<S>>>>,
    timeout: Duration,
}

impl<S> DeadlineEventStore<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(inner: S, timeout: Duration) -> Self {
        let inner = Arc::new(inner);
        let (tx, rx) = mpsc::channel::<Job<S>>();
        let store = Arc::clone(&inner);

        let spawned = thread::Builder::new()
            .name("event-store".to_string())
            .spawn(move || {
                for job in rx {
                    job(&store);
                }
                debug!("event store worker stopped");
            });
        let jobs = match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                warn!(error = %e, "cannot start event store worker; every call will be unavailable");
                None
            }
        };

        Self {
            inner,
            jobs: Mutex::new(jobs),
            timeout,
        }
    }
}

impl<S> DeadlineEventStore<S> {
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<S> Drop for DeadlineEventStore<S> {
    /// Closing the queue lets the worker exit once the current call returns.
    fn drop(&mut self) {
        self.jobs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl<S> DeadlineEventStore<S>
where
    S: EventStore + 'static,
{
    fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, EventStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, EventStoreError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job<S> = Box::new(move |store: &S| {
            // The receiver is gone if the caller already gave up.
            let _ = tx.send(f(store));
        });

        let queued = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|jobs| jobs.send(job).is_ok())
            .unwrap_or(false);
        if !queued {
            return Err(EventStoreError::Unavailable(format!(
                "{op} rejected: event store worker is not running"
            )));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "event store call timed out");
                Err(EventStoreError::Unavailable(format!(
                    "{op} did not complete within {} ms",
                    self.timeout.as_millis()
                )))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EventStoreError::Unavailable(format!(
                "{op} call aborted"
            ))),
        }
    }
}

impl<S> EventStore for DeadlineEventStore<S>
where
    S: EventStore + 'static,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.call("append", move |s| s.append(events, expected_version))
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.call("load_stream", move |s| s.load_stream(aggregate_id))
    }

    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        let aggregate_type = aggregate_type.to_string();
        self.call("stream_ids", move |s| s.stream_ids(&aggregate_type))
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.call("load_all", |s| s.load_all())
    }
}
