//! Per-stream request sequencing.
//!
//! Every logical stream (e.g. "archive") carries a serial that moves forward
//! once per dispatched request. A response is only applied if the serial it
//! was dispatched under is still the stream's current serial when it
//! resolves: last-dispatched wins, never last-resolved. Superseded requests
//! are not cancelled; their fetch task runs to completion and the result is
//! dropped.
//!
//! Identical keys dispatched while a fetch is pending share that fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use futures_util::future::{BoxFuture, FutureExt, Shared};

/// Error shared between every awaiter of one coalesced fetch
pub type SharedError = Arc<anyhow::Error>;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, SharedError>>>;

struct InFlight<T> {
    serial: u64,
    fetch: SharedFetch<T>,
}

struct StreamState<T> {
    current_serial: u64,
    in_flight: HashMap<String, InFlight<T>>,
}

impl<T> Default for StreamState<T> {
    fn default() -> Self {
        Self {
            current_serial: 0,
            in_flight: HashMap::new(),
        }
    }
}

type Streams<T> = Arc<Mutex<HashMap<&'static str, StreamState<T>>>>;

/// Removes a key from the in-flight map when its fetch task ends, including
/// when the fetch panics or the task is aborted.
struct InFlightGuard<T> {
    registry: Streams<T>,
    stream: &'static str,
    key: String,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        if let Some(state) = lock(&self.registry).get_mut(self.stream) {
            state.in_flight.remove(&self.key);
        }
    }
}

/// Outcome of awaiting a [`Ticket`]
#[derive(Debug, Clone)]
pub enum Settled<T> {
    /// Resolved and still the latest request for its stream
    Fresh(T),
    /// Failed and still the latest request for its stream
    Failed(SharedError),
    /// A newer request was dispatched on the stream; the result is dropped
    Superseded,
}

impl<T> Settled<T> {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Settled::Superseded)
    }
}

pub struct RequestSequencer<T> {
    streams: Streams<T>,
}

impl<T> Clone for RequestSequencer<T> {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
        }
    }
}

impl<T> Default for RequestSequencer<T> {
    fn default() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<T>(streams: &Streams<T>) -> MutexGuard<'_, HashMap<&'static str, StreamState<T>>> {
    streams.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> RequestSequencer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or join) a request on `stream`.
    ///
    /// If `key` is already pending on the stream the existing fetch is
    /// shared and `perform_fetch` is never called. A joined fetch that had
    /// been superseded by another key becomes the latest again, taking a new
    /// serial.
    ///
    /// `perform_fetch` runs under the sequencer lock and must only build the
    /// future. The future itself is spawned onto the tokio runtime, so it is
    /// driven to completion even if every ticket is dropped.
    pub fn dispatch<F, Fut>(&self, stream: &'static str, key: &str, perform_fetch: F) -> Ticket<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut streams = lock(&self.streams);
        let state = streams.entry(stream).or_default();

        if let Some(existing) = state.in_flight.get_mut(key) {
            if existing.serial != state.current_serial {
                state.current_serial += 1;
                existing.serial = state.current_serial;
            }
            tracing::debug!("Coalesced {} request {} (serial {})", stream, key, existing.serial);
            return Ticket {
                stream,
                serial: existing.serial,
                coalesced: true,
                fetch: existing.fetch.clone(),
                sequencer: self.clone(),
            };
        }

        state.current_serial += 1;
        let serial = state.current_serial;

        let fetch = perform_fetch();
        let guard = InFlightGuard {
            registry: Arc::clone(&self.streams),
            stream,
            key: key.to_string(),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            fetch.await.map_err(Arc::new)
        });

        let fetch: SharedFetch<T> = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(anyhow!("Fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            key.to_string(),
            InFlight {
                serial,
                fetch: fetch.clone(),
            },
        );
        tracing::debug!("Dispatched {} request {} (serial {})", stream, key, serial);

        Ticket {
            stream,
            serial,
            coalesced: false,
            fetch,
            sequencer: self.clone(),
        }
    }

    /// Advance the stream's serial without issuing a request.
    ///
    /// Used when a result is served from cache so that any older request
    /// still pending on the stream is discarded when it lands.
    pub fn supersede(&self, stream: &'static str) -> u64 {
        let mut streams = lock(&self.streams);
        let state = streams.entry(stream).or_default();
        state.current_serial += 1;
        state.current_serial
    }
}

impl<T> RequestSequencer<T> {
    pub fn current_serial(&self, stream: &str) -> u64 {
        lock(&self.streams)
            .get(stream)
            .map(|s| s.current_serial)
            .unwrap_or(0)
    }

    pub fn is_current(&self, stream: &str, serial: u64) -> bool {
        self.current_serial(stream) == serial
    }

    /// Number of distinct fetches pending on `stream`
    pub fn in_flight(&self, stream: &str) -> usize {
        lock(&self.streams)
            .get(stream)
            .map(|s| s.in_flight.len())
            .unwrap_or(0)
    }
}

/// Handle to one dispatched (or joined) request
pub struct Ticket<T> {
    stream: &'static str,
    serial: u64,
    coalesced: bool,
    fetch: SharedFetch<T>,
    sequencer: RequestSequencer<T>,
}

impl<T> Ticket<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// True when this ticket joined a fetch started by an earlier dispatch
    pub fn coalesced(&self) -> bool {
        self.coalesced
    }

    pub fn is_current(&self) -> bool {
        self.sequencer.is_current(self.stream, self.serial)
    }

    /// Await the raw result, without the staleness check
    pub async fn result(self) -> Result<T, SharedError> {
        self.fetch.await
    }

    /// Await the fetch and check the serial at resolution time
    pub async fn settle(self) -> Settled<T> {
        let result = self.fetch.clone().await;

        if !self.is_current() {
            tracing::debug!(
                "Discarding superseded {} response (serial {}, current {})",
                self.stream,
                self.serial,
                self.sequencer.current_serial(self.stream)
            );
            return Settled::Superseded;
        }

        match result {
            Ok(value) => Settled::Fresh(value),
            Err(e) => Settled::Failed(e),
        }
    }
}
