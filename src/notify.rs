//! Job event broadcast.
//!
//! One `Notifier` per process fans every `JobEvent` out to every registered
//! observer. Delivery is not addressed per job: observers that only care about
//! one job filter on `job_id`.
//!
//! Concurrency: the observer set lives behind a single `Mutex`. Registration,
//! removal and broadcast all take it, so job threads broadcasting at the same
//! time are serialised and an observer never sees a half-delivered event from
//! two jobs interleaved. Observers whose delivery fails are dropped during the
//! broadcast that saw the failure.

use anyhow::{anyhow, Context, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Status string carried by completion events.
pub const STATUS_COMPLETED: &str = "completed";
/// Status string carried by failure events.
pub const STATUS_ERROR: &str = "error";

#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    /// Intermediate progress in percent, `0.0..=100.0`.
    Progress { job_id: String, progress: f64 },
    /// All frames written and the container finalized.
    Completed {
        job_id: String,
        output_location: String,
    },
    /// The job stopped on a fatal error.
    Failed { job_id: String, message: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }

    /// Progress value carried on the wire, if any.
    pub fn progress(&self) -> Option<f64> {
        match self {
            JobEvent::Progress { progress, .. } => Some(*progress),
            JobEvent::Completed { .. } => Some(100.0),
            JobEvent::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize job event")
    }

    fn wire(&self) -> WireEvent<'_> {
        match self {
            JobEvent::Progress { job_id, progress } => WireEvent {
                job_id,
                progress: Some(*progress),
                status: None,
                output_location: None,
                message: None,
            },
            JobEvent::Completed {
                job_id,
                output_location,
            } => WireEvent {
                job_id,
                progress: Some(100.0),
                status: Some(STATUS_COMPLETED),
                output_location: Some(output_location.as_str()),
                message: None,
            },
            JobEvent::Failed { job_id, message } => WireEvent {
                job_id,
                progress: None,
                status: Some(STATUS_ERROR),
                output_location: None,
                message: Some(message.as_str()),
            },
        }
    }
}

#[derive(Serialize)]
struct WireEvent<'a> {
    job_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl Serialize for JobEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.wire().serialize(serializer)
    }
}

/// Receiver side of the broadcast. Implementations forward events to a
/// transport (socket, channel, terminal).
pub trait EventObserver: Send + Sync {
    /// Deliver one event. An error unregisters the observer.
    fn deliver(&self, event: &JobEvent) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

#[derive(Default)]
struct ObserverSet {
    next_id: u64,
    observers: Vec<(ObserverId, Arc<dyn EventObserver>)>,
}

/// Process-scoped broadcaster shared by every job through `Arc<Notifier>`.
#[derive(Default)]
pub struct Notifier {
    inner: Mutex<ObserverSet>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        let mut set = self.lock();
        let id = ObserverId(set.next_id);
        set.next_id += 1;
        set.observers.push((id, observer));
        log::debug!("notifier: registered {}", id);
        id
    }

    /// Remove an observer. Returns false when it was not registered (anymore).
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut set = self.lock();
        let before = set.observers.len();
        set.observers.retain(|(existing, _)| *existing != id);
        before != set.observers.len()
    }

    /// Register a channel observer and hand back its receiving end.
    pub fn subscribe(&self) -> (ObserverId, Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel();
        let id = self.register(Arc::new(ChannelObserver::new(tx)));
        (id, rx)
    }

    /// Deliver `event` to every observer. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &JobEvent) -> usize {
        let mut set = self.lock();
        let mut delivered = 0;
        set.observers.retain(|(id, observer)| match observer.deliver(event) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(err) => {
                log::warn!("notifier: dropping {} after failed delivery: {:#}", id, err);
                false
            }
        });
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ObserverSet> {
        // A panicking observer cannot leave the set half-updated; keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Forwards events into a std channel.
pub struct ChannelObserver {
    tx: Sender<JobEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<JobEvent>) -> Self {
        Self { tx }
    }
}

impl EventObserver for ChannelObserver {
    fn deliver(&self, event: &JobEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow!("channel receiver dropped"))
    }
}

/// Writes one JSON object per line, flushing after each event.
pub struct JsonLinesObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> EventObserver for JsonLinesObserver<W> {
    fn deliver(&self, event: &JobEvent) -> Result<()> {
        let line = event.to_json()?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("json output lock poisoned"))?;
        writeln!(out, "{}", line).context("write json event")?;
        out.flush().context("flush json event")
    }
}

/// Mirrors events into the `log` facade.
#[derive(Default)]
pub struct LogObserver;

impl EventObserver for LogObserver {
    fn deliver(&self, event: &JobEvent) -> Result<()> {
        match event {
            JobEvent::Progress { job_id, progress } => {
                log::debug!("job {}: {:.1}%", job_id, progress)
            }
            JobEvent::Completed {
                job_id,
                output_location,
            } => log::info!("job {}: completed -> {}", job_id, output_location),
            JobEvent::Failed { job_id, message } => {
                log::error!("job {}: failed: {}", job_id, message)
            }
        }
        Ok(())
    }
}
