//! Reconnecting event stream client.
//!
//! [`EventSource::events`] spawns a reader task that opens the stream,
//! parses it with [`parser::SseParser`] and hands events to the returned
//! [`EventStream`]. When the connection fails or ends, the reader waits
//! `min(max_delay, base_delay * attempt)` and reconnects with the last
//! received `id` as `Last-Event-Id`. The attempt counter resets on every
//! received event. A 401 or 403 is surfaced immediately; any other failure
//! is surfaced once the consecutive attempts exceed `max_retries`.
//!
//! The reader never waits for the consumer. It keeps at most one pending
//! event; if the consumer falls behind, the newer event replaces the older
//! one and the drop is counted in [`EventStreamStats`].

pub mod conference;
pub mod parser;

use crate::config::EventSourceConfig;
use crate::errors::StreamError;
use crate::http::ByteStream;
use futures::stream::{Stream, StreamExt};
use parser::SseParser;
pub use parser::StreamEvent;
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens the underlying byte stream (enables mocking).
#[async_trait::async_trait]
pub trait StreamOpener: Send + Sync {
    /// Open a new connection, resuming after `last_event_id` if given.
    async fn open(&self, last_event_id: Option<&str>) -> Result<ByteStream, StreamError>;
}

/// Counters describing the life of one [`EventStream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStreamStats {
    /// Recoverable failures followed by a reconnect.
    pub reconnects: u64,
    /// Pending events replaced before the consumer took them.
    pub dropped: u64,
    /// Most recent reconnect delay.
    pub last_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<StreamEvent>,
    terminal: Option<StreamError>,
    closed: bool,
    last_event_id: Option<String>,
    stats: EventStreamStats,
}

#[derive(Debug, Default)]
struct Mailbox {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance_id(&self, id: &str) {
        self.lock().last_event_id = Some(id.to_string());
    }

    fn deliver(&self, event: StreamEvent) {
        let mut slot = self.lock();
        if let Some(replaced) = slot.pending.replace(event) {
            slot.stats.dropped += 1;
            warn!(
                target: "infinity.events",
                dropped_id = ?replaced.id,
                dropped_total = slot.stats.dropped,
                "Consumer is behind, dropping pending event"
            );
        }
        drop(slot);
        self.notify.notify_one();
    }

    fn finish(&self, error: StreamError) {
        self.lock().terminal = Some(error);
        self.notify.notify_one();
    }

    fn record_reconnect(&self, delay: Duration) {
        let mut slot = self.lock();
        slot.stats.reconnects += 1;
        slot.stats.last_delay = Some(delay);
    }
}

/// Factory for reconnecting event streams.
#[derive(Clone)]
pub struct EventSource {
    opener: Arc<dyn StreamOpener>,
    config: EventSourceConfig,
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventSource {
    #[must_use]
    pub fn new(opener: Arc<dyn StreamOpener>, config: EventSourceConfig) -> Self {
        Self { opener, config }
    }

    /// Start reading events, resuming after `last_event_id` if given.
    ///
    /// The connection is opened lazily by the spawned reader; failures are
    /// reported through [`EventStream::next`]. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn events(&self, last_event_id: Option<String>) -> EventStream {
        let mailbox = Arc::new(Mailbox::default());
        let cancel = CancellationToken::new();

        let reader = Reader {
            opener: Arc::clone(&self.opener),
            config: self.config.clone(),
            mailbox: Arc::clone(&mailbox),
            cancel: cancel.clone(),
            last_event_id,
            base_delay: self.config.base_delay,
            attempts: 0,
        };
        tokio::spawn(reader.run());

        EventStream { mailbox, cancel }
    }
}

/// Consumer side of a reconnecting event stream.
///
/// Dropping it stops the reader task.
#[derive(Debug)]
pub struct EventStream {
    mailbox: Arc<Mailbox>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Wait for the next event.
    ///
    /// Returns `Some(Err(_))` once when the stream gives up, then `None`.
    pub async fn next(&mut self) -> Option<Result<StreamEvent, StreamError>> {
        loop {
            let notified = self.mailbox.notify.notified();
            {
                let mut slot = self.mailbox.lock();
                if let Some(event) = slot.pending.take() {
                    return Some(Ok(event));
                }
                if let Some(error) = slot.terminal.take() {
                    slot.closed = true;
                    return Some(Err(error));
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Id of the most recent event received from the wire, including
    /// blocks that carried only an id.
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.mailbox.lock().last_event_id.clone()
    }

    #[must_use]
    pub fn stats(&self) -> EventStreamStats {
        self.mailbox.lock().stats
    }

    /// Stop reading. Events already pending are still returned.
    pub fn close(&self) {
        self.cancel.cancel();
        self.mailbox.lock().closed = true;
        self.mailbox.notify.notify_one();
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, StreamError>> + Send {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|item| (item, events))
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Reader {
    opener: Arc<dyn StreamOpener>,
    config: EventSourceConfig,
    mailbox: Arc<Mailbox>,
    cancel: CancellationToken,
    last_event_id: Option<String>,
    base_delay: Duration,
    attempts: u32,
}

impl Reader {
    async fn run(mut self) {
        let mut parser = SseParser::new();

        loop {
            let opened = tokio::select! {
                () = self.cancel.cancelled() => return,
                opened = self.opener.open(self.last_event_id.as_deref()) => opened,
            };

            let failure = match opened {
                Ok(stream) => {
                    debug!(
                        target: "infinity.events",
                        last_event_id = ?self.last_event_id,
                        "Event stream connected"
                    );
                    match self.read(stream, &mut parser).await {
                        Some(failure) => failure,
                        None => return,
                    }
                }
                Err(e) => e,
            };
            parser.reset();

            if failure.is_auth_failure() {
                warn!(target: "infinity.events", error = %failure, "Event stream rejected, not retrying");
                self.mailbox.finish(failure);
                return;
            }

            self.attempts += 1;
            if self.attempts > self.config.max_retries {
                warn!(
                    target: "infinity.events",
                    attempts = self.attempts,
                    error = %failure,
                    "Event stream retries exhausted"
                );
                self.mailbox.finish(StreamError::RetriesExhausted {
                    attempts: self.attempts,
                    last: Box::new(failure),
                });
                return;
            }

            let delay = self.next_delay();
            self.mailbox.record_reconnect(delay);
            info!(
                target: "infinity.events",
                attempt = self.attempts,
                delay_ms = delay.as_millis(),
                error = %failure,
                "Event stream interrupted, reconnecting"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read until the stream fails or ends. `None` means cancelled.
    async fn read(&mut self, mut stream: ByteStream, parser: &mut SseParser) -> Option<StreamError> {
        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return None,
                chunk = stream.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Some(StreamError::Transport(e)),
                None => return Some(StreamError::Ended),
            };

            let events = match parser.feed(&bytes) {
                Ok(events) => events,
                Err(e) => return Some(e),
            };

            for event in events {
                self.attempts = 0;
                if let Some(id) = &event.id {
                    self.last_event_id = Some(id.clone());
                    self.mailbox.advance_id(id);
                }
                if let Some(retry_ms) = event.retry_ms {
                    self.base_delay = Duration::from_millis(retry_ms);
                    debug!(target: "infinity.events", retry_ms, "Server set reconnect delay");
                }
                // An event carrying only a retry hint is not delivered.
                if event.data.is_some() || event.name.is_some() {
                    self.mailbox.deliver(event);
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn next_delay(&self) -> Duration {
        backoff_delay(
            self.base_delay,
            self.config.max_delay,
            self.attempts,
            self.config.jitter,
        )
    }
}

/// `min(max, base * attempt)`, reduced by up to `jitter` of itself.
fn backoff_delay(base: Duration, max: Duration, attempt: u32, jitter: f64) -> Duration {
    let delay = base.saturating_mul(attempt).min(max);
    if jitter <= 0.0 {
        return delay;
    }
    let shave = rand::thread_rng().gen_range(0.0..=jitter.min(1.0));
    delay.mul_f64(1.0 - shave)
}
