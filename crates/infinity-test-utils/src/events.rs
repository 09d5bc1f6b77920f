//! Scripted event stream opener.
//!
//! Each call to `open` consumes the next scripted connection: either a
//! refusal with a given error, or a body of raw SSE chunks followed by a
//! tail (fail, end or hang). Once the script is exhausted, connections
//! hang forever.
//!
//! # Example
//!
//! ```rust,ignore
//! use infinity_test_utils::events::*;
//!
//! let opener = ScriptedStreamOpener::new()
//!     .serve(&["id: 1\ndata: a\n\n"], StreamTail::Fail)
//!     .refuse(StreamError::Http { status: 503 })
//!     .serve(&["id: 2\ndata: b\n\n"], StreamTail::Hang);
//! ```

use bytes::Bytes;
use futures::stream::StreamExt;
use infinity_client::errors::{StreamError, TransportError};
use infinity_client::events::StreamOpener;
use infinity_client::http::ByteStream;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// How a served connection ends after its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTail {
    /// Transport error mid-stream.
    Fail,
    /// Clean end of body.
    End,
    /// Stays open without data.
    Hang,
}

#[derive(Debug)]
enum Connection {
    Refuse(StreamError),
    Serve(Vec<String>, StreamTail),
}

/// [`StreamOpener`] replaying a script of connections.
#[derive(Debug)]
pub struct ScriptedStreamOpener {
    script: Mutex<VecDeque<Connection>>,
    opened_with: Mutex<Vec<Option<String>>>,
    chunk_interval: Duration,
}

impl Default for ScriptedStreamOpener {
    fn default() -> Self {
        Self {
            script: Mutex::default(),
            opened_with: Mutex::default(),
            chunk_interval: Duration::from_millis(10),
        }
    }
}

impl ScriptedStreamOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `chunks`, then end as `tail`.
    #[must_use]
    pub fn serve(self, chunks: &[&str], tail: StreamTail) -> Self {
        let chunks = chunks.iter().map(|c| (*c).to_string()).collect();
        self.script
            .lock()
            .unwrap()
            .push_back(Connection::Serve(chunks, tail));
        self
    }

    /// Fail the connection attempt with `error`.
    #[must_use]
    pub fn refuse(self, error: StreamError) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Connection::Refuse(error));
        self
    }

    /// Delay before each chunk (default 10ms).
    #[must_use]
    pub fn with_chunk_interval(mut self, interval: Duration) -> Self {
        self.chunk_interval = interval;
        self
    }

    /// `Last-Event-Id` passed to each `open` call, in order.
    pub fn opened_with(&self) -> Vec<Option<String>> {
        self.opened_with.lock().unwrap().clone()
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> usize {
        self.opened_with.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl StreamOpener for ScriptedStreamOpener {
    async fn open(&self, last_event_id: Option<&str>) -> Result<ByteStream, StreamError> {
        self.opened_with
            .lock()
            .unwrap()
            .push(last_event_id.map(str::to_string));

        let next = self.script.lock().unwrap().pop_front();
        let (chunks, tail) = match next {
            Some(Connection::Refuse(error)) => return Err(error),
            Some(Connection::Serve(chunks, tail)) => (chunks, tail),
            None => (Vec::new(), StreamTail::Hang),
        };

        let interval = self.chunk_interval;
        let body = futures::stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(interval).await;
            Ok::<_, TransportError>(Bytes::from(chunk))
        });

        let tail: ByteStream = match tail {
            StreamTail::Fail => futures::stream::iter([Err(TransportError::Request(
                "connection reset by peer".to_string(),
            ))])
            .boxed(),
            StreamTail::End => futures::stream::empty().boxed(),
            StreamTail::Hang => futures::stream::pending().boxed(),
        };

        Ok(body.chain(tail).boxed())
    }
}
