use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use adblink_wire::{Command, Message};

use crate::connection::ConnectionInner;
use crate::error::{ConnError, Result};

/// Stream lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Opening,
    Open,
    Closing,
    Closed,
}

pub(crate) struct StreamState {
    pub(crate) phase: Phase,
    pub(crate) remote_id: u32,
    pub(crate) inbox: VecDeque<Bytes>,
    /// True when no WRTE is awaiting its OKAY: the one-outstanding-write
    /// flow-control invariant.
    pub(crate) write_ready: bool,
    /// True when the stream ended because the connection failed rather than
    /// by a clean CLSE.
    pub(crate) failed: bool,
}

/// Shared stream state: written by the receive loop, awaited by callers.
pub(crate) struct StreamInner {
    pub(crate) local_id: u32,
    pub(crate) service: String,
    pub(crate) state: Mutex<StreamState>,
    pub(crate) cv: Condvar,
}

impl StreamInner {
    pub(crate) fn new(local_id: u32, service: String) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            service,
            state: Mutex::new(StreamState {
                phase: Phase::Opening,
                remote_id: 0,
                inbox: VecDeque::new(),
                write_ready: false,
                failed: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// OKAY from the peer: promotes a pending open, or returns write credit.
    pub(crate) fn on_okay(&self, remote_id: u32) {
        let mut state = self.state.lock().expect("stream state poisoned");
        if state.phase == Phase::Opening {
            state.remote_id = remote_id;
            state.phase = Phase::Open;
        }
        state.write_ready = true;
        self.cv.notify_all();
    }

    /// WRTE payload from the peer.
    pub(crate) fn on_wrte(&self, payload: Bytes) {
        let mut state = self.state.lock().expect("stream state poisoned");
        state.inbox.push_back(payload);
        self.cv.notify_all();
    }

    /// The stream is finished: peer CLSE, local teardown, or channel failure.
    pub(crate) fn on_close(&self, failed: bool) {
        let mut state = self.state.lock().expect("stream state poisoned");
        state.phase = Phase::Closed;
        state.failed = state.failed || failed;
        self.cv.notify_all();
    }

    pub(crate) fn remote_id(&self) -> u32 {
        self.state.lock().expect("stream state poisoned").remote_id
    }
}

/// One open service session, e.g. `shell:`.
///
/// Created only by [`crate::Connection::open`]. All methods block; clones
/// share the same underlying stream, so a reader and a writer thread can
/// each hold one.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
    conn: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("local_id", &self.inner.local_id)
            .field("service", &self.inner.service)
            .finish()
    }
}

impl Stream {
    pub(crate) fn from_parts(inner: Arc<StreamInner>, conn: Arc<ConnectionInner>) -> Self {
        Self { inner, conn }
    }

    /// Id this side assigned to the stream.
    pub fn local_id(&self) -> u32 {
        self.inner.local_id
    }

    /// Id the peer assigned when it acknowledged the open.
    pub fn remote_id(&self) -> u32 {
        self.inner.remote_id()
    }

    /// The service string this stream was opened with.
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Whether the stream has fully closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("stream state poisoned").phase == Phase::Closed
    }

    /// Receive the next payload chunk the peer wrote.
    ///
    /// Blocks until data arrives or the stream closes. Returns `Ok(None)` at
    /// end of stream; a connection failure surfaces as an error.
    pub fn read(&self) -> Result<Option<Bytes>> {
        self.read_inner(None)
    }

    /// Like [`read`](Self::read), but gives up after `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.read_inner(Some(timeout))
    }

    fn read_inner(&self, timeout: Option<Duration>) -> Result<Option<Bytes>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock().expect("stream state poisoned");
        loop {
            if let Some(chunk) = state.inbox.pop_front() {
                return Ok(Some(chunk));
            }
            if state.phase == Phase::Closed {
                return if state.failed {
                    Err(ConnError::ConnectionClosed)
                } else {
                    Ok(None)
                };
            }
            state = match deadline {
                None => self.inner.cv.wait(state).expect("stream state poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ConnError::Timeout(timeout.expect("deadline from timeout")));
                    }
                    self.inner
                        .cv
                        .wait_timeout(state, deadline - now)
                        .expect("stream state poisoned")
                        .0
                }
            };
        }
    }

    /// Send `data` to the peer.
    ///
    /// Splits into chunks no larger than the negotiated maximum payload and
    /// waits for this stream's OKAY before each next chunk, so at most one
    /// WRTE is ever outstanding.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let max_chunk = self.conn.max_payload() as usize;
        for chunk in data.chunks(max_chunk) {
            self.acquire_write_credit()?;
            let message = Message::new(
                Command::Wrte,
                self.inner.local_id,
                self.inner.remote_id(),
                Bytes::copy_from_slice(chunk),
            );
            self.conn.send(&message)?;
        }
        Ok(())
    }

    fn acquire_write_credit(&self) -> Result<()> {
        let timeout = self.conn.write_timeout();
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().expect("stream state poisoned");
        loop {
            match state.phase {
                Phase::Open if state.write_ready => {
                    state.write_ready = false;
                    return Ok(());
                }
                Phase::Open => {}
                Phase::Closed if state.failed => return Err(ConnError::ConnectionClosed),
                _ => return Err(ConnError::StreamClosed),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ConnError::Timeout(timeout));
            }
            state = self
                .inner
                .cv
                .wait_timeout(state, deadline - now)
                .expect("stream state poisoned")
                .0;
        }
    }

    /// Half-close: tell the peer this stream is done and return immediately.
    ///
    /// The receive loop finalizes removal when the peer's CLSE (or a channel
    /// failure) arrives. Closing an already-closed stream is a no-op.
    pub fn close(&self) -> Result<()> {
        let remote_id = {
            let mut state = self.inner.state.lock().expect("stream state poisoned");
            match state.phase {
                Phase::Closing | Phase::Closed => return Ok(()),
                _ => {}
            }
            state.phase = Phase::Closing;
            self.inner.cv.notify_all();
            state.remote_id
        };

        debug!(local_id = self.inner.local_id, service = %self.inner.service, "closing stream");
        let message = Message::new(Command::Clse, self.inner.local_id, remote_id, Bytes::new());
        // Best effort: the peer may already be gone.
        let _ = self.conn.send(&message);
        Ok(())
    }
}
