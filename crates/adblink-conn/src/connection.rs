use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use adblink_auth::AdbKeyPair;
use adblink_channel::Channel;
use adblink_wire::{
    Command, Message, MessageReader, MessageWriter, ADB_VERSION, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE,
    AUTH_TOKEN, CONNECT_MAX_PAYLOAD, MAX_PAYLOAD,
};

use crate::config::ConnectConfig;
use crate::error::{ConnError, Result};
use crate::stream::{Phase, Stream, StreamInner};

/// Connection lifecycle. Transitions are driven by messages observed on the
/// receive loop or by an explicit `close`; closing is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingConnect,
    AwaitingAuth,
    Connected,
    Closed,
}

struct HandshakeState {
    phase: ConnectionState,
    /// Whether we already answered one token with a signature; a second
    /// token means the signature was rejected.
    sent_signature: bool,
    remote_identity: Option<String>,
}

/// State shared between the connection handle, its streams, and the receive
/// loop.
pub(crate) struct ConnectionInner {
    channel: Arc<dyn Channel>,
    /// The connection-wide send lock: all message emission serializes here.
    writer: Mutex<MessageWriter<dyn Channel>>,
    keypair: AdbKeyPair,
    config: ConnectConfig,
    state: Mutex<HandshakeState>,
    state_cv: Condvar,
    /// Open streams keyed by local id. Guarded separately from the writer
    /// lock so the receive loop and open/close never contend on sends.
    streams: Mutex<HashMap<u32, Arc<StreamInner>>>,
    next_local_id: AtomicU32,
    /// Negotiated outgoing chunk cap; the peer's CNXN advertisement.
    max_payload: AtomicU32,
}

impl ConnectionInner {
    pub(crate) fn send(&self, message: &Message) -> Result<()> {
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        writer.send(message).map_err(ConnError::from)
    }

    pub(crate) fn max_payload(&self) -> u32 {
        self.max_payload.load(Ordering::Relaxed)
    }

    pub(crate) fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }

    fn phase(&self) -> ConnectionState {
        self.state.lock().expect("state lock poisoned").phase
    }

    /// Tear the connection down after an unrecoverable error: wake every
    /// waiter, fail every stream, release the channel.
    fn fail(&self, reason: &ConnError) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.phase == ConnectionState::Closed {
                return;
            }
            state.phase = ConnectionState::Closed;
            self.state_cv.notify_all();
            warn!(%reason, "connection failed");
        }

        let streams: Vec<_> = {
            let mut streams = self.streams.lock().expect("stream table poisoned");
            streams.drain().map(|(_, stream)| stream).collect()
        };
        for stream in streams {
            stream.on_close(true);
        }
        self.channel.close();
    }

    fn handle_message(&self, message: Message) -> Result<()> {
        match message.command {
            Command::Cnxn => self.on_cnxn(message),
            Command::Auth => self.on_auth(message),
            Command::Okay => {
                let stream = self.lookup(message.arg1);
                match stream {
                    Some(stream) => stream.on_okay(message.arg0),
                    None => debug!(local = message.arg1, "dropping OKAY for unknown stream"),
                }
                Ok(())
            }
            Command::Wrte => {
                let stream = self.lookup(message.arg1);
                match stream {
                    Some(stream) => {
                        let ack =
                            Message::new(Command::Okay, stream.local_id, message.arg0, Bytes::new());
                        stream.on_wrte(message.payload);
                        // The acknowledgment is the peer's next write credit;
                        // send it as soon as the payload is queued.
                        self.send(&ack)?;
                    }
                    None => debug!(local = message.arg1, "dropping WRTE for unknown stream"),
                }
                Ok(())
            }
            Command::Clse => {
                let stream = {
                    let mut streams = self.streams.lock().expect("stream table poisoned");
                    streams.remove(&message.arg1)
                };
                match stream {
                    Some(stream) => {
                        debug!(local = stream.local_id, service = %stream.service, "peer closed stream");
                        stream.on_close(false);
                    }
                    None => debug!(local = message.arg1, "dropping CLSE for unknown stream"),
                }
                Ok(())
            }
            Command::Open => {
                // Device-initiated streams are not part of this engine;
                // refuse instead of crashing the loop.
                debug!(remote = message.arg0, "refusing device-initiated OPEN");
                self.send(&Message::new(Command::Clse, 0, message.arg0, Bytes::new()))
            }
        }
    }

    fn on_cnxn(&self, message: Message) -> Result<()> {
        let identity = banner_text(&message.payload);
        if message.arg1 > 0 {
            let negotiated = message.arg1.min(MAX_PAYLOAD as u32);
            self.max_payload.store(negotiated, Ordering::Relaxed);
        }

        let mut state = self.state.lock().expect("state lock poisoned");
        match state.phase {
            ConnectionState::AwaitingConnect | ConnectionState::AwaitingAuth => {
                info!(identity = %identity, max_payload = self.max_payload(), "handshake complete");
                state.remote_identity = Some(identity);
                state.phase = ConnectionState::Connected;
                self.state_cv.notify_all();
                Ok(())
            }
            // A duplicate CNXN after we are connected carries nothing new.
            ConnectionState::Connected => Ok(()),
            phase => Err(ConnError::HandshakeFailed(format!(
                "CNXN in state {phase:?}"
            ))),
        }
    }

    fn on_auth(&self, message: Message) -> Result<()> {
        if message.arg0 != AUTH_TOKEN {
            return Err(ConnError::HandshakeFailed(format!(
                "unexpected AUTH kind {}",
                message.arg0
            )));
        }

        let offer_public_key = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.phase == ConnectionState::Connected {
                return Ok(());
            }
            state.phase = ConnectionState::AwaitingAuth;
            let rejected = state.sent_signature;
            state.sent_signature = true;
            rejected
        };

        if offer_public_key {
            // The device rejected our signature; it does not know this key
            // yet. Offer the public half and wait for the human to approve
            // the prompt on screen.
            info!("signature rejected, offering public key for on-device approval");
            let blob = self.keypair.public_key_payload(&self.config.key_name);
            self.send(&Message::new(Command::Auth, AUTH_RSAPUBLICKEY, 0, blob))
        } else {
            debug!("signing device auth token");
            let signature = self.keypair.sign_token(&message.payload)?;
            self.send(&Message::new(Command::Auth, AUTH_SIGNATURE, 0, signature))
        }
    }

    fn lookup(&self, local_id: u32) -> Option<Arc<StreamInner>> {
        self.streams
            .lock()
            .expect("stream table poisoned")
            .get(&local_id)
            .cloned()
    }
}

/// One authenticated, multiplexed connection to a device.
///
/// Owns exactly one channel and one key pair. `connect` runs the handshake
/// and starts the receive loop; `open` creates streams; `close` tears
/// everything down. A channel is never shared between two connections.
pub struct Connection {
    inner: Arc<ConnectionInner>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection over `channel` with default configuration.
    pub fn new(channel: impl Channel + 'static, keypair: AdbKeyPair) -> Self {
        Self::with_config(channel, keypair, ConnectConfig::default())
    }

    /// Create a connection with explicit configuration.
    pub fn with_config(
        channel: impl Channel + 'static,
        keypair: AdbKeyPair,
        config: ConnectConfig,
    ) -> Self {
        let channel: Arc<dyn Channel> = Arc::new(channel);
        let writer = MessageWriter::new(Arc::clone(&channel));
        Self {
            inner: Arc::new(ConnectionInner {
                channel,
                writer: Mutex::new(writer),
                keypair,
                config,
                state: Mutex::new(HandshakeState {
                    phase: ConnectionState::Disconnected,
                    sent_signature: false,
                    remote_identity: None,
                }),
                state_cv: Condvar::new(),
                streams: Mutex::new(HashMap::new()),
                next_local_id: AtomicU32::new(1),
                max_payload: AtomicU32::new(CONNECT_MAX_PAYLOAD),
            }),
            recv_thread: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.phase()
    }

    /// The peer's system identity banner, once connected.
    pub fn remote_identity(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .remote_identity
            .clone()
    }

    /// Run the handshake: send CNXN, answer AUTH, block until the peer
    /// accepts or the attempt fails.
    ///
    /// May be called once per connection; reconnecting means constructing a
    /// new `Connection` over a new channel.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if state.phase != ConnectionState::Disconnected {
                return Err(ConnError::AlreadyConnected);
            }
            state.phase = ConnectionState::AwaitingConnect;
        }

        let loop_inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("adblink-recv".to_string())
            .spawn(move || receive_loop(loop_inner));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                let err = ConnError::Channel(adblink_channel::ChannelError::Io(err));
                self.inner.fail(&err);
                return Err(err);
            }
        };
        *self.recv_thread.lock().expect("thread slot poisoned") = Some(handle);

        let mut banner = self.inner.config.system_identity.clone().into_bytes();
        banner.push(0);
        let cnxn = Message::new(Command::Cnxn, ADB_VERSION, CONNECT_MAX_PAYLOAD, banner);
        if let Err(err) = self.inner.send(&cnxn) {
            self.inner.fail(&err);
            return Err(err);
        }

        let timeout = self.inner.config.connect_timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        loop {
            match state.phase {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(ConnError::ConnectionClosed),
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                drop(state);
                let err = ConnError::Timeout(timeout);
                self.inner.fail(&err);
                return Err(err);
            }
            state = self
                .inner
                .state_cv
                .wait_timeout(state, deadline - now)
                .expect("state lock poisoned")
                .0;
        }
    }

    /// Open a service stream, e.g. `"shell:"` or `"shell:ls /sdcard"`.
    ///
    /// Blocks until the peer acknowledges with OKAY (stream usable) or
    /// refuses with CLSE.
    pub fn open(&self, service: &str) -> Result<Stream> {
        if self.inner.phase() != ConnectionState::Connected {
            return Err(ConnError::NotConnected);
        }

        let local_id = self.inner.next_local_id.fetch_add(1, Ordering::Relaxed);
        let stream = StreamInner::new(local_id, service.to_string());
        self.inner
            .streams
            .lock()
            .expect("stream table poisoned")
            .insert(local_id, Arc::clone(&stream));

        let mut destination = service.as_bytes().to_vec();
        destination.push(0);
        let open = Message::new(Command::Open, local_id, 0, destination);

        let result = self
            .inner
            .send(&open)
            .and_then(|()| await_open(&stream, service, self.inner.config.open_timeout));

        match result {
            Ok(()) => {
                debug!(local_id, service, remote_id = stream.remote_id(), "stream open");
                Ok(Stream::from_parts(stream, Arc::clone(&self.inner)))
            }
            Err(err) => {
                self.inner
                    .streams
                    .lock()
                    .expect("stream table poisoned")
                    .remove(&local_id);
                Err(err)
            }
        }
    }

    /// Close the connection: best-effort CLSE for every open stream, release
    /// the channel, stop the receive loop. Irreversible, and a no-op when
    /// already closed.
    pub fn close(&self) {
        let was_closed = {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            let was_closed = state.phase == ConnectionState::Closed;
            state.phase = ConnectionState::Closed;
            self.inner.state_cv.notify_all();
            was_closed
        };

        if !was_closed {
            let streams: Vec<_> = {
                let mut streams = self.inner.streams.lock().expect("stream table poisoned");
                streams.drain().map(|(_, stream)| stream).collect()
            };
            for stream in streams {
                let clse = Message::new(
                    Command::Clse,
                    stream.local_id,
                    stream.remote_id(),
                    Bytes::new(),
                );
                let _ = self.inner.send(&clse);
                stream.on_close(false);
            }
            info!("connection closed");
            self.inner.channel.close();
        }

        // Reap the receive loop; closing the channel unblocks its read.
        let handle = self.recv_thread.lock().expect("thread slot poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(inner: Arc<ConnectionInner>) {
    let mut reader = MessageReader::new(Arc::clone(&inner.channel));
    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(err) => {
                inner.fail(&ConnError::Wire(err));
                return;
            }
        };
        if let Err(err) = inner.handle_message(message) {
            inner.fail(&err);
            return;
        }
    }
}

fn await_open(stream: &StreamInner, service: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut state = stream.state.lock().expect("stream state poisoned");
    loop {
        match state.phase {
            Phase::Open => return Ok(()),
            Phase::Closed if state.failed => return Err(ConnError::ConnectionClosed),
            Phase::Closed => {
                return Err(ConnError::OpenRejected {
                    service: service.to_string(),
                })
            }
            _ => {}
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ConnError::Timeout(timeout));
        }
        state = stream
            .cv
            .wait_timeout(state, deadline - now)
            .expect("stream state poisoned")
            .0;
    }
}

fn banner_text(payload: &[u8]) -> String {
    let trimmed = match payload.iter().position(|&b| b == 0) {
        Some(nul) => &payload[..nul],
        None => payload,
    };
    String::from_utf8_lossy(trimmed).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_text_stops_at_nul() {
        assert_eq!(banner_text(b"device::\0junk"), "device::");
        assert_eq!(banner_text(b"device::props"), "device::props");
        assert_eq!(banner_text(b""), "");
    }
}
