//! In-process test plumbing: a paired in-memory channel and a scripted
//! device end that speaks raw wire messages.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use bytes::Bytes;

use adblink_auth::AdbKeyPair;
use adblink_channel::{Channel, ChannelError, Result as ChannelResult};
use adblink_wire::{decode_header, Command, Message, HEADER_SIZE};

struct PipeBuf {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of an in-memory duplex link.
struct Pipe {
    buf: Mutex<PipeBuf>,
    cv: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(PipeBuf {
                data: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        })
    }

    fn push(&self, bytes: &[u8]) -> ChannelResult<()> {
        let mut buf = self.buf.lock().unwrap();
        if buf.closed {
            return Err(ChannelError::Closed);
        }
        buf.data.extend(bytes);
        self.cv.notify_all();
        Ok(())
    }

    fn read_exact(&self, out: &mut [u8]) -> ChannelResult<()> {
        let mut buf = self.buf.lock().unwrap();
        loop {
            if buf.data.len() >= out.len() {
                for slot in out.iter_mut() {
                    *slot = buf.data.pop_front().unwrap();
                }
                return Ok(());
            }
            if buf.closed {
                return Err(ChannelError::Closed);
            }
            buf = self.cv.wait(buf).unwrap();
        }
    }

    fn close(&self) {
        let mut buf = self.buf.lock().unwrap();
        buf.closed = true;
        self.cv.notify_all();
    }

    fn pending(&self) -> usize {
        self.buf.lock().unwrap().data.len()
    }
}

/// One end of an in-memory channel pair.
pub struct PipeChannel {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

impl Channel for PipeChannel {
    fn readx(&self, buf: &mut [u8]) -> ChannelResult<()> {
        self.incoming.read_exact(buf)
    }

    fn writex(&self, buf: &[u8]) -> ChannelResult<()> {
        self.outgoing.push(buf)
    }

    fn close(&self) {
        self.incoming.close();
        self.outgoing.close();
    }
}

/// Two channels wired back to back.
pub fn pipe_pair() -> (PipeChannel, PipeChannel) {
    let a_to_b = Pipe::new();
    let b_to_a = Pipe::new();
    (
        PipeChannel {
            incoming: Arc::clone(&b_to_a),
            outgoing: Arc::clone(&a_to_b),
        },
        PipeChannel {
            incoming: a_to_b,
            outgoing: b_to_a,
        },
    )
}

/// The device half of a conversation, driven step by step from a test
/// script thread.
pub struct FakeDevice {
    channel: PipeChannel,
}

impl FakeDevice {
    pub fn new(channel: PipeChannel) -> Self {
        Self { channel }
    }

    /// Read the next message; `None` once the host hangs up.
    pub fn recv(&self) -> Option<Message> {
        let mut header = [0u8; HEADER_SIZE];
        self.channel.readx(&mut header).ok()?;
        let header = decode_header(&header).expect("host sent corrupt header");
        let mut payload = vec![0u8; header.data_length as usize];
        if !payload.is_empty() {
            self.channel.readx(&mut payload).ok()?;
        }
        Some(Message::decode(header, payload).expect("host sent corrupt payload"))
    }

    /// Read the next message and require its command.
    pub fn expect(&self, command: Command) -> Message {
        let message = self.recv().expect("host hung up mid-script");
        assert_eq!(message.command, command, "unexpected {}", message.command);
        message
    }

    pub fn send(&self, message: Message) {
        let header = message.encode_header().expect("test message too large");
        self.channel.writex(&header).expect("device send failed");
        if !message.payload.is_empty() {
            self.channel
                .writex(&message.payload)
                .expect("device send failed");
        }
    }

    /// Bytes the host has written that this end has not read yet.
    pub fn unread_from_host(&self) -> usize {
        self.channel.incoming.pending()
    }

    /// Hang up abruptly.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Answer the host's CNXN without demanding auth.
    pub fn accept_connection(&self, max_payload: u32) {
        let cnxn = self.expect(Command::Cnxn);
        assert!(cnxn.payload.starts_with(b"host::"));
        self.send(Message::new(
            Command::Cnxn,
            cnxn.arg0,
            max_payload,
            &b"device::testbench\0"[..],
        ));
    }

    /// Answer OPEN with OKAY, assigning `remote_id`. Returns the host's
    /// local id.
    pub fn accept_open(&self, expected_service: &[u8], remote_id: u32) -> u32 {
        let open = self.expect(Command::Open);
        assert_eq!(open.payload.as_ref(), expected_service);
        let local_id = open.arg0;
        self.send(Message::new(Command::Okay, remote_id, local_id, Bytes::new()));
        local_id
    }
}

/// Key generation is expensive; every test shares one pair.
pub fn test_keypair() -> AdbKeyPair {
    static KEY: OnceLock<AdbKeyPair> = OnceLock::new();
    KEY.get_or_init(|| AdbKeyPair::generate().expect("key generation"))
        .clone()
}
