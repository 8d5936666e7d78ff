use bytes::{BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::{Result, WireError};

/// Header size on the wire: six little-endian u32 fields.
pub const HEADER_SIZE: usize = 24;

/// Protocol version sent in CNXN `arg0`.
pub const ADB_VERSION: u32 = 0x0100_0000;

/// Largest payload we accept on decode.
pub const MAX_PAYLOAD: usize = 256 * 1024;

/// Maximum payload size advertised to the peer in CNXN `arg1`.
///
/// The v1 protocol value; the peer's own advertisement caps what we send.
pub const CONNECT_MAX_PAYLOAD: u32 = 4096;

/// The ADB payload checksum: the wrapping sum of all payload bytes.
///
/// The wire field is named `data_crc32` but protocol v1 has always carried
/// this sum, not an ISO CRC.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// A decoded message header, before the payload has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_crc32: u32,
}

/// Decode and validate a 24-byte header.
///
/// Fails with [`WireError::CorruptHeader`] on a short buffer, an unknown
/// command word, or a magic that is not the command's complement, and with
/// [`WireError::PayloadTooLarge`] when the announced payload exceeds
/// [`MAX_PAYLOAD`].
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(WireError::CorruptHeader);
    }

    let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());

    let raw_command = word(0);
    let command = Command::from_u32(raw_command).ok_or(WireError::CorruptHeader)?;
    let magic = word(5);
    if magic != command.magic() {
        return Err(WireError::CorruptHeader);
    }

    let data_length = word(3);
    if data_length as usize > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge {
            size: data_length as usize,
            max: MAX_PAYLOAD,
        });
    }

    Ok(Header {
        command,
        arg0: word(1),
        arg1: word(2),
        data_length,
        data_crc32: word(4),
    })
}

/// One ADB protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// Serialize the header for this message.
    ///
    /// Fails only when the payload exceeds [`MAX_PAYLOAD`].
    pub fn encode_header(&self) -> Result<[u8; HEADER_SIZE]> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&(self.command as u32).to_le_bytes());
        header[4..8].copy_from_slice(&self.arg0.to_le_bytes());
        header[8..12].copy_from_slice(&self.arg1.to_le_bytes());
        header[12..16].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        header[16..20].copy_from_slice(&checksum(&self.payload).to_le_bytes());
        header[20..24].copy_from_slice(&self.command.magic().to_le_bytes());
        Ok(header)
    }

    /// Serialize header and payload into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let header = self.encode_header()?;
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_slice(&header);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Assemble a message from a decoded header and its payload bytes.
    ///
    /// Validates the header's length and checksum against the payload; fails
    /// with [`WireError::ChecksumMismatch`] when they disagree. Pure: all I/O
    /// belongs to the caller.
    pub fn decode(header: Header, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() != header.data_length as usize {
            return Err(WireError::ChecksumMismatch);
        }
        if checksum(&payload) != header.data_crc32 {
            return Err(WireError::ChecksumMismatch);
        }
        Ok(Self {
            command: header.command,
            arg0: header.arg0,
            arg1: header.arg1,
            payload,
        })
    }
}
