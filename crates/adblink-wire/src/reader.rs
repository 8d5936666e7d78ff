use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use adblink_channel::Channel;

use crate::codec::{decode_header, Message, HEADER_SIZE, MAX_PAYLOAD};
use crate::error::Result;

/// Reads complete messages from a channel.
///
/// One header `readx`, a header decode, one payload `readx`, a checksum
/// validation — callers always get whole, validated messages. Intended to be
/// driven by exactly one thread (the connection's receive loop).
pub struct MessageReader<C: ?Sized> {
    channel: Arc<C>,
    header_buf: [u8; HEADER_SIZE],
    max_payload: usize,
}

impl<C: Channel + ?Sized> MessageReader<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self {
            channel,
            header_buf: [0u8; HEADER_SIZE],
            max_payload: MAX_PAYLOAD,
        }
    }

    /// Read the next complete message (blocking).
    pub fn read_message(&mut self) -> Result<Message> {
        self.channel.readx(&mut self.header_buf)?;
        let header = decode_header(&self.header_buf)?;
        if header.data_length as usize > self.max_payload {
            return Err(crate::error::WireError::PayloadTooLarge {
                size: header.data_length as usize,
                max: self.max_payload,
            });
        }

        let payload = if header.data_length == 0 {
            Bytes::new()
        } else {
            let mut buf = vec![0u8; header.data_length as usize];
            self.channel.readx(&mut buf)?;
            Bytes::from(buf)
        };

        let message = Message::decode(header, payload)?;
        trace!(command = %message.command, arg0 = message.arg0, arg1 = message.arg1,
               len = message.payload.len(), "received message");
        Ok(message)
    }

    /// Largest payload this reader will accept.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}
