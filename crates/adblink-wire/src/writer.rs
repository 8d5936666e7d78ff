use std::sync::Arc;

use tracing::trace;

use adblink_channel::Channel;

use crate::codec::Message;
use crate::error::Result;

/// Writes complete messages to a channel.
///
/// The header and the payload go out as two separate `writex` calls: the
/// transport expects the header in its own transfer.
pub struct MessageWriter<C: ?Sized> {
    channel: Arc<C>,
}

impl<C: Channel + ?Sized> MessageWriter<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self { channel }
    }

    /// Encode and transmit one message (blocking).
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let header = message.encode_header()?;
        self.channel.writex(&header)?;
        if !message.payload.is_empty() {
            self.channel.writex(&message.payload)?;
        }
        trace!(command = %message.command, arg0 = message.arg0, arg1 = message.arg1,
               len = message.payload.len(), "sent message");
        Ok(())
    }
}
