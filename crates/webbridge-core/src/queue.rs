//! Outgoing queue and startup buffer.

use crate::message::{encode_batch, Message};
use crate::types::BridgeError;

/// Ordered buffer of messages waiting for the peer's next fetch.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    messages: Vec<Message>,
}

impl OutgoingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the tail.
    pub fn enqueue(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Serialize the whole queue as one batch and leave it empty.
    ///
    /// An empty queue yields `[]`. If serialization fails the queue is still
    /// cleared; a batch is never delivered partially.
    pub fn fetch_and_drain(&mut self) -> Result<String, BridgeError> {
        let messages = std::mem::take(&mut self.messages);
        encode_batch(&messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Holds inbound messages that arrive before the side is initialized.
///
/// Once retired it stays retired; there is no way back to buffering.
#[derive(Debug)]
pub enum StartupBuffer {
    /// Initialization has not completed yet.
    Buffering(Vec<Message>),
    /// The buffer was replayed and discarded.
    Retired,
}

impl Default for StartupBuffer {
    fn default() -> Self {
        StartupBuffer::Buffering(Vec::new())
    }
}

impl StartupBuffer {
    /// Buffer `message` if still buffering, otherwise hand it back.
    pub fn offer(&mut self, message: Message) -> Option<Message> {
        match self {
            StartupBuffer::Buffering(messages) => {
                messages.push(message);
                None
            }
            StartupBuffer::Retired => Some(message),
        }
    }

    /// Retire the buffer, returning its contents in arrival order.
    ///
    /// Returns `None` if it was already retired.
    pub fn retire(&mut self) -> Option<Vec<Message>> {
        match std::mem::replace(self, StartupBuffer::Retired) {
            StartupBuffer::Buffering(messages) => Some(messages),
            StartupBuffer::Retired => None,
        }
    }

    pub fn is_retired(&self) -> bool {
        matches!(self, StartupBuffer::Retired)
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        match self {
            StartupBuffer::Buffering(messages) => messages.len(),
            StartupBuffer::Retired => 0,
        }
    }
}
