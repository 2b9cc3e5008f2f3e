use chrono::{DateTime, FixedOffset};

use super::{Flag, Uid};

/// A message known to exist in a mailbox, before its content has been fetched.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MessageRef {
    /// The mailbox holding the message.
    pub mailbox: String,

    /// The server-assigned identifier of the message.
    pub uid: Uid,

    /// The `RFC822.SIZE` reported by the server, if any.
    pub size: Option<u32>,
}

/// What is known about a message when its content starts to arrive.
///
/// Attributes the server sends after the content are missing from the header handed to a
/// streaming sink, and filled in on the one returned once the response is complete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    /// Which message this is.
    pub reference: MessageRef,

    /// Flags set on the message when it was fetched.
    pub flags: Vec<Flag<'static>>,

    /// The server's `INTERNALDATE`, usually the time of delivery.
    pub internal_date: Option<DateTime<FixedOffset>>,

    /// Exact size of the raw content in bytes.
    pub len: u64,
}

impl MessageHeader {
    /// The message UID.
    pub fn uid(&self) -> Uid {
        self.reference.uid
    }
}

/// A retrieved message: its full raw content plus the metadata the server keeps about it.
///
/// [`MessageFetcher`](crate::MessageFetcher) yields records when used as an iterator; a
/// backup streams content straight into the archive with
/// [`MessageFetcher::next_into`](crate::MessageFetcher::next_into) instead.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageRecord {
    /// Which message this is.
    pub reference: MessageRef,

    /// Flags set on the message when it was fetched.
    pub flags: Vec<Flag<'static>>,

    /// The server's `INTERNALDATE`, usually the time of delivery.
    pub internal_date: Option<DateTime<FixedOffset>>,

    /// The complete message, headers and body, exactly as stored on the server.
    pub content: Vec<u8>,
}

impl MessageRecord {
    /// Attach `content` to the header it was fetched with.
    pub fn new(header: MessageHeader, content: Vec<u8>) -> Self {
        MessageRecord {
            reference: header.reference,
            flags: header.flags,
            internal_date: header.internal_date,
            content,
        }
    }

    /// The message UID.
    pub fn uid(&self) -> Uid {
        self.reference.uid
    }

    /// The size of the raw content in bytes.
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    /// Whether the message has no content at all.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
