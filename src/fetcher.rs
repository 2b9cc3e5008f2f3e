use std::io::{Read, Write};
use std::vec;

use log::debug;

use crate::cancel::Cancellation;
use crate::client::Session;
use crate::error::{ProtocolError, Result};
use crate::types::{MailboxMeta, MessageHeader, MessageRecord, MessageRef};

/// Pulls the messages of the selected mailbox one at a time, in UID order.
///
/// Creating the fetcher lists the mailbox's UIDs; each call to `next` then retrieves one
/// complete message into memory, while [`next_into`](Self::next_into) streams it instead.
/// A message that cannot be retrieved is yielded as an `Err` and iteration moves on to the
/// next one. After a fatal error the iterator yields that error once and
/// then ends. A fetcher cannot be restarted: select the mailbox again to retry.
pub struct MessageFetcher<'s, T: Read + Write> {
    session: &'s mut Session<T>,
    pending: vec::IntoIter<MessageRef>,
    total: usize,
    cancellation: Cancellation,
    done: bool,
}

impl<'s, T: Read + Write> MessageFetcher<'s, T> {
    /// List the messages of `mailbox`, which must be the one currently selected.
    pub fn new(session: &'s mut Session<T>, mailbox: &MailboxMeta) -> Result<Self> {
        if session.selected().map(|m| m.name.as_str()) != Some(mailbox.name.as_str()) {
            return Err(ProtocolError::InvalidState("without that mailbox selected").into());
        }
        let refs = session.fetch_identifiers()?;
        debug!("{} lists {} messages", mailbox.name, refs.len());
        Ok(MessageFetcher {
            session,
            total: refs.len(),
            pending: refs.into_iter(),
            cancellation: Cancellation::default(),
            done: false,
        })
    }

    /// Stop before the next message once `cancellation` is triggered.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// How many messages the mailbox listed.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Retrieve the next message, handing its content to `sink` as it arrives rather than
    /// collecting it. See [`Session::stream_message`] for what `sink` is given.
    pub fn next_into<F>(&mut self, sink: F) -> Option<Result<MessageHeader>>
    where
        F: FnMut(&MessageHeader, &mut dyn Read) -> Result<()>,
    {
        self.advance(|session, reference| session.stream_message(reference, sink))
    }

    fn advance<R, F>(&mut self, fetch: F) -> Option<Result<R>>
    where
        F: FnOnce(&mut Session<T>, &MessageRef) -> Result<R>,
    {
        if self.done || self.pending.as_slice().is_empty() {
            return None;
        }
        if let Err(e) = self.cancellation.check() {
            self.done = true;
            return Some(Err(e));
        }

        let reference = self.pending.next()?;
        debug!("fetching {} uid {}", reference.mailbox, reference.uid);
        let result = fetch(&mut *self.session, &reference);
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.done = true;
            }
        }
        Some(result)
    }

    /// How many messages have not been pulled yet.
    pub fn remaining(&self) -> usize {
        if self.done {
            0
        } else {
            self.pending.len()
        }
    }
}

impl<T: Read + Write> Iterator for MessageFetcher<'_, T> {
    type Item = Result<MessageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance(|session, reference| session.fetch_message(reference))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
