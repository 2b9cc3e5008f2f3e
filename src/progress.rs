//! Progress reporting.
//!
//! A [`Backup`](crate::Backup) tells a [`Reporter`] about everything it does. Closures,
//! channel senders and the logging [`LogReporter`] can all serve as one:
//!
//! ```
//! # use imap_backup::progress::{Event, Reporter};
//! let mut archived = 0;
//! let mut count = |event: Event| {
//!     if let Event::MessageArchived { .. } = event {
//!         archived += 1;
//!     }
//! };
//! count.report(Event::Cancelled);
//! ```

use std::sync::mpsc::{Sender, SyncSender};

use log::{debug, error, info, warn};

use crate::types::Uid;

/// Something that happened during a backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The server accepted the connection.
    Connected { host: String, port: u16 },
    /// A login attempt was rejected and is being retried.
    LoginRetry { attempt: u32, reason: String },
    /// Credentials were accepted.
    LoggedIn { username: String },
    /// The mailbox listing is known.
    MailboxesListed { total: usize, selectable: usize },
    /// A mailbox was opened.
    MailboxStarted { name: String, messages: u32 },
    /// One message went into the archive.
    MessageArchived { mailbox: String, uid: Uid, bytes: u64 },
    /// One message could not be retrieved.
    MessageSkipped { mailbox: String, uid: Uid, reason: String },
    /// Every message of the mailbox has been handled.
    MailboxFinished { name: String, archived: u64 },
    /// The mailbox could not be backed up.
    MailboxSkipped { name: String, reason: String },
    /// A directory entry was written for a mailbox without messages.
    DirectoryMarker { path: String },
    /// The run was cancelled.
    Cancelled,
    /// A fatal error stopped the run.
    Aborted { reason: String },
    /// The archive has been finalized.
    Finished { complete: bool },
}

/// Receives [`Event`]s while a backup runs.
pub trait Reporter {
    /// Handle one event. Called on the backup's thread, so keep it short.
    fn report(&mut self, event: Event);
}

impl<F: FnMut(Event)> Reporter for F {
    fn report(&mut self, event: Event) {
        self(event)
    }
}

// a receiver that went away just stops listening
impl Reporter for Sender<Event> {
    fn report(&mut self, event: Event) {
        let _ = self.send(event);
    }
}

impl Reporter for SyncSender<Event> {
    fn report(&mut self, event: Event) {
        let _ = self.send(event);
    }
}

/// Reports progress through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, event: Event) {
        match event {
            Event::Connected { host, port } => info!("connected to {}:{}", host, port),
            Event::LoginRetry { attempt, reason } => {
                warn!("login rejected ({}), retry {}", reason, attempt)
            }
            Event::LoggedIn { username } => info!("logged in as {}", username),
            Event::MailboxesListed { total, selectable } => {
                info!("found {} mailboxes ({} selectable)", total, selectable)
            }
            Event::MailboxStarted { name, messages } => {
                info!("backing up {} ({} messages)", name, messages)
            }
            Event::MessageArchived {
                mailbox,
                uid,
                bytes,
            } => debug!("archived {} uid {} ({} bytes)", mailbox, uid, bytes),
            Event::MessageSkipped {
                mailbox,
                uid,
                reason,
            } => warn!("skipped {} uid {}: {}", mailbox, uid, reason),
            Event::MailboxFinished { name, archived } => {
                info!("finished {} ({} messages)", name, archived)
            }
            Event::MailboxSkipped { name, reason } => warn!("skipped mailbox {}: {}", name, reason),
            Event::DirectoryMarker { path } => debug!("directory marker for {}", path),
            Event::Cancelled => warn!("backup cancelled"),
            Event::Aborted { reason } => error!("backup aborted: {}", reason),
            Event::Finished { complete: true } => info!("backup complete"),
            Event::Finished { complete: false } => warn!("backup incomplete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn drive<R: Reporter + ?Sized>(reporter: &mut R) {
        reporter.report(Event::Connected {
            host: "localhost".into(),
            port: 143,
        });
        reporter.report(Event::Finished { complete: true });
    }

    #[test]
    fn closures_report() {
        let mut seen = Vec::new();
        drive(&mut |event: Event| seen.push(event));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], Event::Finished { complete: true });
    }

    #[test]
    fn senders_report_and_tolerate_hangups() {
        let (mut tx, rx) = channel();
        drive(&mut tx);
        assert_eq!(rx.iter().take(2).count(), 2);
        drop(rx);
        drive(&mut tx);
    }

    #[test]
    fn log_reporter_accepts_everything() {
        drive(&mut LogReporter);
        LogReporter.report(Event::Aborted {
            reason: "boom".into(),
        });
    }
}
