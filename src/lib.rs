//! Back up every mailbox of an IMAP account into a single `tar.zst` archive.
//!
//! # Usage
//!
//! A backup connects to the server, logs in, walks the mailbox hierarchy and streams every
//! message into the archive as `<mailbox path>/<uid>.eml`. Mailboxes are opened read-only
//! with `EXAMINE`, so nothing on the server changes.
//!
//! ```no_run
//! use imap_backup::progress::LogReporter;
//! use imap_backup::{Backup, BackupOptions, ConnectionConfig, Credentials, SecurityMode};
//!
//! fn main() -> Result<(), imap_backup::Error> {
//!     let config = ConnectionConfig::new("imap.example.com", 143).security(SecurityMode::StartTls);
//!     let backup = Backup::new(config, BackupOptions::default());
//!
//!     let credentials = Credentials::new("me@example.com", "hunter2");
//!     let summary = backup.run(credentials, "mail.tar.zst", &mut LogReporter)?;
//!
//!     println!("{}", summary);
//!     if !summary.is_complete() {
//!         print!("{}", summary.describe_missing());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The pieces are usable on their own as well: [`ClientBuilder`] opens a [`Client`], which
//! logs in to become a [`Session`]; a [`MessageFetcher`] pulls the messages of a selected
//! mailbox and an [`ArchiveWriter`] streams entries into the archive.

mod parse;
mod types;

pub mod archive;
pub mod authenticator;
pub mod backup;
pub mod cancel;
pub mod client;
mod client_builder;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod fetcher;
pub mod progress;
pub mod transport;

pub use crate::archive::{ArchiveEntry, ArchiveOptions, ArchiveWriter};
pub use crate::backup::{Backup, Summary};
pub use crate::cancel::Cancellation;
pub use crate::client::{Client, Session, SessionState};
pub use crate::client_builder::ClientBuilder;
pub use crate::config::{
    AuthMechanism, BackupOptions, ConnectionConfig, Credentials, MailboxFailurePolicy,
    MessageFailurePolicy, SecurityMode, TrustPolicy,
};
pub use crate::enumerate::{enumerate, MailboxTree};
pub use crate::error::{Error, Result};
pub use crate::fetcher::MessageFetcher;
pub use crate::progress::{Event, LogReporter, Reporter};
pub use crate::types::*;

#[cfg(test)]
mod mock_stream;
