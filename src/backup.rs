//! Driving a complete backup run.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::archive::{ArchiveEntry, ArchiveWriter};
use crate::cancel::Cancellation;
use crate::client::{Client, Session, SessionState};
use crate::client_builder::ClientBuilder;
use crate::config::{
    BackupOptions, ConnectionConfig, Credentials, MailboxFailurePolicy, MessageFailurePolicy,
};
use crate::enumerate::{enumerate, MailboxNode, MailboxTree};
use crate::error::{AuthError, Error, MailboxError, Result};
use crate::fetcher::MessageFetcher;
use crate::progress::{Event, Reporter};
use crate::types::Uid;

/// Name of the entry appended to archives that are missing something.
pub const INCOMPLETE_NOTE: &str = "BACKUP-INCOMPLETE.txt";

/// A mailbox that was not (fully) backed up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedMailbox {
    /// The server name of the mailbox.
    pub name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// A message that was not backed up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedMessage {
    /// The mailbox holding the message.
    pub mailbox: String,
    /// The message UID.
    pub uid: Uid,
    /// Why it was skipped.
    pub reason: String,
}

/// What a backup run did.
#[derive(Debug, Default)]
pub struct Summary {
    /// Selectable mailboxes in the listing.
    pub mailboxes_seen: usize,
    /// Mailboxes whose messages were all handled.
    pub mailboxes_archived: usize,
    /// Mailboxes that were skipped or abandoned.
    pub mailboxes_skipped: Vec<SkippedMailbox>,
    /// Messages written to the archive.
    pub messages_archived: u64,
    /// Messages that could not be retrieved.
    pub messages_skipped: Vec<SkippedMessage>,
    /// Message bytes written to the archive.
    pub bytes_archived: u64,
    /// Directory entries written for containers and empty mailboxes.
    pub directory_markers: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// The error that stopped the run early, if any.
    pub error: Option<Error>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl Summary {
    /// Whether everything on the server made it into the archive.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.error.is_none()
            && self.mailboxes_skipped.is_empty()
            && self.messages_skipped.is_empty()
    }

    /// A human-readable account of what is missing from the archive.
    pub fn describe_missing(&self) -> String {
        let mut text = String::from("This backup is incomplete.\n");
        if self.cancelled {
            text.push_str("\nThe backup was cancelled before every mailbox was archived.\n");
        }
        if let Some(ref e) = self.error {
            text.push_str(&format!(
                "\nThe backup stopped early: {}\nMailboxes after that point are missing.\n",
                e
            ));
        }
        if !self.mailboxes_skipped.is_empty() {
            text.push_str("\nSkipped mailboxes:\n");
            for mailbox in &self.mailboxes_skipped {
                text.push_str(&format!("  {}: {}\n", mailbox.name, mailbox.reason));
            }
        }
        if !self.messages_skipped.is_empty() {
            text.push_str("\nSkipped messages:\n");
            for message in &self.messages_skipped {
                text.push_str(&format!(
                    "  {} uid {}: {}\n",
                    message.mailbox, message.uid, message.reason
                ));
            }
        }
        text
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} mailboxes, {} messages ({} bytes) archived",
            self.mailboxes_archived,
            self.mailboxes_seen,
            self.messages_archived,
            self.bytes_archived
        )?;
        if !self.mailboxes_skipped.is_empty() {
            write!(f, ", {} mailboxes skipped", self.mailboxes_skipped.len())?;
        }
        if !self.messages_skipped.is_empty() {
            write!(f, ", {} messages skipped", self.messages_skipped.len())?;
        }
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        if let Some(ref e) = self.error {
            write!(f, ", aborted: {}", e)?;
        }
        Ok(())
    }
}

/// One backup of one account.
///
/// ```no_run
/// # use imap_backup::{Backup, BackupOptions, ConnectionConfig, Credentials};
/// # use imap_backup::progress::LogReporter;
/// # fn main() -> Result<(), imap_backup::Error> {
/// let config = ConnectionConfig::new("imap.example.com", 993);
/// let backup = Backup::new(config, BackupOptions::default());
/// let credentials = Credentials::new("me@example.com", "secret");
/// let summary = backup.run(credentials, "mail.tar.zst", &mut LogReporter)?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Backup {
    config: ConnectionConfig,
    options: BackupOptions,
    cancellation: Cancellation,
}

impl Backup {
    /// Prepare a backup of the account at `config`.
    pub fn new(config: ConnectionConfig, options: BackupOptions) -> Self {
        Backup {
            config,
            options,
            cancellation: Cancellation::new(),
        }
    }

    /// A handle that stops this backup from another thread.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Connect, log in and archive every mailbox into `output`.
    ///
    /// Failing to connect or log in is returned as an error before `output` is created.
    /// Once the archive exists, errors are recorded in the [`Summary`] and the archive is
    /// finalized with whatever was written; only a failure to finalize it is returned as an
    /// error.
    pub fn run<P, R>(
        &self,
        credentials: Credentials,
        output: P,
        reporter: &mut R,
    ) -> Result<Summary>
    where
        P: AsRef<Path>,
        R: Reporter + ?Sized,
    {
        let started = Instant::now();
        self.cancellation.check()?;

        let client = ClientBuilder::new(&self.config)
            .block_size(self.options.archive.block_size)
            .cancellation(self.cancellation.clone())
            .connect()?;
        reporter.report(Event::Connected {
            host: self.config.host().to_string(),
            port: self.config.port(),
        });

        let session = login(client, credentials, &self.options, reporter)?;
        let archive = ArchiveWriter::create(output, &self.options.archive)?;

        let mut summary = self.archive_session(session, archive, reporter)?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Archive every mailbox visible to `session` into `archive`, then log out and finalize
    /// the archive.
    pub fn archive_session<T, R>(
        &self,
        mut session: Session<T>,
        mut archive: ArchiveWriter,
        reporter: &mut R,
    ) -> Result<Summary>
    where
        T: Read + Write,
        R: Reporter + ?Sized,
    {
        let started = Instant::now();
        let mut summary = Summary::default();

        match self.archive_mailboxes(&mut session, &mut archive, &mut summary, reporter) {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                summary.cancelled = true;
                reporter.report(Event::Cancelled);
            }
            Err(e) => {
                error!("backup aborted: {}", e);
                reporter.report(Event::Aborted {
                    reason: e.to_string(),
                });
                summary.error = Some(e);
            }
        }

        if matches!(
            session.state(),
            SessionState::Authenticated | SessionState::Selected
        ) {
            if let Err(e) = session.logout() {
                warn!("logout failed: {}", e);
            }
        }

        summary.bytes_archived = archive.bytes();
        if !summary.is_complete() && self.options.mark_incomplete {
            if let Err(e) = archive.append_note(INCOMPLETE_NOTE, &summary.describe_missing()) {
                warn!("could not record what is missing: {}", e);
            }
        }
        archive.finish()?;

        summary.elapsed = started.elapsed();
        reporter.report(Event::Finished {
            complete: summary.is_complete(),
        });
        Ok(summary)
    }

    fn archive_mailboxes<T, R>(
        &self,
        session: &mut Session<T>,
        archive: &mut ArchiveWriter,
        summary: &mut Summary,
        reporter: &mut R,
    ) -> Result<()>
    where
        T: Read + Write,
        R: Reporter + ?Sized,
    {
        let names = session.list()?;
        let tree = MailboxTree::from_names(&names);
        let nodes = enumerate(&tree);
        summary.mailboxes_seen = nodes.iter().filter(|n| n.is_selectable()).count();
        reporter.report(Event::MailboxesListed {
            total: nodes.len(),
            selectable: summary.mailboxes_seen,
        });

        for node in nodes {
            self.cancellation.check()?;
            let path = node.archive_path();

            if !node.is_selectable() {
                if node.is_listed() {
                    debug!("{} is listed as \\Noselect", node.name());
                } else {
                    debug!("{} only exists as the parent of other mailboxes", node.name());
                }
                mark_directory(archive, &path, summary, reporter)?;
                continue;
            }

            match self.archive_mailbox(session, archive, node, &path, summary, reporter) {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    warn!("skipping mailbox {}: {}", node.name(), e);
                    summary.mailboxes_skipped.push(SkippedMailbox {
                        name: node.name().to_string(),
                        reason: e.to_string(),
                    });
                    reporter.report(Event::MailboxSkipped {
                        name: node.name().to_string(),
                        reason: e.to_string(),
                    });
                    if self.options.on_mailbox_error == MailboxFailurePolicy::Abort {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn archive_mailbox<T, R>(
        &self,
        session: &mut Session<T>,
        archive: &mut ArchiveWriter,
        node: &MailboxNode,
        path: &str,
        summary: &mut Summary,
        reporter: &mut R,
    ) -> Result<()>
    where
        T: Read + Write,
        R: Reporter + ?Sized,
    {
        let mailbox = session.select(node.name())?;
        reporter.report(Event::MailboxStarted {
            name: mailbox.name.clone(),
            messages: mailbox.exists,
        });

        let mut fetcher = MessageFetcher::new(session, &mailbox)?
            .with_cancellation(self.cancellation.clone());
        let mut archived = 0;
        let mut interrupted = None;
        // content goes from the socket to the archive one block at a time
        while let Some(result) = fetcher.next_into(|header, content| {
            let entry = ArchiveEntry::message(path, header);
            let appended = archive.append_entry(&entry, content);
            if appended.is_err() {
                interrupted = Some((header.uid(), entry.path));
            }
            appended
        }) {
            match result {
                Ok(header) => {
                    debug!("{}: uid {} archived ({} bytes)", path, header.uid(), header.len);
                    archived += 1;
                    summary.messages_archived += 1;
                    reporter.report(Event::MessageArchived {
                        mailbox: mailbox.name.clone(),
                        uid: header.uid(),
                        bytes: header.len,
                    });
                }
                Err(Error::Fetch(e)) => {
                    warn!("skipping message: {}", e);
                    summary.messages_skipped.push(SkippedMessage {
                        mailbox: mailbox.name.clone(),
                        uid: e.uid(),
                        reason: e.to_string(),
                    });
                    reporter.report(Event::MessageSkipped {
                        mailbox: mailbox.name.clone(),
                        uid: e.uid(),
                        reason: e.to_string(),
                    });
                    if self.options.on_message_error == MessageFailurePolicy::SkipMailbox {
                        return Err(MailboxError::Abandoned(mailbox.name.clone()).into());
                    }
                }
                Err(e) => {
                    // the entry is already in the archive, padded to its announced length
                    if let Some((uid, entry)) = interrupted.take() {
                        summary.messages_skipped.push(SkippedMessage {
                            mailbox: mailbox.name.clone(),
                            uid,
                            reason: format!("{} is incomplete: {}", entry, e),
                        });
                    }
                    return Err(e);
                }
            }
        }

        if archived == 0 {
            mark_directory(archive, path, summary, reporter)?;
        }
        summary.mailboxes_archived += 1;
        info!("{}: {} messages archived", mailbox.name, archived);
        reporter.report(Event::MailboxFinished {
            name: mailbox.name,
            archived,
        });
        Ok(())
    }
}

fn mark_directory<R: Reporter + ?Sized>(
    archive: &mut ArchiveWriter,
    path: &str,
    summary: &mut Summary,
    reporter: &mut R,
) -> Result<()> {
    archive.append_directory(path)?;
    summary.directory_markers += 1;
    reporter.report(Event::DirectoryMarker {
        path: path.to_string(),
    });
    Ok(())
}

/// Log in, retrying a rejected attempt up to `options.login_retries` times.
///
/// The credentials are dropped as soon as this returns.
pub(crate) fn login<T, R>(
    mut client: Client<T>,
    credentials: Credentials,
    options: &BackupOptions,
    reporter: &mut R,
) -> Result<Session<T>>
where
    T: Read + Write,
    R: Reporter + ?Sized,
{
    let mut attempt = 0;
    loop {
        match client.login(&credentials, options.auth) {
            Ok(session) => {
                reporter.report(Event::LoggedIn {
                    username: credentials.username().to_string(),
                });
                return Ok(session);
            }
            Err((Error::Auth(AuthError::Rejected(reason)), returned))
                if attempt < options.login_retries =>
            {
                attempt += 1;
                reporter.report(Event::LoginRetry { attempt, reason });
                client = returned;
            }
            Err((e, _)) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveOptions;
    use crate::config::AuthMechanism;
    use crate::error::{FetchError, ProtocolError};
    use crate::mock_stream::MockStream;
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const LOGIN: &str = "a1 OK Logged in\r\n";

    fn options() -> BackupOptions {
        BackupOptions {
            auth: AuthMechanism::Login,
            archive: ArchiveOptions {
                block_size: 8,
                queue_depth: 2,
                ..ArchiveOptions::default()
            },
            ..BackupOptions::default()
        }
    }

    fn run(script: &str, options: BackupOptions) -> (Summary, Vec<(String, Vec<u8>)>, String) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar.zst");
        let stream = MockStream::new(format!("{}{}", LOGIN, script).into_bytes());
        let session = Client::new(stream)
            .login(&Credentials::new("u", "p"), AuthMechanism::Login)
            .unwrap();
        let archive = ArchiveWriter::create(&path, &options.archive).unwrap();
        let backup = Backup::new(ConnectionConfig::new("localhost", 143), options);
        let mut events = Vec::new();
        let summary = backup
            .archive_session(session, archive, &mut |e: Event| events.push(e))
            .unwrap();
        assert_eq!(
            events.last(),
            Some(&Event::Finished {
                complete: summary.is_complete()
            })
        );
        let (entries, note) = read_back(&path);
        (summary, entries, note)
    }

    // entries other than the incomplete note, and the note's text
    fn read_back(path: &PathBuf) -> (Vec<(String, Vec<u8>)>, String) {
        let decoder = zstd::stream::read::Decoder::new(File::open(path).unwrap()).unwrap();
        let mut archive = tar::Archive::new(decoder);
        let mut entries = Vec::new();
        let mut note = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut name = entry.path().unwrap().to_string_lossy().into_owned();
            if entry.header().entry_type().is_dir() && !name.ends_with('/') {
                name.push('/');
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            if name == INCOMPLETE_NOTE {
                note = String::from_utf8(data).unwrap();
            } else {
                entries.push((name, data));
            }
        }
        (entries, note)
    }

    fn names(entries: &[(String, Vec<u8>)]) -> Vec<&str> {
        entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn message(seq: u32, uid: u32, body: &str) -> String {
        format!(
            "* {} FETCH (UID {} FLAGS (\\Seen) \
             INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" BODY[] {{{}}}\r\n{})\r\n",
            seq,
            uid,
            body.len(),
            body
        )
    }

    #[test]
    fn inbox_with_two_messages() {
        let script = format!(
            "* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n\
             a2 OK List completed\r\n\
             * 2 EXISTS\r\n\
             a3 OK [READ-ONLY] Examine completed\r\n\
             * 1 FETCH (UID 11 RFC822.SIZE 5)\r\n\
             * 2 FETCH (UID 12 RFC822.SIZE 16)\r\n\
             a4 OK Fetch completed\r\n\
             {}a5 OK Fetch completed\r\n\
             {}a6 OK Fetch completed\r\n\
             * BYE Logging out\r\n\
             a7 OK Logout completed\r\n",
            message(1, 11, "first"),
            message(2, 12, "the second one\r\n")
        );
        let (summary, entries, note) = run(&script, options());
        assert!(summary.is_complete(), "{}", summary);
        assert_eq!(names(&entries), vec!["INBOX/11.eml", "INBOX/12.eml"]);
        assert_eq!(entries[0].1, b"first".to_vec());
        assert_eq!(entries[1].1, b"the second one\r\n".to_vec());
        assert!(note.is_empty());
        assert_eq!(summary.mailboxes_seen, 1);
        assert_eq!(summary.mailboxes_archived, 1);
        assert_eq!(summary.messages_archived, 2);
        assert_eq!(summary.bytes_archived, 21);
        assert_eq!(summary.directory_markers, 0);
    }

    #[test]
    fn hierarchy_markers_and_empty_mailboxes() {
        let script = "* LIST (\\Noselect) \"/\" \"Archive\"\r\n\
                      * LIST () \"/\" \"Archive/2023\"\r\n\
                      * LIST () \"/\" \"INBOX\"\r\n\
                      a2 OK List completed\r\n\
                      * 0 EXISTS\r\n\
                      a3 OK Examine completed\r\n\
                      * 0 EXISTS\r\n\
                      a4 OK Examine completed\r\n\
                      a5 OK Logout completed\r\n";
        let (summary, entries, _) = run(script, options());
        assert!(summary.is_complete(), "{}", summary);
        assert_eq!(names(&entries), vec!["Archive/", "Archive/2023/", "INBOX/"]);
        assert_eq!(summary.mailboxes_seen, 2);
        assert_eq!(summary.directory_markers, 3);
    }

    #[test]
    fn expunged_message_is_skipped_and_run_continues() {
        let script = format!(
            "* LIST () \"/\" \"INBOX\"\r\n\
             * LIST () \"/\" \"Sent\"\r\n\
             a2 OK List completed\r\n\
             * 3 EXISTS\r\n\
             a3 OK Examine completed\r\n\
             * 1 FETCH (UID 1)\r\n\
             * 2 FETCH (UID 2)\r\n\
             * 3 FETCH (UID 3)\r\n\
             a4 OK Fetch completed\r\n\
             {}a5 OK Fetch completed\r\n\
             a6 OK Fetch completed\r\n\
             {}a7 OK Fetch completed\r\n\
             * 1 EXISTS\r\n\
             a8 OK Examine completed\r\n\
             * 1 FETCH (UID 9)\r\n\
             a9 OK Fetch completed\r\n\
             {}a10 OK Fetch completed\r\n\
             a11 OK Logout completed\r\n",
            message(1, 1, "one"),
            message(2, 3, "three"),
            message(1, 9, "sent")
        );
        let (summary, entries, note) = run(&script, options());
        assert_eq!(
            names(&entries),
            vec!["INBOX/1.eml", "INBOX/3.eml", "Sent/9.eml"]
        );
        assert!(!summary.is_complete());
        assert!(summary.error.is_none());
        assert_eq!(summary.mailboxes_archived, 2);
        assert_eq!(summary.messages_skipped.len(), 1);
        assert_eq!(summary.messages_skipped[0].uid, 2);
        assert!(note.contains("INBOX uid 2"), "{}", note);
    }

    #[test]
    fn skip_mailbox_policy_abandons_the_rest() {
        let script = format!(
            "* LIST () \"/\" \"INBOX\"\r\n\
             a2 OK List completed\r\n\
             * 3 EXISTS\r\n\
             a3 OK Examine completed\r\n\
             * 1 FETCH (UID 1)\r\n\
             * 2 FETCH (UID 2)\r\n\
             * 3 FETCH (UID 3)\r\n\
             a4 OK Fetch completed\r\n\
             {}a5 OK Fetch completed\r\n\
             a6 NO Message unavailable\r\n\
             a7 OK Logout completed\r\n",
            message(1, 1, "one")
        );
        let options = BackupOptions {
            on_message_error: MessageFailurePolicy::SkipMailbox,
            ..options()
        };
        let (summary, entries, note) = run(&script, options);
        assert_eq!(names(&entries), vec!["INBOX/1.eml"]);
        assert_eq!(summary.mailboxes_archived, 0);
        assert_eq!(summary.mailboxes_skipped.len(), 1);
        assert!(summary.messages_skipped[0]
            .reason
            .contains("Message unavailable"));
        assert!(note.contains("Skipped mailboxes"));
    }

    #[test]
    fn rejected_mailbox_is_skipped() {
        let script = "* LIST () \"/\" \"Broken\"\r\n\
                      * LIST () \"/\" \"INBOX\"\r\n\
                      a2 OK List completed\r\n\
                      a3 NO Permission denied\r\n\
                      * 0 EXISTS\r\n\
                      a4 OK Examine completed\r\n\
                      a5 OK Logout completed\r\n";
        let (summary, entries, _) = run(script, options());
        assert_eq!(names(&entries), vec!["INBOX/"]);
        assert_eq!(summary.mailboxes_skipped[0].name, "Broken");
        assert_eq!(summary.mailboxes_archived, 1);
        assert!(summary.error.is_none());
    }

    #[test]
    fn rejected_mailbox_aborts_when_asked() {
        let script = "* LIST () \"/\" \"Broken\"\r\n\
                      * LIST () \"/\" \"INBOX\"\r\n\
                      a2 OK List completed\r\n\
                      a3 NO Permission denied\r\n\
                      a4 OK Logout completed\r\n";
        let options = BackupOptions {
            on_mailbox_error: MailboxFailurePolicy::Abort,
            ..options()
        };
        let (summary, entries, note) = run(script, options);
        assert!(entries.is_empty());
        assert!(matches!(
            summary.error,
            Some(Error::Mailbox(MailboxError::Rejected { .. }))
        ));
        assert!(note.contains("stopped early"));
    }

    #[test]
    fn connection_loss_keeps_what_was_written() {
        let script = format!(
            "* LIST () \"/\" \"INBOX\"\r\n\
             a2 OK List completed\r\n\
             * 2 EXISTS\r\n\
             a3 OK Examine completed\r\n\
             * 1 FETCH (UID 1)\r\n\
             * 2 FETCH (UID 2)\r\n\
             a4 OK Fetch completed\r\n\
             {}a5 OK Fetch completed\r\n\
             * BYE Server shutting down\r\n",
            message(1, 1, "one")
        );
        let (summary, entries, note) = run(&script, options());
        assert_eq!(names(&entries), vec!["INBOX/1.eml"]);
        assert!(matches!(
            summary.error,
            Some(Error::Protocol(ProtocolError::Bye(_)))
        ));
        assert!(!note.is_empty());
    }

    #[test]
    fn connection_loss_inside_a_message_is_reported() {
        let script = "* LIST () \"/\" \"INBOX\"\r\n\
                      a2 OK List completed\r\n\
                      * 1 EXISTS\r\n\
                      a3 OK Examine completed\r\n\
                      * 1 FETCH (UID 1)\r\n\
                      a4 OK Fetch completed\r\n\
                      * 1 FETCH (UID 1 BODY[] {20}\r\nSubject: cut";
        let (summary, entries, note) = run(script, options());
        assert!(matches!(summary.error, Some(Error::ConnectionLost)));
        assert_eq!(names(&entries), vec!["INBOX/1.eml"]);
        assert_eq!(entries[0].1.len(), 20);
        assert!(entries[0].1.starts_with(b"Subject: cut"));
        assert_eq!(summary.messages_archived, 0);
        assert_eq!(summary.messages_skipped.len(), 1);
        assert_eq!(summary.messages_skipped[0].uid, 1);
        assert!(summary.messages_skipped[0].reason.contains("INBOX/1.eml"));
        assert!(note.contains("INBOX/1.eml"));
    }

    #[test]
    fn incomplete_note_can_be_disabled() {
        let script = "* LIST () \"/\" \"INBOX\"\r\n\
                      a2 OK List completed\r\n\
                      * BYE going away\r\n";
        let options = BackupOptions {
            mark_incomplete: false,
            ..options()
        };
        let (summary, entries, note) = run(script, options);
        assert!(!summary.is_complete());
        assert!(entries.is_empty());
        assert!(note.is_empty());
    }

    #[test]
    fn cancellation_finalizes_the_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cancelled.tar.zst");
        let script = format!(
            "{}* LIST () \"/\" \"INBOX\"\r\na2 OK List completed\r\na3 OK Logout completed\r\n",
            LOGIN
        );
        let session = Client::new(MockStream::new(script.into_bytes()))
            .login(&Credentials::new("u", "p"), AuthMechanism::Login)
            .unwrap();
        let backup = Backup::new(ConnectionConfig::new("localhost", 143), options());
        backup.cancellation().cancel();
        let archive = ArchiveWriter::create(&path, &ArchiveOptions::default()).unwrap();
        let mut events = Vec::new();
        let summary = backup
            .archive_session(session, archive, &mut |e: Event| events.push(e))
            .unwrap();
        assert!(summary.cancelled);
        assert!(summary.error.is_none());
        assert!(events.contains(&Event::Cancelled));
        let (entries, note) = read_back(&path);
        assert!(entries.is_empty());
        assert!(note.contains("cancelled"));
    }

    #[test]
    fn login_retries_once() {
        let response = b"a1 NO nope\r\na2 OK Logged in\r\n".to_vec();
        let client = Client::new(MockStream::new(response));
        let mut events = Vec::new();
        let session = login(
            client,
            Credentials::new("u", "p"),
            &options(),
            &mut |e: Event| events.push(e),
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(matches!(events[0], Event::LoginRetry { attempt: 1, .. }));
        assert_eq!(
            events[1],
            Event::LoggedIn {
                username: "u".to_string()
            }
        );
    }

    #[test]
    fn login_gives_up_after_retries() {
        let response = b"a1 NO nope\r\na2 NO still nope\r\na3 OK too late\r\n".to_vec();
        let client = Client::new(MockStream::new(response));
        match login(
            client,
            Credentials::new("u", "p"),
            &options(),
            &mut |_: Event| {},
        ) {
            Err(Error::Auth(AuthError::Rejected(reason))) => assert_eq!(reason, "still nope"),
            other => panic!("unexpected login result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn fetch_error_reports_uid() {
        let e = FetchError::MissingBody {
            mailbox: "INBOX".into(),
            uid: 5,
        };
        assert_eq!(e.uid(), 5);
    }
}
