//! IMAP backup error types.

use std::io::{Error as IoError, ErrorKind};
use std::net::TcpStream;
use std::result;

use bufstream::IntoInnerError as BufError;
use native_tls::HandshakeError;
use thiserror::Error;

use crate::types::Uid;

/// A convenience wrapper around `Result` for `imap_backup::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while backing up an account.
///
/// Only [`Error::Mailbox`] and [`Error::Fetch`] are recoverable: the backup skips the mailbox
/// or message and carries on. Everything else ends the run.
#[derive(Debug, Error)]
pub enum Error {
    /// The server could not be reached.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The TLS handshake or certificate validation failed.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// The server rejected our credentials.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A mailbox could not be selected.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    /// A single message could not be retrieved.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The archive could not be written.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// The server said something we did not expect.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    #[error("connection error: {0}")]
    Io(IoError),
    /// A read or write on the network stream did not complete in time.
    #[error("connection timed out")]
    TimedOut,
    /// The connection was terminated unexpectedly.
    #[error("connection lost")]
    ConnectionLost,
    /// Error validating input data.
    #[error(transparent)]
    Validate(#[from] ValidateError),
    /// A NO response from the IMAP server to a command with no more specific error.
    #[error("no response: {0}")]
    No(String),
    /// The run was cancelled by the caller.
    #[error("backup cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error ends the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Mailbox(_) | Error::Fetch(_))
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Error::TimedOut,
            ErrorKind::UnexpectedEof => Error::ConnectionLost,
            _ => Error::Io(err),
        }
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::from(IoError::from(err))
    }
}

impl From<HandshakeError<TcpStream>> for Error {
    fn from(err: HandshakeError<TcpStream>) -> Error {
        match err {
            HandshakeError::Failure(e) => Error::Tls(TlsError::Handshake(e.to_string())),
            HandshakeError::WouldBlock(_) => Error::TimedOut,
        }
    }
}

/// The host could not be resolved or no socket could be opened.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Name resolution failed.
    #[error("could not resolve {host}: {source}")]
    Resolve {
        /// The host we tried to resolve.
        host: String,
        /// The underlying resolver error.
        source: IoError,
    },
    /// The host resolved to no address at all.
    #[error("{0} did not resolve to any address")]
    NoAddress(String),
    /// Every resolved address refused or timed out.
    #[error("could not connect to {host}:{port}: {source}")]
    Refused {
        /// The host we tried to reach.
        host: String,
        /// The port we tried to reach.
        port: u16,
        /// The error of the last address attempted.
        source: IoError,
    },
    /// The server greeted us with `BYE`.
    #[error("server refused the connection: {0}")]
    Greeting(String),
}

/// Failures while setting up transport security.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The certificate chain or host name did not validate.
    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),
    /// Any other handshake failure.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    /// The TLS connector could not be built.
    #[error("TLS setup failed: {0}")]
    Connector(#[from] native_tls::Error),
    /// The server does not advertise `STARTTLS`.
    #[error("server does not support STARTTLS")]
    StartTlsUnsupported,
    /// `upgrade` was called on a stream that is already encrypted.
    #[error("connection is already encrypted")]
    AlreadyEncrypted,
}

/// The server refused to authenticate us.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A tagged `NO` in response to `LOGIN` or `AUTHENTICATE`.
    #[error("authentication rejected: {0}")]
    Rejected(String),
    /// `LOGIN` is disabled and no mechanism we support is offered.
    #[error("server offers no supported authentication mechanism")]
    NoMechanism,
}

/// A mailbox could not be opened.
#[derive(Debug, Error)]
pub enum MailboxError {
    /// The server answered `NO` to `EXAMINE`.
    #[error("mailbox {mailbox:?} rejected: {reason}")]
    Rejected {
        /// The mailbox we tried to open.
        mailbox: String,
        /// The server's explanation.
        reason: String,
    },
    /// The mailbox name cannot be sent to the server.
    #[error("mailbox {mailbox:?} has an invalid name: {source}")]
    InvalidName {
        /// The mailbox name as listed.
        mailbox: String,
        /// The offending character.
        source: ValidateError,
    },
    /// Too many messages in this mailbox failed and the policy gave up on it.
    #[error("mailbox {0:?} abandoned after a message failed")]
    Abandoned(String),
}

/// A single message could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server returned no data for this UID, usually because it was expunged.
    #[error("message {uid} in {mailbox:?} is gone")]
    Expunged {
        /// Mailbox holding the message.
        mailbox: String,
        /// The message UID.
        uid: Uid,
    },
    /// The server answered `NO` to the fetch.
    #[error("message {uid} in {mailbox:?} rejected: {reason}")]
    Rejected {
        /// Mailbox holding the message.
        mailbox: String,
        /// The message UID.
        uid: Uid,
        /// The server's explanation.
        reason: String,
    },
    /// FETCH data arrived but without the message content.
    #[error("message {uid} in {mailbox:?} came back without a body")]
    MissingBody {
        /// Mailbox holding the message.
        mailbox: String,
        /// The message UID.
        uid: Uid,
    },
}

impl FetchError {
    /// The UID of the message that was not retrieved.
    pub fn uid(&self) -> Uid {
        match *self {
            FetchError::Expunged { uid, .. }
            | FetchError::Rejected { uid, .. }
            | FetchError::MissingBody { uid, .. } => uid,
        }
    }
}

/// The archive could not be written.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The archive file or encoder failed.
    #[error("archive I/O error: {0}")]
    Io(#[from] IoError),
    /// The encoder thread is gone, usually after an earlier I/O error.
    #[error("archive encoder stopped unexpectedly")]
    WorkerGone,
    /// The content stream ended before the announced length.
    #[error("entry {path:?} ended after {written} of {expected} bytes")]
    ShortContent {
        /// Logical path of the entry.
        path: String,
        /// Bytes announced in the header.
        expected: u64,
        /// Bytes actually delivered.
        written: u64,
    },
    /// The writer was already finished.
    #[error("archive already finished")]
    Finished,
}

/// The server did not follow the protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A BAD response from the IMAP server.
    #[error("bad response: {0}")]
    Bad(String),
    /// The server sent `BYE` outside of `LOGOUT`.
    #[error("server closed the session: {0}")]
    Bye(String),
    /// A tagged completion arrived for a command we did not send.
    #[error("expected completion for {expected}, got {found}")]
    UnexpectedTag {
        /// The tag of the outstanding command.
        expected: String,
        /// The tag the server used.
        found: String,
    },
    /// A command continuation request arrived where none was expected.
    #[error("unexpected continuation request")]
    UnexpectedContinuation,
    /// A well-formed response that makes no sense here.
    #[error("unexpected response: {0}")]
    Unexpected(String),
    /// Data we could not parse.
    #[error("unable to parse response: {0}")]
    Unparseable(String),
    /// The session can no longer be used.
    #[error("session is {0} and cannot run commands")]
    InvalidState(&'static str),
}

/// An invalid character was found in user input. Expand as needed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid character in input: {0:?}")]
pub struct ValidateError(pub char);
