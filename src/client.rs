use std::borrow::Cow;
use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::ops::{Deref, DerefMut};
use std::result;

use base64::{engine::general_purpose, Engine as _};
use bufstream::BufStream;
use lazy_static::lazy_static;
use log::{debug, log_enabled, trace, warn, Level};
use regex::bytes::Regex;

use super::archive::DEFAULT_BLOCK_SIZE;
use super::authenticator::{Authenticator, PlainAuthenticator};
use super::cancel::Cancellation;
use super::config::{AuthMechanism, ConnectionConfig, Credentials};
use super::error::{
    AuthError, Error, FetchError, MailboxError, ProtocolError, Result, TlsError, ValidateError,
};
use super::parse::{
    parse_authenticate_response, parse_body_prefix, parse_bye, parse_capabilities,
    parse_completion, parse_fetch, parse_identifiers, parse_mailbox, parse_names, Completion,
};
use super::transport::{self, Stream};
use super::types::*;

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

lazy_static! {
    static ref LITERAL: Regex = Regex::new(r"\{(\d+)\+?\}\r?\n$").unwrap();
    static ref BODY_LITERAL: Regex =
        Regex::new(r"(?i)(?:BODY\[\](?:<\d+>)?|RFC822) (\{\d+\+?\}\r?\n)$").unwrap();
}

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace("\"", "\\\""))
    };
}

/// Hand the client back alongside the error so the caller can retry.
macro_rules! ok_or_unauth_client_err {
    ($r:expr, $self:expr) => {
        match $r {
            Ok(o) => o,
            Err(e) => return Err((e.into(), $self)),
        }
    };
}

pub(crate) fn validate_str(value: &str) -> result::Result<String, ValidateError> {
    let quoted = quote!(value);
    if quoted.contains('\n') {
        return Err(ValidateError('\n'));
    }
    if quoted.contains('\r') {
        return Err(ValidateError('\r'));
    }
    Ok(quoted)
}

// hide credentials from wire traces
fn redacted(command: &str) -> Cow<'_, str> {
    let mut parts = command.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(verb), Some(_)) if verb.eq_ignore_ascii_case("LOGIN") => {
            Cow::Owned(format!("{} {} <redacted>", tag, verb))
        }
        _ => Cow::Borrowed(command),
    }
}

fn ok_or_error(completion: Completion) -> Result<Option<String>> {
    match completion {
        Completion::Ok(information) => Ok(information),
        Completion::No(reason) => Err(Error::No(reason)),
        Completion::Bad(reason) => Err(ProtocolError::Bad(reason).into()),
    }
}

/// Everything the server sent in answer to one command.
struct Reply {
    /// Untagged lines, with a streamed body literal replaced by `NIL`.
    lines: Vec<u8>,
    completion: Completion,
}

/// Receives a message body literal while it is read: the response line up to the literal,
/// the literal's length, and a reader over exactly that many bytes.
type BodySink<'a> = dyn FnMut(&[u8], u64, &mut dyn Read) -> Result<()> + 'a;

/// Reads a literal straight off the wire, at most one block per call, and stops at its end.
///
/// Failures of the connection and cancellation are kept in `failure`, apart from whatever
/// the consumer of the literal makes of the `io::Error` it sees.
struct LiteralReader<'a, R> {
    stream: &'a mut R,
    remaining: u64,
    block_size: usize,
    cancellation: &'a Cancellation,
    failure: Option<Error>,
}

impl<R: Read> Read for LiteralReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failure.is_some() {
            return Err(io::Error::new(ErrorKind::Other, "literal already failed"));
        }
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.cancellation.check() {
            self.failure = Some(e);
            return Err(io::Error::new(ErrorKind::Other, "cancelled inside a literal"));
        }

        let want = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(self.block_size)
            .min(buf.len());
        match self.stream.read(&mut buf[..want]) {
            Ok(0) => {
                self.failure = Some(Error::ConnectionLost);
                Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed inside a literal",
                ))
            }
            Ok(n) => {
                self.remaining -= n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Err(e),
            Err(e) => {
                let kind = e.kind();
                self.failure = Some(e.into());
                Err(io::Error::new(kind, "connection failed inside a literal"))
            }
        }
    }
}

/// The framing layer shared by [`Client`] and [`Session`]: tagging commands and reading their
/// responses, literals included.
#[derive(Debug)]
pub struct Connection<T: Read + Write> {
    pub(crate) stream: BufStream<T>,
    tag: u32,
    block_size: usize,
    cancellation: Cancellation,
    closing: bool,
}

/// An authenticated IMAP session providing the commands a backup needs. It is created by
/// logging in through a [`Client`].
///
/// Once a command fails fatally, or after [`Session::logout`], every further command returns
/// [`ProtocolError::InvalidState`].
#[derive(Debug)]
pub struct Session<T: Read + Write> {
    conn: Connection<T>,
    state: SessionState,
    selected: Option<MailboxMeta>,
}

/// Where a [`Session`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Logged in, no mailbox selected.
    Authenticated,
    /// A mailbox has been opened read-only.
    Selected,
    /// `LOGOUT` has been sent.
    LoggedOut,
    /// A fatal error left the connection in an unknown state.
    Failed,
}

impl SessionState {
    fn describe(self) -> &'static str {
        match self {
            SessionState::Authenticated => "authenticated",
            SessionState::Selected => "selected",
            SessionState::LoggedOut => "logged out",
            SessionState::Failed => "failed",
        }
    }
}

/// An (unauthenticated) handle to talk to an IMAP server. This is what you get when first
/// connecting. A succesfull call to [`Client::login`] or [`Client::authenticate`] will return
/// a [`Session`] instance that provides the usual IMAP methods.
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    conn: Connection<T>,
}

impl<T: Read + Write> Deref for Client<T> {
    type Target = Connection<T>;

    fn deref(&self) -> &Connection<T> {
        &self.conn
    }
}

impl<T: Read + Write> DerefMut for Client<T> {
    fn deref_mut(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }
}

impl Client<Stream> {
    /// Upgrade a plaintext connection with `STARTTLS`.
    ///
    /// The server must advertise the capability. Command tags keep counting on the encrypted
    /// stream.
    pub fn starttls(mut self, config: &ConnectionConfig) -> Result<Client<Stream>> {
        if self.stream.get_ref().is_tls() {
            return Err(TlsError::AlreadyEncrypted.into());
        }
        if !self.capabilities()?.has("STARTTLS") {
            return Err(TlsError::StartTlsUnsupported.into());
        }
        self.run_command_and_check_ok("STARTTLS")?;

        let Connection {
            stream,
            tag,
            block_size,
            cancellation,
            ..
        } = self.conn;
        let tls = transport::upgrade(stream.into_inner()?, config)?;
        debug!("connection upgraded to TLS");
        Ok(Client {
            conn: Connection {
                stream: BufStream::new(tls),
                tag,
                block_size,
                cancellation,
                closing: false,
            },
        })
    }
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client over the given stream.
    ///
    /// This method primarily exists for writing tests that mock the underlying transport, but
    /// can also be used to drive a backup over a custom stream. For connecting to a server,
    /// use [`ClientBuilder`](crate::ClientBuilder).
    pub fn new(stream: T) -> Client<T> {
        Client {
            conn: Connection {
                stream: BufStream::new(stream),
                tag: INITIAL_TAG,
                block_size: DEFAULT_BLOCK_SIZE,
                cancellation: Cancellation::default(),
                closing: false,
            },
        }
    }

    /// Read the server greeting. A `BYE` greeting means the server refused us.
    pub fn read_greeting(&mut self) -> Result<()> {
        let mut v = Vec::new();
        self.readline(&mut v)?;
        if let Some(reason) = parse_bye(&v) {
            return Err(crate::error::ConnectError::Greeting(reason).into());
        }
        if !(v.starts_with(b"* OK") || v.starts_with(b"* PREAUTH")) {
            return Err(ProtocolError::Unexpected(
                String::from_utf8_lossy(&v).trim_end().to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// The `CAPABILITY` command requests a listing of capabilities that the server supports.
    pub fn capabilities(&mut self) -> Result<Capabilities> {
        self.run_command_and_read_response("CAPABILITY")
            .and_then(|lines| parse_capabilities(&lines))
    }

    /// Log in to the IMAP server with the given mechanism.
    ///
    /// With [`AuthMechanism::Auto`] the server's capabilities decide: `LOGIN` is used unless
    /// it is disabled, in which case `AUTHENTICATE PLAIN` is tried if offered. On failure the
    /// client is handed back so the attempt can be repeated.
    pub fn login(
        mut self,
        credentials: &Credentials,
        mechanism: AuthMechanism,
    ) -> result::Result<Session<T>, (Error, Client<T>)> {
        let mechanism = match mechanism {
            AuthMechanism::Auto => {
                let capabilities = ok_or_unauth_client_err!(self.capabilities(), self);
                ok_or_unauth_client_err!(choose_mechanism(&capabilities), self)
            }
            forced => forced,
        };

        match mechanism {
            AuthMechanism::Plain => {
                self.authenticate("PLAIN", &PlainAuthenticator::new(credentials))
            }
            _ => self.login_plaintext(credentials),
        }
    }

    fn login_plaintext(
        mut self,
        credentials: &Credentials,
    ) -> result::Result<Session<T>, (Error, Client<T>)> {
        let username = ok_or_unauth_client_err!(validate_str(credentials.username()), self);
        let secret = ok_or_unauth_client_err!(validate_str(credentials.secret()), self);
        let reply = ok_or_unauth_client_err!(
            self.run(&format!("LOGIN {} {}", username, secret), None),
            self
        );
        ok_or_unauth_client_err!(authenticated(reply.completion), self);
        Ok(Session::new(self.conn))
    }

    /// Authenticate with the server using the given custom `authenticator` to handle the
    /// server's challenge.
    pub fn authenticate<A: Authenticator>(
        mut self,
        auth_type: &str,
        authenticator: &A,
    ) -> result::Result<Session<T>, (Error, Client<T>)> {
        ok_or_unauth_client_err!(
            self.run_command(&format!("AUTHENTICATE {}", auth_type)),
            self
        );
        let completion = ok_or_unauth_client_err!(self.do_auth_handshake(authenticator), self);
        ok_or_unauth_client_err!(authenticated(completion), self);
        Ok(Session::new(self.conn))
    }

    /// This func does the handshake process once the authenticate command is made.
    fn do_auth_handshake<A: Authenticator>(&mut self, authenticator: &A) -> Result<Completion> {
        let tag = self.current_tag();
        loop {
            let mut line = Vec::new();
            self.readline(&mut line)?;

            if line.starts_with(b"+") {
                let text = String::from_utf8_lossy(&line);
                let data = parse_authenticate_response(&text)?;
                let challenge = general_purpose::STANDARD.decode(data).map_err(|e| {
                    ProtocolError::Unexpected(format!("invalid challenge {:?}: {}", data, e))
                })?;
                let raw_response = authenticator.process(&challenge);
                let auth_response = general_purpose::STANDARD.encode(raw_response.as_ref());

                trace!("C: <redacted>");
                self.write_line(auth_response.as_bytes())?;
            } else if line.starts_with(b"*") {
                if let Some(reason) = parse_bye(&line) {
                    return Err(ProtocolError::Bye(reason).into());
                }
            } else {
                return parse_completion(&line, &tag);
            }
        }
    }
}

// Finish a streamed fetch from the complete response: fill in what the server sent after the
// content, or hand over content that arrived inline rather than as a literal.
fn complete_message<F>(
    reference: &MessageRef,
    reply: Reply,
    streamed: Option<MessageHeader>,
    sink: &mut F,
) -> Result<MessageHeader>
where
    F: FnMut(&MessageHeader, &mut dyn Read) -> Result<()>,
{
    match (reply.completion, streamed.is_some()) {
        (Completion::Ok(_), _) => {}
        (Completion::No(reason), true) | (Completion::Bad(reason), true) => {
            warn!(
                "uid {} completed with an error after its content: {}",
                reference.uid, reason
            )
        }
        (Completion::No(reason), false) => {
            return Err(FetchError::Rejected {
                mailbox: reference.mailbox.clone(),
                uid: reference.uid,
                reason,
            }
            .into())
        }
        (Completion::Bad(reason), false) => return Err(ProtocolError::Bad(reason).into()),
    }

    let fetched = parse_fetch(reference, &reply.lines);
    match streamed {
        Some(mut header) => {
            match fetched {
                Ok(fetched) => {
                    header.flags = fetched.flags;
                    header.internal_date = fetched.internal_date.or(header.internal_date);
                }
                // the content arrived in a FETCH without a UID
                Err(Error::Fetch(_)) => {}
                Err(e) => return Err(e),
            }
            Ok(header)
        }
        None => {
            let fetched = fetched?;
            let content = fetched.body.ok_or_else(|| {
                Error::from(FetchError::MissingBody {
                    mailbox: reference.mailbox.clone(),
                    uid: reference.uid,
                })
            })?;
            let header = MessageHeader {
                reference: reference.clone(),
                flags: fetched.flags,
                internal_date: fetched.internal_date,
                len: content.len() as u64,
            };
            sink(&header, &mut content.as_slice())?;
            Ok(header)
        }
    }
}

fn authenticated(completion: Completion) -> Result<()> {
    match completion {
        Completion::Ok(_) => Ok(()),
        Completion::No(reason) => Err(AuthError::Rejected(reason).into()),
        Completion::Bad(reason) => Err(ProtocolError::Bad(reason).into()),
    }
}

/// Pick the login command for [`AuthMechanism::Auto`].
pub(crate) fn choose_mechanism(capabilities: &Capabilities) -> Result<AuthMechanism> {
    if !capabilities.has("LOGINDISABLED") {
        Ok(AuthMechanism::Login)
    } else if capabilities.has("AUTH=PLAIN") {
        Ok(AuthMechanism::Plain)
    } else {
        Err(AuthError::NoMechanism.into())
    }
}

impl<T: Read + Write> Session<T> {
    pub(crate) fn new(conn: Connection<T>) -> Self {
        Session {
            conn,
            state: SessionState::Authenticated,
            selected: None,
        }
    }

    /// The current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The mailbox opened by the last successful [`Session::select`], if any.
    pub fn selected(&self) -> Option<&MailboxMeta> {
        self.selected.as_ref()
    }

    fn usable(&self) -> Result<()> {
        match self.state {
            SessionState::LoggedOut | SessionState::Failed => {
                Err(ProtocolError::InvalidState(self.state.describe()).into())
            }
            _ => Ok(()),
        }
    }

    // a fatal error leaves the stream mid-response; nothing after it can be trusted
    fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                debug!("session failed: {}", e);
                self.state = SessionState::Failed;
                self.selected = None;
            }
        }
        result
    }

    /// The `LIST` command returns every mailbox name visible to the user.
    pub fn list(&mut self) -> Result<Vec<Name>> {
        self.usable()?;
        let result = self
            .conn
            .run_command_and_read_response(r#"LIST "" "*""#)
            .and_then(|lines| parse_names(&lines));
        self.track(result)
    }

    /// Open `mailbox` read-only with `EXAMINE`.
    ///
    /// A refusal by the server is a [`MailboxError`] and leaves the session authenticated
    /// with no mailbox selected.
    pub fn select(&mut self, mailbox: &str) -> Result<MailboxMeta> {
        self.usable()?;
        let quoted = validate_str(mailbox).map_err(|source| MailboxError::InvalidName {
            mailbox: mailbox.to_string(),
            source,
        })?;
        let result = self.examine(mailbox, &quoted);
        self.track(result)
    }

    fn examine(&mut self, mailbox: &str, quoted: &str) -> Result<MailboxMeta> {
        // the server deselects the current mailbox even if EXAMINE fails
        self.state = SessionState::Authenticated;
        self.selected = None;

        let reply = self.conn.run(&format!("EXAMINE {}", quoted), None)?;
        match reply.completion {
            Completion::Ok(_) => {
                let meta = parse_mailbox(mailbox, &reply.lines)?;
                self.state = SessionState::Selected;
                self.selected = Some(meta.clone());
                Ok(meta)
            }
            Completion::No(reason) => Err(MailboxError::Rejected {
                mailbox: mailbox.to_string(),
                reason,
            }
            .into()),
            Completion::Bad(reason) => Err(ProtocolError::Bad(reason).into()),
        }
    }

    fn selected_mailbox(&self) -> Result<&MailboxMeta> {
        self.usable()?;
        self.selected
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("without a selected mailbox").into())
    }

    /// List the UID and size of every message in the selected mailbox, in UID order.
    ///
    /// No command is sent for a mailbox that reported no messages.
    pub fn fetch_identifiers(&mut self) -> Result<Vec<MessageRef>> {
        let mailbox = self.selected_mailbox()?;
        if mailbox.is_empty() {
            return Ok(Vec::new());
        }
        let name = mailbox.name.clone();
        let result = self
            .conn
            .run_command_and_read_response("UID FETCH 1:* (UID RFC822.SIZE)")
            .and_then(|lines| parse_identifiers(&name, &lines));
        self.track(result)
    }

    /// Retrieve one message with its flags and internal date into memory, without setting
    /// `\Seen`. [`Session::stream_message`] does the same without holding the content.
    pub fn fetch_message(&mut self, reference: &MessageRef) -> Result<MessageRecord> {
        let mut content = Vec::new();
        let header = self.stream_message(reference, |_, body| {
            body.read_to_end(&mut content)?;
            Ok(())
        })?;
        Ok(MessageRecord::new(header, content))
    }

    /// Retrieve one message without setting `\Seen`, handing its content to `sink` while it
    /// is read off the wire.
    ///
    /// `sink` is called once, with the attributes the server sent ahead of the content and a
    /// reader over exactly `len` bytes that yields at most one block per read. Whatever it
    /// leaves unread is skipped. An error from `sink` is returned after the rest of the
    /// response has been read, so the session stays usable unless that error is fatal.
    ///
    /// The returned header also carries attributes the server sent after the content.
    pub fn stream_message<F>(
        &mut self,
        reference: &MessageRef,
        mut sink: F,
    ) -> Result<MessageHeader>
    where
        F: FnMut(&MessageHeader, &mut dyn Read) -> Result<()>,
    {
        if self.selected_mailbox()?.name != reference.mailbox {
            return Err(ProtocolError::InvalidState("on a different mailbox").into());
        }
        let command = format!(
            "UID FETCH {} (UID FLAGS INTERNALDATE BODY.PEEK[])",
            reference.uid
        );

        let mut streamed: Option<MessageHeader> = None;
        let mut on_body = |prefix: &[u8], len: u64, content: &mut dyn Read| -> Result<()> {
            if streamed.is_some() {
                return Ok(());
            }
            let early = parse_body_prefix(prefix).unwrap_or_default();
            if early.uid.is_some_and(|uid| uid != reference.uid) {
                debug!("discarding unrequested body of uid {:?}", early.uid);
                return Ok(());
            }
            let header = MessageHeader {
                reference: reference.clone(),
                flags: early.flags,
                internal_date: early.internal_date,
                len,
            };
            let outcome = sink(&header, content);
            streamed = Some(header);
            outcome
        };
        let result = self
            .conn
            .run(&command, Some(&mut on_body as &mut BodySink<'_>))
            .and_then(|reply| complete_message(reference, reply, streamed, &mut sink));
        self.track(result)
    }

    /// Logout informs the server that the client is done with the connection.
    ///
    /// The untagged `BYE` that precedes the completion is expected here, and a server that
    /// hangs up right after it is not an error.
    pub fn logout(&mut self) -> Result<()> {
        self.usable()?;
        self.conn.closing = true;
        let result = self.conn.run_command_and_check_ok("LOGOUT");
        self.state = SessionState::LoggedOut;
        self.selected = None;
        match result {
            Err(Error::ConnectionLost) => Ok(()),
            r => r,
        }
    }
}

impl<T: Read + Write> Connection<T> {
    pub(crate) fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size.max(1);
    }

    pub(crate) fn set_cancellation(&mut self, cancellation: Cancellation) {
        self.cancellation = cancellation;
    }

    /// Runs a command and checks if it returns OK.
    pub(crate) fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        self.run_command_and_read_response(command).map(|_| ())
    }

    /// Runs a command and returns its untagged lines if it completed with OK.
    pub(crate) fn run_command_and_read_response(&mut self, command: &str) -> Result<Vec<u8>> {
        let reply = self.run(command, None)?;
        ok_or_error(reply.completion)?;
        Ok(reply.lines)
    }

    fn run(&mut self, command: &str, body: Option<&mut BodySink<'_>>) -> Result<Reply> {
        self.run_command(command)?;
        let mut lines = Vec::new();
        let completion = self.read_response_onto(&mut lines, body)?;
        Ok(Reply { lines, completion })
    }

    /// Tag and send a command.
    pub(crate) fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command);
        trace!("C: {}", redacted(&command));
        self.write_line(command.as_bytes())
    }

    fn current_tag(&self) -> String {
        format!("{}{}", TAG_PREFIX, self.tag)
    }

    fn create_command(&mut self, command: &str) -> String {
        self.tag += 1;
        format!("{}{} {}", TAG_PREFIX, self.tag, command)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        Ok(())
    }

    // Read until the completion of the outstanding command. An error from `body` is held back
    // until the completion has been read, so the stream stays in step with the server.
    fn read_response_onto(
        &mut self,
        data: &mut Vec<u8>,
        mut body: Option<&mut BodySink<'_>>,
    ) -> Result<Completion> {
        let tag = self.current_tag();
        let mut refused = None;
        loop {
            let line_start = data.len();
            let outcome = self.read_logical_line(data, body.as_deref_mut())?;
            if refused.is_none() {
                refused = outcome;
            }

            let line = &data[line_start..];
            match line.first() {
                Some(b'*') => {
                    if let Some(reason) = parse_bye(line) {
                        if !self.closing {
                            return Err(ProtocolError::Bye(reason).into());
                        }
                        debug!("server closing connection: {}", reason);
                    }
                }
                Some(b'+') => return Err(ProtocolError::UnexpectedContinuation.into()),
                _ => {
                    let completion = parse_completion(line, &tag)?;
                    data.truncate(line_start);
                    return match refused {
                        Some(e) => Err(e),
                        None => Ok(completion),
                    };
                }
            }
        }
    }

    // Read one response line, following any literals it announces. A message body literal is
    // handed to `body` as it is read and `NIL` is left in its place. The error `body` returned,
    // if any, comes back inside `Ok`.
    fn read_logical_line(
        &mut self,
        data: &mut Vec<u8>,
        mut body: Option<&mut BodySink<'_>>,
    ) -> Result<Option<Error>> {
        let line_start = data.len();
        let mut physical_start = line_start;
        let mut refused = None;
        self.readline(data)?;

        while let Some(size) = literal_size(&data[physical_start..])? {
            let body_at = if body.is_some() {
                BODY_LITERAL
                    .captures(&data[physical_start..])
                    .and_then(|caps| caps.get(1))
                    .map(|m| physical_start + m.start())
            } else {
                None
            };

            match (body_at, body.as_deref_mut()) {
                (Some(at), Some(sink)) => {
                    let outcome = self.stream_literal(size, &data[line_start..at], sink)?;
                    if refused.is_none() {
                        refused = outcome;
                    }
                    data.truncate(at);
                    data.extend_from_slice(b"NIL");
                }
                _ => self.read_literal(size, data)?,
            }

            physical_start = data.len();
            self.readline(data)?;
        }
        Ok(refused)
    }

    // Hand a literal of `len` bytes to `sink` and skip what it leaves unread. A failure of the
    // connection wins over the sink's own error, which is returned inside `Ok`.
    fn stream_literal(
        &mut self,
        len: u32,
        prefix: &[u8],
        sink: &mut BodySink<'_>,
    ) -> Result<Option<Error>> {
        trace!("S: <{} byte literal, streamed>", len);
        let mut reader = LiteralReader {
            stream: &mut self.stream,
            remaining: u64::from(len),
            block_size: self.block_size,
            cancellation: &self.cancellation,
            failure: None,
        };
        let outcome = sink(prefix, u64::from(len), &mut reader);
        let drained = io::copy(&mut reader, &mut io::sink());
        if let Some(failure) = reader.failure.take() {
            return Err(failure);
        }
        drained?;
        Ok(outcome.err())
    }

    // the buffer grows one block at a time, as the bytes actually arrive
    fn read_literal(&mut self, len: u32, into: &mut Vec<u8>) -> Result<()> {
        trace!("S: <{} byte literal>", len);
        let mut remaining = len as usize;
        while remaining > 0 {
            self.cancellation.check()?;
            let chunk = remaining.min(self.block_size);
            let start = into.len();
            into.resize(start + chunk, 0);
            self.stream.read_exact(&mut into[start..])?;
            remaining -= chunk;
        }
        Ok(())
    }

    pub(crate) fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        let read = self.stream.read_until(LF, into)?;
        if read == 0 || !into.ends_with(&[LF]) {
            return Err(Error::ConnectionLost);
        }

        if log_enabled!(Level::Trace) {
            let line = &into[into.len() - read..];
            trace!("S: {}", String::from_utf8_lossy(line).trim_end());
        }

        Ok(read)
    }
}

// RFC 3501 limits a literal's length to a 32-bit number; anything larger is garbage.
fn literal_size(line: &[u8]) -> Result<Option<u32>> {
    let size = match LITERAL.captures(line).and_then(|caps| caps.get(1)) {
        Some(size) => size.as_bytes(),
        None => return Ok(None),
    };
    std::str::from_utf8(size)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Some)
        .ok_or_else(|| {
            ProtocolError::Unparseable(String::from_utf8_lossy(line).trim_end().to_string())
                .into()
        })
}
