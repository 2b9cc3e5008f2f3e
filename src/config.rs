//! Connection and backup settings.
//!
//! Everything here is resolved by the caller (the command line front end, or a program
//! embedding the engine) and handed to [`Backup`](crate::Backup) as immutable values.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::archive::ArchiveOptions;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How the connection to the server is secured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecurityMode {
    /// No encryption at all.
    Plain,
    /// TLS from the first byte, usually on port 993.
    #[default]
    ImplicitTls,
    /// Plaintext upgraded with the `STARTTLS` command, usually on port 143.
    StartTls,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::Plain => f.write_str("plain"),
            SecurityMode::ImplicitTls => f.write_str("implicit-tls"),
            SecurityMode::StartTls => f.write_str("starttls"),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(SecurityMode::Plain),
            "implicit-tls" | "tls" => Ok(SecurityMode::ImplicitTls),
            "starttls" => Ok(SecurityMode::StartTls),
            other => Err(format!("unknown security mode {:?}", other)),
        }
    }
}

/// Whether the server certificate has to validate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Reject any chain or host name mismatch.
    #[default]
    Verify,
    /// Accept any certificate. This is insecure and only ever enabled explicitly.
    AcceptUntrusted,
}

/// Where and how to reach the IMAP server.
///
/// ```
/// # use imap_backup::{ConnectionConfig, SecurityMode, TrustPolicy};
/// let config = ConnectionConfig::new("imap.example.com", 143)
///     .security(SecurityMode::StartTls)
///     .trust(TrustPolicy::AcceptUntrusted);
/// assert_eq!(config.port(), 143);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    security: SecurityMode,
    trust: TrustPolicy,
    timeout: Duration,
    connect_timeout: Duration,
}

impl ConnectionConfig {
    /// A configuration for `host:port` using implicit TLS with certificate validation.
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        ConnectionConfig {
            host: host.into(),
            port,
            security: SecurityMode::default(),
            trust: TrustPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Use the given transport security.
    pub fn security(mut self, security: SecurityMode) -> Self {
        self.security = security;
        self
    }

    /// Use the given certificate trust policy.
    pub fn trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    /// Time allowed for each read and write on the socket.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time allowed to establish the TCP connection to each resolved address.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The server host name, also used for SNI and certificate validation.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The transport security mode.
    pub fn security_mode(&self) -> SecurityMode {
        self.security
    }

    /// The certificate trust policy.
    pub fn trust_policy(&self) -> TrustPolicy {
        self.trust
    }

    /// The read/write timeout.
    pub fn io_timeout(&self) -> Duration {
        self.timeout
    }

    /// The TCP connect timeout.
    pub fn tcp_connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// A user name and its secret.
///
/// The secret is wiped from memory when the value is dropped.
pub struct Credentials {
    username: String,
    secret: SecretString,
}

impl Credentials {
    /// Bundle a user name and password.
    pub fn new<U: Into<String>, S: Into<String>>(username: U, secret: S) -> Self {
        Credentials {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// The user name.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Which command is used to log in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMechanism {
    /// `LOGIN`, unless the server disables it and offers `AUTH=PLAIN`.
    #[default]
    Auto,
    /// Always `LOGIN`.
    Login,
    /// Always `AUTHENTICATE PLAIN`.
    Plain,
}

/// What to do when a mailbox cannot be selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MailboxFailurePolicy {
    /// Record the mailbox as skipped and continue with the next one.
    #[default]
    Skip,
    /// Treat it like a connection failure and end the run.
    Abort,
}

/// What to do when a single message cannot be fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageFailurePolicy {
    /// Record the message as skipped and continue with the next one.
    #[default]
    Skip,
    /// Give up on the rest of the mailbox and continue with the next mailbox.
    SkipMailbox,
}

/// Knobs for a backup run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupOptions {
    /// How to authenticate.
    pub auth: AuthMechanism,
    /// How many times a rejected login is retried before giving up.
    pub login_retries: u32,
    /// Policy for mailboxes that cannot be selected.
    pub on_mailbox_error: MailboxFailurePolicy,
    /// Policy for messages that cannot be fetched.
    pub on_message_error: MessageFailurePolicy,
    /// Append a note describing what is missing to incomplete archives.
    pub mark_incomplete: bool,
    /// Archive encoding settings.
    pub archive: ArchiveOptions,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            auth: AuthMechanism::default(),
            login_retries: 1,
            on_mailbox_error: MailboxFailurePolicy::default(),
            on_message_error: MessageFailurePolicy::default(),
            mark_incomplete: true,
            archive: ArchiveOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_secure() {
        let config = ConnectionConfig::new("imap.example.com", 993);
        assert_eq!(config.security_mode(), SecurityMode::ImplicitTls);
        assert_eq!(config.trust_policy(), TrustPolicy::Verify);
        assert_eq!(config.io_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn security_mode_round_trips_through_strings() {
        for mode in [
            SecurityMode::Plain,
            SecurityMode::ImplicitTls,
            SecurityMode::StartTls,
        ] {
            assert_eq!(mode.to_string().parse::<SecurityMode>(), Ok(mode));
        }
        assert!("ssl3".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let credentials = Credentials::new("alice", "hunter2");
        let shown = format!("{:?}", credentials);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
        assert_eq!(credentials.secret(), "hunter2");
    }
}
