//! The byte stream underneath an IMAP session.
//!
//! A [`Stream`] is either a plain TCP socket or a TLS session over one. It knows nothing about
//! IMAP; [`Client`](crate::client::Client) drives the protocol on top of it.

use std::fmt::{self, Debug, Formatter};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use log::debug;
use native_tls::{HandshakeError, TlsConnector, TlsStream};

use crate::config::{ConnectionConfig, SecurityMode, TrustPolicy};
use crate::error::{ConnectError, Error, Result, TlsError};

/// A connected socket, encrypted or not.
pub enum Stream {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS over TCP (boxed to keep the enum small).
    Tls(Box<TlsStream<TcpStream>>),
}

impl Debug for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Plain(_) => write!(f, "Stream::Plain"),
            Stream::Tls(_) => write!(f, "Stream::Tls"),
        }
    }
}

impl Stream {
    /// Returns true if the stream is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }

    /// The TCP socket underneath, for inspecting addresses and timeouts.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(tls) => tls.get_ref(),
        }
    }

    /// Close the connection. Errors are ignored; dropping the stream releases the socket
    /// either way.
    pub fn shutdown(&mut self) {
        if let Stream::Tls(tls) = self {
            let _ = tls.shutdown();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

/// Open a socket to the configured server.
///
/// With [`SecurityMode::ImplicitTls`] the TLS handshake happens here. For
/// [`SecurityMode::StartTls`] the plaintext stream is returned and the caller upgrades it with
/// [`upgrade`] once the server has agreed to `STARTTLS`.
pub fn connect(config: &ConnectionConfig) -> Result<Stream> {
    let tcp = open_socket(config)?;
    match config.security_mode() {
        SecurityMode::Plain | SecurityMode::StartTls => Ok(Stream::Plain(tcp)),
        SecurityMode::ImplicitTls => handshake(tcp, config),
    }
}

/// Perform a TLS handshake in place over an existing plaintext stream.
pub fn upgrade(stream: Stream, config: &ConnectionConfig) -> Result<Stream> {
    match stream {
        Stream::Plain(tcp) => handshake(tcp, config),
        Stream::Tls(_) => Err(TlsError::AlreadyEncrypted.into()),
    }
}

// resolve the address and try each candidate in order, keeping the last failure
fn open_socket(config: &ConnectionConfig) -> Result<TcpStream> {
    let host = config.host();
    let port = config.port();
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.tcp_connect_timeout()) {
            Ok(tcp) => {
                debug!("connected to {} ({})", host, addr);
                tcp.set_read_timeout(Some(config.io_timeout()))?;
                tcp.set_write_timeout(Some(config.io_timeout()))?;
                return Ok(tcp);
            }
            Err(error) => {
                debug!("couldn't connect to {}: {}", addr, error);
                last_error = Some(error);
            }
        }
    }

    Err(match last_error {
        Some(source) => ConnectError::Refused {
            host: host.to_string(),
            port,
            source,
        },
        None => ConnectError::NoAddress(host.to_string()),
    }
    .into())
}

pub(crate) fn tls_connector(trust: TrustPolicy) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();
    if trust == TrustPolicy::AcceptUntrusted {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    Ok(builder.build().map_err(TlsError::Connector)?)
}

fn handshake(tcp: TcpStream, config: &ConnectionConfig) -> Result<Stream> {
    let connector = tls_connector(config.trust_policy())?;
    match connector.connect(config.host(), tcp) {
        Ok(tls) => Ok(Stream::Tls(Box::new(tls))),
        Err(HandshakeError::Failure(e)) => Err(classify_failure(&e.to_string()).into()),
        Err(e) => Err(Error::from(e)),
    }
}

// native-tls does not expose the failure reason as a type, only through the message of the
// platform backend
fn classify_failure(message: &str) -> TlsError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("certificat") || lower.contains("hostname") || lower.contains("trust") {
        TlsError::UntrustedCertificate(message.to_string())
    } else {
        TlsError::Handshake(message.to_string())
    }
}
