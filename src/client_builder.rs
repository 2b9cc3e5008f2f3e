use log::debug;

use crate::cancel::Cancellation;
use crate::client::Client;
use crate::config::{ConnectionConfig, SecurityMode};
use crate::error::Result;
use crate::transport::{self, Stream};

/// A convenience builder for [`Client`] structs over the configured transport.
///
/// The security mode of the [`ConnectionConfig`] decides what happens on [`connect`]:
/// implicit TLS performs the handshake right away, `STARTTLS` reads the greeting in the clear
/// and then upgrades, and plain connections are used as they are.
///
/// ```no_run
/// # use imap_backup::{ClientBuilder, ConnectionConfig, SecurityMode};
/// # fn main() -> Result<(), imap_backup::Error> {
/// let config = ConnectionConfig::new("imap.example.com", 143).security(SecurityMode::StartTls);
/// let client = ClientBuilder::new(&config).connect()?;
/// # Ok(())
/// # }
/// ```
///
/// [`connect`]: ClientBuilder::connect
pub struct ClientBuilder<'a> {
    config: &'a ConnectionConfig,
    block_size: Option<usize>,
    cancellation: Cancellation,
}

impl<'a> ClientBuilder<'a> {
    /// Make a new `ClientBuilder` for the given server.
    pub fn new(config: &'a ConnectionConfig) -> Self {
        ClientBuilder {
            config,
            block_size: None,
            cancellation: Cancellation::default(),
        }
    }

    /// Read literals in chunks of this many bytes.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Abort literal reads once `cancellation` is triggered.
    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Connect, read the greeting and, for `STARTTLS`, upgrade the connection.
    pub fn connect(self) -> Result<Client<Stream>> {
        let stream = transport::connect(self.config)?;
        let mut client = Client::new(stream);
        if let Some(block_size) = self.block_size {
            client.set_block_size(block_size);
        }
        client.set_cancellation(self.cancellation);
        if let Err(e) = client.read_greeting() {
            client.stream.get_mut().shutdown();
            return Err(e);
        }
        debug!(
            "connected to {}:{} ({})",
            self.config.host(),
            self.config.port(),
            self.config.security_mode()
        );

        match self.config.security_mode() {
            SecurityMode::StartTls => client.starttls(self.config),
            SecurityMode::Plain | SecurityMode::ImplicitTls => Ok(client),
        }
    }
}
