//! SASL mechanisms for `AUTHENTICATE`.

use crate::config::Credentials;

/// This trait allows pluggable authentication schemes. It is used by [`Client::authenticate`]
/// to [authenticate using SASL](https://tools.ietf.org/html/rfc3501#section-6.2.2).
///
/// [`Client::authenticate`]: crate::client::Client::authenticate
pub trait Authenticator {
    /// The type of the response to the challenge. This will usually be a `Vec<u8>` or `String`.
    type Response: AsRef<[u8]>;

    /// Each base64-decoded server challenge is passed to `process`.
    /// The returned byte-string is base64-encoded and then sent back to the server.
    fn process(&self, challenge: &[u8]) -> Self::Response;
}

/// The `PLAIN` mechanism of [RFC 4616](https://tools.ietf.org/html/rfc4616): an empty
/// authorization identity, the user name and the password, separated by NUL bytes.
pub struct PlainAuthenticator<'a> {
    credentials: &'a Credentials,
}

impl<'a> PlainAuthenticator<'a> {
    /// Authenticate as the user in `credentials`.
    pub fn new(credentials: &'a Credentials) -> Self {
        PlainAuthenticator { credentials }
    }
}

impl Authenticator for PlainAuthenticator<'_> {
    type Response = Vec<u8>;

    fn process(&self, _challenge: &[u8]) -> Self::Response {
        let username = self.credentials.username().as_bytes();
        let secret = self.credentials.secret().as_bytes();
        let mut response = Vec::with_capacity(username.len() + secret.len() + 2);
        response.push(0);
        response.extend_from_slice(username);
        response.push(0);
        response.extend_from_slice(secret);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_response_layout() {
        let credentials = Credentials::new("user", "pass");
        let auth = PlainAuthenticator::new(&credentials);
        assert_eq!(auth.process(b""), b"\0user\0pass".to_vec());
    }
}
