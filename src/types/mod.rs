//! Values exchanged with the IMAP server during a backup.

/// A 32-bit value assigned to each message, which together with the mailbox's `UIDVALIDITY`
/// names that message for as long as the mailbox exists. See [section 2.3.1.1 of RFC
/// 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// UIDs are strictly ascending within a mailbox, so ordering by UID gives the same message
/// order on every run against an unchanged mailbox. Archive entries are named after them.
pub type Uid = u32;

mod flag;
pub use self::flag::Flag;

mod mailbox;
pub use self::mailbox::MailboxMeta;

mod message;
pub use self::message::{MessageHeader, MessageRecord, MessageRef};

mod name;
pub use self::name::{Name, NameAttribute};

mod capabilities;
pub use self::capabilities::Capabilities;
