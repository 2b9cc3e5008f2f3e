use std::fmt;

use super::{Flag, Uid};

/// Meta-information about a mailbox, as returned by `SELECT` or `EXAMINE`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MailboxMeta {
    /// The mailbox name that was opened.
    pub name: String,

    /// Defined flags in the mailbox.
    pub flags: Vec<Flag<'static>>,

    /// The number of messages in the mailbox.
    pub exists: u32,

    /// The number of messages with the \Recent flag set.
    pub recent: u32,

    /// The next unique identifier value. If `None`, no `UIDNEXT` value was provided.
    pub uid_next: Option<Uid>,

    /// The unique identifier validity value. If `None`, no `UIDVALIDITY` value was provided.
    pub uid_validity: Option<u32>,
}

impl MailboxMeta {
    /// An empty description of `name`, filled in while the `EXAMINE` response is parsed.
    pub fn new<N: Into<String>>(name: N) -> Self {
        MailboxMeta {
            name: name.into(),
            ..MailboxMeta::default()
        }
    }

    /// Whether the mailbox holds no messages at all.
    pub fn is_empty(&self) -> bool {
        self.exists == 0
    }
}

impl fmt::Display for MailboxMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: exists: {}, recent: {}, uid_next: {:?}, uid_validity: {:?}",
            self.name, self.exists, self.recent, self.uid_next, self.uid_validity
        )
    }
}
