use std::borrow::Cow;

/// A message flag as reported by `FETCH FLAGS`.
///
/// With the exception of [`Flag::Custom`], these are the system flags pre-defined in [RFC 3501
/// section 2.3.2](https://tools.ietf.org/html/rfc3501#section-2.3.2). The backup records them as
/// they were when the message was retrieved; it never changes them (bodies are fetched with
/// `BODY.PEEK[]`, which leaves `\Seen` alone).
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum Flag<'a> {
    /// Message has been read
    Seen,

    /// Message has been answered
    Answered,

    /// Message is "flagged" for urgent/special attention
    Flagged,

    /// Message is "deleted" for removal by later EXPUNGE
    Deleted,

    /// Message has not completed composition (marked as a draft).
    Draft,

    /// Message is "recently" arrived in this mailbox.
    Recent,

    /// The special `\*` entry of `PERMANENTFLAGS`.
    MayCreate,

    /// A non-standard user- or server-defined flag.
    Custom(Cow<'a, str>),
}

impl Flag<'static> {
    fn system(s: &str) -> Option<Self> {
        match s {
            "\\Seen" => Some(Flag::Seen),
            "\\Answered" => Some(Flag::Answered),
            "\\Flagged" => Some(Flag::Flagged),
            "\\Deleted" => Some(Flag::Deleted),
            "\\Draft" => Some(Flag::Draft),
            "\\Recent" => Some(Flag::Recent),
            "\\*" => Some(Flag::MayCreate),
            _ => None,
        }
    }
}

impl<'a> Flag<'a> {
    /// Get an owned version of the [`Flag`].
    pub fn into_owned(self) -> Flag<'static> {
        match self {
            Flag::Custom(cow) => Flag::Custom(Cow::Owned(cow.into_owned())),
            Flag::Seen => Flag::Seen,
            Flag::Answered => Flag::Answered,
            Flag::Flagged => Flag::Flagged,
            Flag::Deleted => Flag::Deleted,
            Flag::Draft => Flag::Draft,
            Flag::Recent => Flag::Recent,
            Flag::MayCreate => Flag::MayCreate,
        }
    }
}

impl<'a> std::fmt::Display for Flag<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::MayCreate => write!(f, "\\*"),
            Flag::Custom(ref s) => write!(f, "{}", s),
        }
    }
}

impl<'a> From<String> for Flag<'a> {
    fn from(s: String) -> Self {
        match Flag::system(&s) {
            Some(f) => f,
            None => Flag::Custom(Cow::Owned(s)),
        }
    }
}

impl<'a> From<&'a str> for Flag<'a> {
    fn from(s: &'a str) -> Self {
        match Flag::system(s) {
            Some(f) => f,
            None => Flag::Custom(Cow::Borrowed(s)),
        }
    }
}

impl<'a> From<Cow<'a, str>> for Flag<'a> {
    fn from(s: Cow<'a, str>) -> Self {
        match Flag::system(&s) {
            Some(f) => f,
            None => Flag::Custom(s),
        }
    }
}
