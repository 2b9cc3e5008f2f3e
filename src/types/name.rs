use std::borrow::Cow;

/// A name that matches a `LIST` command: one line of the server's mailbox listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    pub(crate) attributes: Vec<NameAttribute>,
    pub(crate) delimiter: Option<String>,
    pub(crate) name: String,
}

/// An attribute set for an IMAP name.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum NameAttribute {
    /// It is not possible for any child levels of hierarchy to exist
    /// under this name; no child levels exist now and none can be
    /// created in the future.
    NoInferiors,

    /// It is not possible to use this name as a selectable mailbox.
    NoSelect,

    /// The name does not refer to an existing mailbox (RFC 5258). Implies `NoSelect`.
    NonExistent,

    /// The mailbox has been marked "interesting" by the server; the
    /// mailbox probably contains messages that have been added since
    /// the last time the mailbox was selected.
    Marked,

    /// The mailbox does not contain any additional messages since the
    /// last time the mailbox was selected.
    Unmarked,

    /// A non-standard user- or server-defined name attribute.
    Custom(String),
}

impl NameAttribute {
    fn system(s: &str) -> Option<Self> {
        // attribute names are case-insensitive and servers disagree on spelling
        match s.to_ascii_lowercase().as_str() {
            "\\noinferiors" => Some(NameAttribute::NoInferiors),
            "\\noselect" => Some(NameAttribute::NoSelect),
            "\\nonexistent" => Some(NameAttribute::NonExistent),
            "\\marked" => Some(NameAttribute::Marked),
            "\\unmarked" => Some(NameAttribute::Unmarked),
            _ => None,
        }
    }
}

impl<'a> From<Cow<'a, str>> for NameAttribute {
    fn from(s: Cow<'a, str>) -> Self {
        match NameAttribute::system(&s) {
            Some(a) => a,
            None => NameAttribute::Custom(s.into_owned()),
        }
    }
}

impl From<&str> for NameAttribute {
    fn from(s: &str) -> Self {
        NameAttribute::from(Cow::Borrowed(s))
    }
}

impl<'a> From<imap_proto::NameAttribute<'a>> for NameAttribute {
    fn from(attribute: imap_proto::NameAttribute<'a>) -> Self {
        use imap_proto::NameAttribute as Parsed;
        match attribute {
            Parsed::NoInferiors => NameAttribute::NoInferiors,
            Parsed::NoSelect => NameAttribute::NoSelect,
            Parsed::Marked => NameAttribute::Marked,
            Parsed::Unmarked => NameAttribute::Unmarked,
            Parsed::Extension(s) => NameAttribute::from(s),
            // special-use attributes (RFC 6154) do not change how a mailbox is backed up
            Parsed::All => NameAttribute::Custom("\\All".into()),
            Parsed::Archive => NameAttribute::Custom("\\Archive".into()),
            Parsed::Drafts => NameAttribute::Custom("\\Drafts".into()),
            Parsed::Flagged => NameAttribute::Custom("\\Flagged".into()),
            Parsed::Junk => NameAttribute::Custom("\\Junk".into()),
            Parsed::Sent => NameAttribute::Custom("\\Sent".into()),
            Parsed::Trash => NameAttribute::Custom("\\Trash".into()),
            other => NameAttribute::Custom(format!("{:?}", other)),
        }
    }
}

impl Name {
    /// Build a listing entry by hand.
    pub fn new<N: Into<String>>(
        name: N,
        delimiter: Option<&str>,
        attributes: Vec<NameAttribute>,
    ) -> Self {
        Name {
            attributes,
            delimiter: delimiter.map(String::from),
            name: name.into(),
        }
    }

    /// Attributes of this name.
    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes[..]
    }

    /// The hierarchy delimiter is a character used to delimit levels of hierarchy in a mailbox
    /// name. `None` means that no hierarchy exists; the name is a "flat" name.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// The full mailbox name, as it has to be passed back to `SELECT`/`EXAMINE`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name can be selected, i.e. neither `\Noselect` nor `\NonExistent`.
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, NameAttribute::NoSelect | NameAttribute::NonExistent))
    }
}
