//! Turning a `LIST` response into an ordered walk over the mailbox hierarchy.
//!
//! Servers list mailboxes in whatever order they like, may omit parents that only exist as
//! part of a child's name, and sometimes report the same name twice. [`MailboxTree`] irons all
//! of that out, and [`enumerate`] walks the result depth-first with children sorted by name,
//! so the same set of mailboxes always comes out in the same order.

use std::borrow::Cow;
use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::types::Name;

const INBOX: &str = "INBOX";

lazy_static! {
    static ref UNSAFE_PATH_CHARS: Regex = Regex::new(r"[%/\\\p{Cc}]").unwrap();
}

/// One mailbox in the hierarchy, or a container implied by its children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxNode {
    name: String,
    segments: Vec<String>,
    delimiter: Option<String>,
    selectable: bool,
    listed: bool,
    children: BTreeMap<String, MailboxNode>,
}

impl MailboxNode {
    fn container(segments: Vec<String>, delimiter: Option<&str>) -> Self {
        let name = match delimiter {
            Some(d) => segments.join(d),
            None => segments.concat(),
        };
        MailboxNode {
            name,
            segments,
            delimiter: delimiter.map(String::from),
            selectable: false,
            listed: false,
            children: BTreeMap::new(),
        }
    }

    /// The name to pass to `EXAMINE`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hierarchy levels leading to this mailbox, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The hierarchy delimiter the server reported for this name.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// Whether the mailbox can be opened. Containers that were never listed are not.
    pub fn is_selectable(&self) -> bool {
        self.selectable
    }

    /// Whether the server listed this name itself rather than only as part of a child.
    pub fn is_listed(&self) -> bool {
        self.listed
    }

    /// Direct children, ordered by segment.
    pub fn children(&self) -> impl Iterator<Item = &MailboxNode> {
        self.children.values()
    }

    /// Where the mailbox's entries live inside the archive.
    pub fn archive_path(&self) -> String {
        archive_path(&self.segments)
    }
}

/// The mailbox hierarchy of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxTree {
    roots: BTreeMap<String, MailboxNode>,
}

impl MailboxTree {
    /// Build the tree from a `LIST` response.
    pub fn from_names(names: &[Name]) -> Self {
        let mut tree = MailboxTree::default();
        for name in names {
            tree.insert(name);
        }
        tree
    }

    fn insert(&mut self, listed: &Name) {
        let delimiter = listed.delimiter().filter(|d| !d.is_empty());
        let segments = split_name(listed.name(), delimiter);

        let mut level = &mut self.roots;
        for depth in 1..segments.len() {
            let segment = &segments[depth - 1];
            let parent = level.entry(segment.clone()).or_insert_with(|| {
                MailboxNode::container(segments[..depth].to_vec(), delimiter)
            });
            level = &mut parent.children;
        }

        let leaf = match segments.last() {
            Some(leaf) => leaf.clone(),
            None => return,
        };
        let node = level
            .entry(leaf)
            .or_insert_with(|| MailboxNode::container(segments.clone(), delimiter));
        if !node.listed {
            node.name = normalize_inbox(listed.name(), &segments);
            node.listed = true;
        }
        node.selectable |= listed.is_selectable();
    }

    /// Top-level mailboxes, ordered by name.
    pub fn roots(&self) -> impl DoubleEndedIterator<Item = &MailboxNode> {
        self.roots.values()
    }

    /// Whether the account has no mailboxes at all.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn split_name(name: &str, delimiter: Option<&str>) -> Vec<String> {
    let mut segments: Vec<String> = match delimiter {
        Some(d) => name.split(d).map(String::from).collect(),
        None => vec![name.to_string()],
    };
    // "Archive/" names the same mailbox as "Archive"
    if segments.len() > 1 && segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    if let Some(first) = segments.first_mut() {
        if first.eq_ignore_ascii_case(INBOX) {
            *first = INBOX.to_string();
        }
    }
    segments
}

fn normalize_inbox(name: &str, segments: &[String]) -> String {
    if segments.len() == 1 && name.eq_ignore_ascii_case(INBOX) {
        INBOX.to_string()
    } else {
        name.to_string()
    }
}

/// Flatten the tree into the order mailboxes are backed up in: depth-first, parents before
/// their children, siblings sorted by name.
///
/// Containers that cannot be selected are included so the caller can record them.
pub fn enumerate(tree: &MailboxTree) -> Vec<&MailboxNode> {
    let mut out = Vec::new();
    let mut stack: Vec<&MailboxNode> = tree.roots().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.values().rev());
    }
    out
}

/// Make a single hierarchy level safe to use as a path component inside the archive.
///
/// `%`, path separators and control characters are percent-encoded byte by byte, so two
/// different segments never share a component. `.` and `..` have their dots encoded and the
/// empty segment becomes a lone `%`, which no encoded segment can produce.
pub fn sanitize_segment(segment: &str) -> Cow<'_, str> {
    match segment {
        "" => return Cow::Borrowed("%"),
        "." => return Cow::Borrowed("%2E"),
        ".." => return Cow::Borrowed("%2E%2E"),
        _ => {}
    }
    UNSAFE_PATH_CHARS.replace_all(segment, |caps: &Captures<'_>| {
        caps[0]
            .bytes()
            .map(|b| format!("%{:02X}", b))
            .collect::<String>()
    })
}

/// Join sanitized segments into the archive path of a mailbox.
pub fn archive_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| sanitize_segment(s.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}
