use std::borrow::Cow;
use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use imap_proto::types::{AttributeValue, Capability, MailboxDatum, Response, ResponseCode, Status};
use lazy_static::lazy_static;
use log::trace;
use regex::Regex;

use crate::error::{FetchError, ProtocolError, Result};
use crate::types::*;

lazy_static! {
    static ref AUTH_RESP_REGEX: Regex = Regex::new("^\\+ ?(.*)\r\n$").unwrap();
}

const INTERNALDATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// How the server completed a tagged command.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    Ok(Option<String>),
    No(String),
    Bad(String),
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).trim_end().to_string()
}

fn no_explanation() -> String {
    "no explanation given".to_string()
}

/// Classify the tagged line that ends a command.
pub(crate) fn parse_completion(line: &[u8], expected_tag: &str) -> Result<Completion> {
    match imap_proto::parser::parse_response(line) {
        Ok((
            _,
            Response::Done {
                tag,
                status,
                information,
                ..
            },
        )) => {
            if tag.0 != expected_tag {
                return Err(ProtocolError::UnexpectedTag {
                    expected: expected_tag.to_string(),
                    found: tag.0,
                }
                .into());
            }
            let information = information.map(Cow::into_owned);
            match status {
                Status::Ok => Ok(Completion::Ok(information)),
                Status::No => Ok(Completion::No(information.unwrap_or_else(no_explanation))),
                Status::Bad => Ok(Completion::Bad(information.unwrap_or_else(no_explanation))),
                _ => Err(ProtocolError::Unexpected(lossy(line)).into()),
            }
        }
        Ok(_) => Err(ProtocolError::Unexpected(lossy(line)).into()),
        Err(_) => Err(ProtocolError::Unparseable(lossy(line)).into()),
    }
}

/// The explanation of an untagged `BYE`, or `None` if the line is something else.
pub(crate) fn parse_bye(line: &[u8]) -> Option<String> {
    let upper = line.get(..5)?.to_ascii_uppercase();
    if upper != b"* BYE" {
        return None;
    }
    Some(lossy(&line[5..]).trim().to_string())
}

pub(crate) fn parse_authenticate_response(line: &str) -> Result<&str> {
    if let Some(cap) = AUTH_RESP_REGEX.captures_iter(line).next() {
        let data = cap.get(1).map(|x| x.as_str()).unwrap_or("");
        return Ok(data);
    }

    Err(ProtocolError::Unexpected(line.trim_end().to_string()).into())
}

fn unilateral(response: &Response<'_>) {
    trace!("ignoring unsolicited response {:?}", response);
}

// run `map` over every response in `lines`
fn parse_many<F>(mut lines: &[u8], mut map: F) -> Result<()>
where
    F: FnMut(Response<'_>) -> Result<()>,
{
    while !lines.is_empty() {
        match imap_proto::parser::parse_response(lines) {
            Ok((rest, response)) => {
                lines = rest;
                map(response)?;
            }
            Err(nom::Err::Incomplete(_)) => {
                let message = format!("truncated: {}", lossy(lines));
                return Err(ProtocolError::Unparseable(message).into());
            }
            Err(_) => return Err(ProtocolError::Unparseable(lossy(lines)).into()),
        }
    }
    Ok(())
}

pub(crate) fn parse_capabilities(lines: &[u8]) -> Result<Capabilities> {
    let mut caps = HashSet::new();
    parse_many(lines, |response| {
        match response {
            Response::Capabilities(list) => caps.extend(list.iter().map(capability_name)),
            other => unilateral(&other),
        }
        Ok(())
    })?;
    Ok(Capabilities(caps))
}

fn capability_name(capability: &Capability<'_>) -> String {
    #[allow(unreachable_patterns)]
    match capability {
        Capability::Imap4rev1 => "IMAP4REV1".to_string(),
        Capability::Auth(mechanism) => format!("AUTH={}", mechanism.to_ascii_uppercase()),
        Capability::Atom(atom) => atom.to_ascii_uppercase(),
        other => format!("{:?}", other).to_ascii_uppercase(),
    }
}

pub(crate) fn parse_names(lines: &[u8]) -> Result<Vec<Name>> {
    let mut names = Vec::new();
    parse_many(lines, |response| {
        match response {
            Response::MailboxData(MailboxDatum::List {
                name_attributes,
                delimiter,
                name,
            }) => names.push(Name {
                attributes: name_attributes
                    .into_iter()
                    .map(NameAttribute::from)
                    .collect(),
                delimiter: delimiter.map(Cow::into_owned),
                name: name.into_owned(),
            }),
            other => unilateral(&other),
        }
        Ok(())
    })?;
    Ok(names)
}

pub(crate) fn parse_mailbox(name: &str, lines: &[u8]) -> Result<MailboxMeta> {
    let mut mailbox = MailboxMeta::new(name);
    parse_many(lines, |response| {
        match response {
            Response::Data {
                status: Status::Ok,
                code,
                ..
            } => match code {
                Some(ResponseCode::UidValidity(uid)) => mailbox.uid_validity = Some(uid),
                Some(ResponseCode::UidNext(unext)) => mailbox.uid_next = Some(unext),
                _ => {}
            },
            Response::MailboxData(MailboxDatum::Exists(e)) => mailbox.exists = e,
            Response::MailboxData(MailboxDatum::Recent(r)) => mailbox.recent = r,
            Response::MailboxData(MailboxDatum::Flags(flags)) => mailbox
                .flags
                .extend(flags.into_iter().map(|f| Flag::from(f).into_owned())),
            other => unilateral(&other),
        }
        Ok(())
    })?;
    Ok(mailbox)
}

pub(crate) fn parse_identifiers(mailbox: &str, lines: &[u8]) -> Result<Vec<MessageRef>> {
    let mut refs = Vec::new();
    parse_many(lines, |response| {
        match response {
            Response::Fetch(_, attrs) => {
                let mut uid = None;
                let mut size = None;
                for attr in attrs {
                    match attr {
                        AttributeValue::Uid(u) => uid = Some(u),
                        AttributeValue::Rfc822Size(s) => size = Some(s),
                        _ => {}
                    }
                }
                // flag updates for other messages arrive without a UID
                if let Some(uid) = uid {
                    refs.push(MessageRef {
                        mailbox: mailbox.to_string(),
                        uid,
                        size,
                    });
                }
            }
            other => unilateral(&other),
        }
        Ok(())
    })?;
    refs.sort_by_key(|r| r.uid);
    refs.dedup_by_key(|r| r.uid);
    Ok(refs)
}

/// The attributes of one `FETCH` response that a backup keeps.
#[derive(Debug, Default)]
pub(crate) struct FetchedAttributes {
    pub(crate) uid: Option<Uid>,
    pub(crate) flags: Vec<Flag<'static>>,
    pub(crate) internal_date: Option<DateTime<FixedOffset>>,
    pub(crate) body: Option<Vec<u8>>,
}

impl FetchedAttributes {
    fn collect(attrs: Vec<AttributeValue<'_>>) -> Self {
        let mut fetched = FetchedAttributes::default();
        for attr in attrs {
            match attr {
                AttributeValue::Uid(uid) => fetched.uid = Some(uid),
                AttributeValue::Flags(list) => fetched
                    .flags
                    .extend(list.into_iter().map(|f| Flag::from(f).into_owned())),
                AttributeValue::InternalDate(date) => {
                    fetched.internal_date = parse_internal_date(&date)
                }
                AttributeValue::BodySection {
                    data: Some(data), ..
                }
                | AttributeValue::Rfc822(Some(data)) => fetched.body = Some(data.into_owned()),
                _ => {}
            }
        }
        fetched
    }
}

/// The `FETCH` data for `reference` among `lines`, or `Expunged` if the server sent none.
pub(crate) fn parse_fetch(reference: &MessageRef, lines: &[u8]) -> Result<FetchedAttributes> {
    let mut found = None;
    parse_many(lines, |response| {
        match response {
            Response::Fetch(_, attrs)
                if found.is_none()
                    && attrs
                        .iter()
                        .any(|a| matches!(a, AttributeValue::Uid(u) if *u == reference.uid)) =>
            {
                found = Some(FetchedAttributes::collect(attrs));
            }
            other => unilateral(&other),
        }
        Ok(())
    })?;

    found.ok_or_else(|| {
        FetchError::Expunged {
            mailbox: reference.mailbox.clone(),
            uid: reference.uid,
        }
        .into()
    })
}

/// The attributes sent ahead of a message body literal, from the response line as it was
/// read up to that literal. `None` if the start of the line is not a `FETCH` response.
pub(crate) fn parse_body_prefix(prefix: &[u8]) -> Option<FetchedAttributes> {
    let mut line = Vec::with_capacity(prefix.len() + 6);
    line.extend_from_slice(prefix);
    line.extend_from_slice(b"NIL)\r\n");
    match imap_proto::parser::parse_response(&line) {
        Ok((_, Response::Fetch(_, attrs))) => Some(FetchedAttributes::collect(attrs)),
        _ => None,
    }
}

/// Parse an IMAP `date-time` such as `17-Jul-1996 02:44:25 -0700`.
pub(crate) fn parse_internal_date(date: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(date.trim(), INTERNALDATE_FORMAT).ok()
}
