//! Small helpers for picking values out of UPnP XML documents
//!
//! Paths are dot-separated element names. Each segment is one of:
//!
//! - `*:name`, matching `name` with any namespace prefix (or none);
//! - `p:name`, matching `name` with exactly the prefix `p`;
//! - `name`, matching `name` with no prefix at all.
//!
//! Where several siblings match a segment, the first one wins.
use std::net::IpAddr;
use std::str::FromStr;
use xmltree::{Element, XMLNode};

enum Segment<'a> {
    Any(&'a str),
    Prefixed(&'a str, &'a str),
    Bare(&'a str),
}

impl<'a> Segment<'a> {
    fn new(s: &'a str) -> Self {
        match s.split_once(':') {
            Some(("*", name)) => Segment::Any(name),
            Some((prefix, name)) => Segment::Prefixed(prefix, name),
            None => Segment::Bare(s),
        }
    }

    fn matches(&self, e: &Element) -> bool {
        match *self {
            Segment::Any(name) => e.name == name,
            Segment::Prefixed(prefix, name) => {
                e.name == name && e.prefix.as_deref() == Some(prefix)
            }
            Segment::Bare(name) => e.name == name && e.prefix.is_none(),
        }
    }
}

/// Parse a complete XML document, returning its root element
#[must_use]
pub fn parse(text: &str) -> Option<Element> {
    Element::parse(text.as_bytes()).ok()
}

/// All the child elements of `e`, skipping text and comments
pub fn elements(e: &Element) -> impl Iterator<Item = &Element> {
    e.children.iter().filter_map(XMLNode::as_element)
}

/// All the child elements of `e` matching a single path segment
pub fn matching<'a, 's>(
    e: &'a Element,
    segment: &'s str,
) -> impl Iterator<Item = &'a Element> + 's
where
    'a: 's,
{
    let segment = Segment::new(segment);
    elements(e).filter(move |c| segment.matches(c))
}

/// Find an element by path, where the first segment names `root` itself
///
/// ```
/// let doc = cotton_igd::xml::parse(
///     "<s:Envelope xmlns:s=\"urn:x\"><s:Body><a>1</a></s:Body></s:Envelope>",
/// ).unwrap();
/// assert!(cotton_igd::xml::find(&doc, "*:Envelope.*:Body.a").is_some());
/// assert!(cotton_igd::xml::find(&doc, "Envelope.Body.a").is_none());
/// ```
#[must_use]
pub fn find<'a>(root: &'a Element, path: &str) -> Option<&'a Element> {
    let mut segments = path.split('.');
    if !Segment::new(segments.next()?).matches(root) {
        return None;
    }
    segments.try_fold(root, |e, s| matching(e, s).next())
}

/// Find a descendant of `e` by path, relative to `e`
#[must_use]
pub fn child<'a>(e: &'a Element, path: &str) -> Option<&'a Element> {
    path.split('.').try_fold(e, |e, s| matching(e, s).next())
}

/// The trimmed text content of a descendant
///
/// An element which exists but is empty gives `Some("")`.
#[must_use]
pub fn text(e: &Element, path: &str) -> Option<String> {
    let found = child(e, path)?;
    Some(
        found
            .get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default(),
    )
}

/// A descendant's text, parsed as a number (or anything else `FromStr`)
#[must_use]
pub fn number<T: FromStr>(e: &Element, path: &str) -> Option<T> {
    text(e, path)?.parse().ok()
}

/// A descendant's text, parsed as an IP address
#[must_use]
pub fn address(e: &Element, path: &str) -> Option<IpAddr> {
    number(e, path)
}

/// A descendant's text, parsed as a UPnP boolean
///
/// UPnP allows "1", "true" and "yes" (and their opposites).
#[must_use]
pub fn flag(e: &Element, path: &str) -> Option<bool> {
    match text(e, path)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
