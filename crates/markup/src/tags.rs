//! Tag scanner used for balance matching.
//!
//! Markup events come from `quick_xml`, with offsets taken from the reader
//! position. Only where tags start and end matters, and whether they open,
//! close or self-close. The scanner never checks that names match, since the
//! text it sees is usually a fragment.

use log::trace;
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Opening,
    Closing,
    SelfClosing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    pub name: &'a str,
    pub kind: TagKind,
    /// Offset of `<`.
    pub start: usize,
    /// Offset just past `>`.
    pub end: usize,
}

/// A tag or a non-empty run of text between tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unit {
    Tag(TagKind),
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub unit: Unit,
    pub start: usize,
    pub end: usize,
}

/// Scans every complete tag of `xml`, left to right.
///
/// Comments, processing instructions, declarations and CDATA sections count
/// as self-closing. Markup the reader cannot make sense of ends the scan.
pub fn scan_tags(xml: &str) -> Vec<Tag<'_>> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.allow_dangling_amp = true;

    let mut tags = Vec::new();
    loop {
        let start = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                trace!("tag scan stopped at {start}: {e}");
                break;
            }
        };
        let end = reader.buffer_position() as usize;
        let (name, kind) = match event {
            XmlEvent::Start(e) => {
                (element_name(xml, start + 1, e.name().as_ref().len()), TagKind::Opening)
            }
            XmlEvent::Empty(e) => {
                (element_name(xml, start + 1, e.name().as_ref().len()), TagKind::SelfClosing)
            }
            XmlEvent::End(e) => {
                (element_name(xml, start + 2, e.name().as_ref().len()), TagKind::Closing)
            }
            XmlEvent::Comment(_) => ("!--", TagKind::SelfClosing),
            XmlEvent::CData(_) => ("![CDATA[", TagKind::SelfClosing),
            XmlEvent::DocType(_) => ("!DOCTYPE", TagKind::SelfClosing),
            XmlEvent::Decl(_) | XmlEvent::PI(_) => ("?", TagKind::SelfClosing),
            XmlEvent::Eof => break,
            _ => continue,
        };
        tags.push(Tag { name, kind, start, end });
    }
    tags
}

fn element_name(xml: &str, from: usize, len: usize) -> &str {
    xml.get(from..from + len).unwrap_or("")
}

/// Tags interleaved with the text runs between them.
pub(crate) fn tokenize(xml: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    for tag in scan_tags(xml) {
        if tag.start > cursor {
            tokens.push(Token { unit: Unit::Text, start: cursor, end: tag.start });
        }
        tokens.push(Token { unit: Unit::Tag(tag.kind), start: tag.start, end: tag.end });
        cursor = tag.end;
    }
    if cursor < xml.len() {
        tokens.push(Token { unit: Unit::Text, start: cursor, end: xml.len() });
    }
    tokens
}

/// Start of the tag whose markup strictly contains `pos`, such as the opening
/// tag of an element whose attribute value held a marker.
pub(crate) fn enclosing_tag_start(tags: &[Tag<'_>], pos: usize) -> Option<usize> {
    tags.iter().find(|t| t.start < pos && pos < t.end).map(|t| t.start)
}
