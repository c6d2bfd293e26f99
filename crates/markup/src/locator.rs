//! Boundary location of repeated blocks.
//!
//! A repeated block is declared by two markers: `{d[i].x}` somewhere in the
//! first row and `{d[i+1].x}` at the same place in a second, template-only copy
//! of the row. The text between the two markers therefore ends with the tail of
//! row one and begins with the head of row two. The pivot is the point where
//! the tag balance says row one is finished; from there the exact start of row
//! one and the exact end of row two are found by balancing tags outwards.
//!
//! Markers may sit inside attribute values. Their offsets then point into the
//! middle of a tag, and are moved back to the start of that tag before any
//! balancing happens.

use crate::error::LocateError;
use crate::tags::{TagKind, Unit, enclosing_tag_start, scan_tags, tokenize};
use log::trace;

/// A tag boundary found by [`find_pivot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPos {
    pub tag: String,
    pub pos: usize,
    /// True when the boundary is not an opening tag that must be balanced.
    pub self_closing: bool,
}

impl TagPos {
    fn new(tag: &str, pos: usize, self_closing: bool) -> Self {
        Self { tag: tag.to_string(), pos, self_closing }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    /// End of the first row.
    pub part1_end: TagPos,
    /// Start of the second (template) row.
    pub part2_start: TagPos,
}

impl Pivot {
    fn shifted(mut self, offset: usize) -> Self {
        self.part1_end.pos += offset;
        self.part2_start.pos += offset;
        self
    }
}

/// Exact boundaries of a repeated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repetition {
    pub start_even: usize,
    pub end_even: usize,
    pub start_odd: usize,
    pub end_odd: usize,
}

/// Returns the start of the last balanced unit (tag pair, self-closing tag or
/// text run) that begins before `stop`, walking right to left.
///
/// Inside a text run that contains `stop`, the result is `stop - 1`. Returns 0
/// when an unbalanced opening tag is met first.
pub fn find_opening_tag_position(xml: &str, stop: Option<usize>) -> usize {
    let stop = stop.unwrap_or(xml.len());
    let mut depth: i32 = 0;
    for token in tokenize(xml).iter().rev() {
        match token.unit {
            Unit::Tag(TagKind::Closing) => depth += 1,
            Unit::Tag(TagKind::Opening) => {
                depth -= 1;
                if depth < 0 {
                    return 0;
                }
                if depth == 0 && token.start < stop {
                    return token.start;
                }
            }
            Unit::Tag(TagKind::SelfClosing) => {
                if depth == 0 && token.start < stop {
                    return token.start;
                }
            }
            Unit::Text => {
                if depth == 0 && token.start < stop {
                    if stop <= token.end {
                        return floor_char_boundary(xml, token.start.max(stop - 1));
                    }
                    return token.start;
                }
            }
        }
    }
    0
}

/// Returns the end of the first balanced tag (pair or self-closing) that ends
/// after `start_after`, or `None` when an unmatched closing tag comes first.
pub fn find_closing_tag_position(xml: &str, start_after: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    for tag in scan_tags(xml) {
        match tag.kind {
            TagKind::Opening => depth += 1,
            TagKind::Closing => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                if depth == 0 && tag.end > start_after {
                    return Some(tag.end);
                }
            }
            TagKind::SelfClosing => {
                if depth == 0 && tag.end > start_after {
                    return Some(tag.end);
                }
            }
        }
    }
    None
}

/// Finds where the first row ends and the second row starts inside the text
/// between the two markers of a repeated block.
pub fn find_pivot(xml: &str) -> Option<Pivot> {
    let tags = scan_tags(xml);
    if tags.is_empty() {
        let end = TagPos::new("", xml.len(), true);
        return Some(Pivot { part1_end: end.clone(), part2_start: end });
    }

    let mut depths = Vec::with_capacity(tags.len());
    let mut depth: i32 = 0;
    for tag in &tags {
        match tag.kind {
            TagKind::Opening => depth += 1,
            TagKind::Closing => depth -= 1,
            TagKind::SelfClosing => {}
        }
        depths.push(depth);
    }
    let min = depths.iter().copied().min().unwrap_or(0).min(0);

    if min < 0 {
        // Row one closes more than it opens: the pivot sits after the closing
        // tags that reach the lowest depth.
        let at_min = |k: &usize| tags[*k].kind == TagKind::Closing && depths[*k] == min;
        let first = (0..tags.len()).find(at_min)?;
        let last = (0..tags.len()).rev().find(at_min)?;

        let part1_pos = skip_whitespace(xml, tags[first].end);
        let part1_end = TagPos::new(tags[first].name, part1_pos, true);

        let part2_start = match tags[last + 1..].iter().find(|t| t.kind == TagKind::Opening) {
            Some(tag) => TagPos::new(tag.name, tag.start, false),
            None => {
                let next = tags.get(last + 1)?;
                TagPos::new(next.name, next.start, true)
            }
        };
        return Some(Pivot { part1_end, part2_start });
    }

    let final_depth = depths.last().copied().unwrap_or(0);
    let last_tag = &tags[tags.len() - 1];
    if final_depth == 0 {
        // Text after the last tag still belongs to row one.
        let end = TagPos::new(last_tag.name, xml.len(), true);
        return Some(Pivot { part1_end: end.clone(), part2_start: end });
    }

    // Row two opens tags that are still unclosed at the second marker. It
    // starts at the last tag that rises from depth zero.
    let rise = (0..tags.len())
        .rev()
        .find(|&k| k == 0 || depths[k - 1] == 0)
        .unwrap_or(0);
    let part2_start = TagPos::new(tags[rise].name, tags[rise].start, false);
    let unit = (0..rise).find(|&k| depths[k] == 0)?;
    let part1_end = TagPos::new(tags[unit].name, tags[unit].end, true);
    Some(Pivot { part1_end, part2_start })
}

/// Computes the exact boundaries of a repeated block from its pivot.
///
/// `markers` holds the offsets of every marker of the template. Elements that
/// lie between the two rows and hold no marker are left out of row one.
pub fn find_repetition_position(
    xml: &str,
    pivot: &Pivot,
    rough_start: Option<usize>,
    markers: &[usize],
) -> Result<Repetition, LocateError> {
    let part1_end = pivot.part1_end.pos.min(xml.len());
    let start_even = find_opening_tag_position(&xml[..part1_end], rough_start.map(|r| r + 1));
    let start_odd = pivot.part2_start.pos.max(part1_end).min(xml.len());
    let end_even = gap_end(xml, part1_end, start_odd, markers);
    let mut end_odd = match find_closing_tag_position(&xml[start_odd..], 0) {
        Some(end) => start_odd + end,
        None if pivot.part2_start.self_closing => start_odd,
        None => return Err(LocateError::UnbalancedRepetition { position: start_odd }),
    };

    // Row one may end with text after its last tag. The template copy of that
    // text follows row two and is dropped with it, unless a marker sits there.
    let row = &xml[start_even..end_even];
    if let Some(last) = row.rfind('>') {
        let tail = &row[last + 1..];
        let copy = end_odd..end_odd + tail.len();
        if !tail.is_empty()
            && end_odd > start_odd
            && xml[end_odd..].starts_with(tail)
            && !markers.iter().any(|m| copy.contains(m))
        {
            end_odd = copy.end;
        }
    }
    Ok(Repetition { start_even, end_even, start_odd, end_odd })
}

/// End of row one when `part1_end..start_odd` is not empty.
///
/// Bare text between the rows stays in row one. Otherwise row one stops after
/// the last element of that gap that holds a marker.
fn gap_end(xml: &str, part1_end: usize, start_odd: usize, markers: &[usize]) -> usize {
    let gap = &xml[part1_end..start_odd];
    if scan_tags(gap).is_empty() {
        return start_odd;
    }
    let Some(last) = markers.iter().copied().filter(|&m| m >= part1_end && m < start_odd).max() else {
        trace!("skipping marker-free elements between {part1_end} and {start_odd}");
        return part1_end;
    };
    match find_closing_tag_position(gap, last - part1_end) {
        Some(end) => part1_end + end,
        None => start_odd,
    }
}

/// Locates the repeated block whose first marker is at `rough_start` and whose
/// `+1` marker is at `rough_end`.
///
/// `markers` holds the offsets of every marker of the template.
pub fn locate(
    xml: &str,
    rough_start: usize,
    rough_end: usize,
    markers: &[usize],
) -> Result<Repetition, LocateError> {
    if rough_end < rough_start || rough_end > xml.len() {
        return Err(LocateError::NoPivot { start: rough_start, end: rough_end });
    }
    let tags = scan_tags(xml);
    let rough_start = enclosing_tag_start(&tags, rough_start).unwrap_or(rough_start);
    let rough_end = enclosing_tag_start(&tags, rough_end).unwrap_or(rough_end);
    let pivot = find_pivot(&xml[rough_start..rough_end])
        .ok_or(LocateError::NoPivot { start: rough_start, end: rough_end })?
        .shifted(rough_start);
    trace!(
        "pivot between {} and {}: row one ends at {} <{}>, row two starts at {} <{}>",
        rough_start,
        rough_end,
        pivot.part1_end.pos,
        pivot.part1_end.tag,
        pivot.part2_start.pos,
        pivot.part2_start.tag
    );
    find_repetition_position(xml, &pivot, Some(rough_start), markers)
}

fn skip_whitespace(xml: &str, from: usize) -> usize {
    from + xml[from..]
        .bytes()
        .take_while(|b| b.is_ascii_whitespace())
        .count()
}

fn floor_char_boundary(xml: &str, mut pos: usize) -> usize {
    while pos > 0 && !xml.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
