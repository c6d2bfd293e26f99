//! Sorts render fragments by position and joins them into the final text.
//!
//! Rows whose values were all filtered out are removed here: each row level
//! remembers where its row started in the output and whether any fragment of
//! the row was shown, and the output is cut back when the row closes empty.
//! Row counters left by the `count` formatter are numbered here too, since
//! only the sorted order tells which row comes first.

use log::trace;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use stencil_template_core::find_counter;
use stencil_types::{LiteralTable, OutputFragment};

#[derive(Debug, Clone, Copy, Default)]
struct RowInfo {
    /// Output length when the row opened.
    xml_pos: usize,
    row_show: bool,
}

/// `Some(true)` first, then fragments without a value, then hidden ones.
fn show_rank(row_show: Option<bool>) -> u8 {
    match row_show {
        Some(true) => 0,
        None => 1,
        Some(false) => 2,
    }
}

/// Total order of fragments, comparing at most `compare_depth` position components.
pub fn compare_fragments(a: &OutputFragment, b: &OutputFragment, compare_depth: usize) -> Ordering {
    for k in 0..compare_depth {
        match (a.position.get(k), b.position.get(k)) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(y) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
    show_rank(a.row_show)
        .cmp(&show_rank(b.row_show))
        .then_with(|| a.position.len().cmp(&b.position.len()))
}

/// Sorts `fragments` in place. The sort is stable.
pub fn sort_fragments(fragments: &mut [OutputFragment], compare_depth: usize) {
    fragments.sort_by(|a, b| compare_fragments(a, b, compare_depth));
}

/// Sorts and concatenates fragments, resolving static text through `literals`.
pub fn assemble(mut fragments: Vec<OutputFragment>, literals: &LiteralTable, compare_depth: usize) -> String {
    sort_fragments(&mut fragments, compare_depth);

    let mut out = String::new();
    let mut rows: HashMap<isize, RowInfo> = HashMap::new();
    let mut level: isize = 0;
    let mut prev_depth = 0;
    let mut hide_block: i32 = 0;
    let mut counters: HashMap<i64, i64> = HashMap::new();
    let mut prev: Option<&OutputFragment> = None;

    for fragment in &fragments {
        // Fragments sharing a position are kept once, except right after a row start.
        let keep = match prev {
            None => true,
            Some(p) => (p.row_start && !fragment.row_start) || p.position != fragment.position,
        };
        if !keep {
            continue;
        }
        prev = Some(fragment);

        let prev_hide = hide_block;
        if let Some(hide) = fragment.hide {
            hide_block = (hide_block + (i32::from(hide_block != 0) | hide)).max(0);
        }
        if hide_block > 0 && prev_hide > 0 {
            continue;
        }

        let mut piece = String::new();
        if !(hide_block == 0 && prev_hide > 0) {
            if let Some(before) = fragment.before {
                piece.push_str(literals.get(before));
            }
        }
        if !(hide_block > 0 && prev_hide == 0) {
            piece.push_str(&number_rows(&fragment.text, fragment.row_show, &mut counters));
            if let Some(after) = fragment.after {
                piece.push_str(literals.get(after));
            }
        }
        out.push_str(&piece);

        let depth = fragment.position.len();
        match prev_depth.cmp(&depth) {
            Ordering::Less => level += 1,
            Ordering::Greater => level -= 1,
            Ordering::Equal => {}
        }
        prev_depth = depth;

        let info = rows.entry(level).or_default();
        info.row_show |= fragment.row_show == Some(true);
        if fragment.row_start {
            info.xml_pos = out.len() - piece.len();
        } else if fragment.row_end {
            let shown = info.row_show;
            if !shown {
                trace!("dropping empty row at level {level}");
                out.truncate(info.xml_pos);
            }
            info.row_show = false;
            if level > 0 {
                rows.entry(level - 1).or_default().row_show |= shown;
            }
        }
    }
    out
}

/// Replaces the first counter token of a shown value with the next number of
/// its counter.
fn number_rows<'t>(
    text: &'t str,
    row_show: Option<bool>,
    counters: &mut HashMap<i64, i64>,
) -> Cow<'t, str> {
    let Some((range, id, start)) = find_counter(text).filter(|_| row_show == Some(true)) else {
        return Cow::Borrowed(text);
    };
    let next = counters.entry(id).or_insert(start);
    let number = *next;
    *next += 1;
    Cow::Owned(format!("{}{number}{}", &text[..range.start], &text[range.end..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_types::PosKey;

    fn pos(keys: &[f64]) -> Vec<PosKey> {
        keys.iter().map(|&k| PosKey::Number(k)).collect()
    }

    fn fragment(keys: &[f64], text: &str) -> OutputFragment {
        OutputFragment {
            position: pos(keys),
            text: text.to_string(),
            row_show: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_sorts_by_position() {
        let literals = LiteralTable::new();
        let fragments = vec![fragment(&[2.0], "b"), fragment(&[0.0], "a"), fragment(&[3.0], "c")];
        assert_eq!(assemble(fragments, &literals, 20), "abc");
    }

    #[test]
    fn test_shorter_position_first() {
        let a = fragment(&[1.0], "");
        let b = fragment(&[1.0, 0.0], "");
        assert_eq!(compare_fragments(&a, &b, 20), Ordering::Less);
        assert_eq!(compare_fragments(&b, &a, 20), Ordering::Greater);
    }

    #[test]
    fn test_shown_value_sorts_before_hidden_one() {
        let mut hidden = fragment(&[1.0], "");
        hidden.row_show = Some(false);
        let shown = fragment(&[1.0], "x");
        assert_eq!(compare_fragments(&shown, &hidden, 20), Ordering::Less);
        let mut plain = fragment(&[1.0], "");
        plain.row_show = None;
        assert_eq!(compare_fragments(&shown, &plain, 20), Ordering::Less);
        assert_eq!(compare_fragments(&plain, &hidden, 20), Ordering::Less);
    }

    #[test]
    fn test_compare_depth_limits_components() {
        let a = fragment(&[1.0, 5.0], "");
        let b = fragment(&[1.0, 2.0], "");
        assert_eq!(compare_fragments(&a, &b, 1), Ordering::Equal);
        assert_eq!(compare_fragments(&a, &b, 2), Ordering::Greater);
    }

    #[test]
    fn test_row_counters_follow_sorted_order() {
        let literals = LiteralTable::new();
        let fragments = vec![
            fragment(&[2.0], "__COUNT_6_1__;"),
            fragment(&[0.0], "__COUNT_6_1__;"),
            fragment(&[1.0], "__COUNT_9_10__;"),
            fragment(&[3.0], "__COUNT_9_10__."),
        ];
        assert_eq!(assemble(fragments, &literals, 20), "1;10;2;11.");
    }

    #[test]
    fn test_duplicate_position_emitted_once() {
        let literals = LiteralTable::new();
        let fragments = vec![fragment(&[1.0], "x"), fragment(&[1.0], "y")];
        assert_eq!(assemble(fragments, &literals, 20), "x");
    }

    #[test]
    fn test_empty_row_is_removed() {
        let mut literals = LiteralTable::new();
        let open = literals.intern("<r>");
        let close = literals.intern("</r>");
        let mut fragments = Vec::new();
        for (row, shown) in [(0.0, true), (1.0, false)] {
            let mut start = fragment(&[0.0, row, 0.0], "");
            start.row_show = None;
            start.row_start = true;
            start.after = Some(open);
            let mut value = fragment(&[0.0, row, 1.0], if shown { "v" } else { "" });
            value.row_show = Some(shown);
            let mut end = fragment(&[0.0, row, 2.0], "");
            end.row_show = None;
            end.row_end = true;
            end.before = Some(close);
            fragments.extend([start, value, end]);
        }
        assert_eq!(assemble(fragments, &literals, 20), "<r>v</r>");
    }

    #[test]
    fn test_hide_block_skips_enclosed_fragments() {
        let literals = LiteralTable::new();
        let mut open = fragment(&[1.0], "A");
        open.hide = Some(1);
        let inner = fragment(&[2.0], "B");
        let mut close = fragment(&[3.0], "C");
        close.hide = Some(-1);
        let after = fragment(&[4.0], "D");
        // The opening value is swallowed, the closing one is kept.
        assert_eq!(assemble(vec![open, inner, close, after], &literals, 20), "CD");
    }
}
