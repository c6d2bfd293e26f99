//! Extraction of `{d...}` / `{c...}` markers from template text.
//!
//! Word processors routinely split a marker across formatting runs
//! (`{d.na</w:t><w:t>me}`), so tags found inside a marker are kept, in order,
//! at the place the marker occupied. The marker itself is removed and
//! remembered with its offset in the cleaned text.

use log::debug;

/// Prefix that makes `d` and `c` attributes of one synthetic root object.
pub const ROOT_PREFIX: &str = "_root.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Marker text, `_root.` prefixed, whitespace inside kept.
    pub name: String,
    /// Byte offset in the cleaned text.
    pub pos: usize,
}

/// Returns the template without markers, and the markers in document order.
pub fn find_markers(xml: &str) -> (String, Vec<Marker>) {
    let mut cleaned = String::with_capacity(xml.len());
    let mut markers = Vec::new();
    let mut cursor = 0;
    let mut search = 0;

    while let Some(rel) = xml[search..].find('{') {
        let open = search + rel;
        let Some(close_rel) = xml[open + 1..].find(['{', '}']) else {
            break;
        };
        let close = open + 1 + close_rel;
        if xml.as_bytes()[close] == b'{' {
            // The innermost brace opens the marker: `{toto {d.x}`.
            search = close;
            continue;
        }
        let (name, tags) = split_marker_content(&xml[open + 1..close]);
        search = close + 1;
        if !is_data_marker(&name) {
            continue;
        }
        cleaned.push_str(&xml[cursor..open]);
        markers.push(Marker {
            name: format!("{ROOT_PREFIX}{name}"),
            pos: cleaned.len(),
        });
        cleaned.push_str(&tags);
        cursor = close + 1;
    }
    cleaned.push_str(&xml[cursor..]);
    debug!("found {} markers", markers.len());
    (cleaned, markers)
}

/// Splits raw marker content into the marker text and the tags it contains.
///
/// A `<` opens a tag only when a tag name follows it and a `>` closes it
/// before the end of the marker, so `{d[i, n<3].n}` keeps its comparison.
fn split_marker_content(raw: &str) -> (String, String) {
    let mut name = String::with_capacity(raw.len());
    let mut tags = String::new();
    let mut in_tag = false;
    for (i, c) in raw.char_indices() {
        match c {
            '<' if !in_tag && opens_tag(&raw[i + 1..]) => {
                in_tag = true;
                tags.push(c);
            }
            '>' if in_tag => {
                in_tag = false;
                tags.push(c);
            }
            _ if in_tag => tags.push(c),
            '\n' | '\r' | '\t' => {}
            _ => name.push(c),
        }
    }
    (name.trim().to_string(), tags)
}

fn opens_tag(rest: &str) -> bool {
    let starts_name = rest
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || matches!(c, '_' | '/' | '?' | '!'));
    starts_name && rest.contains('>')
}

fn is_data_marker(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some('d') | Some('c') => {}
        _ => return false,
    }
    match chars.next() {
        None => true,
        Some(c) => c == '.' || c == '[' || c == ':' || c.is_whitespace(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(name: &str, pos: usize) -> Marker {
        Marker { name: name.to_string(), pos }
    }

    #[test]
    fn test_find_single_marker() {
        let (xml, markers) = find_markers("<div>{d.title}</div>");
        assert_eq!(xml, "<div></div>");
        assert_eq!(markers, vec![marker("_root.d.title", 5)]);
    }

    #[test]
    fn test_tags_inside_marker_are_kept() {
        let (xml, markers) = find_markers("<xmlstart>{d.me<interxml>n<bullshit>u}</xmlend>");
        assert_eq!(xml, "<xmlstart><interxml><bullshit></xmlend>");
        assert_eq!(markers, vec![marker("_root.d.menu", 10)]);
    }

    #[test]
    fn test_non_data_braces_are_text() {
        let (xml, markers) = find_markers("<xml>{toto {d.toto} {date} {</xml>");
        assert_eq!(xml, "<xml>{toto  {date} {</xml>");
        assert_eq!(markers, vec![marker("_root.d.toto", 11)]);
    }

    #[test]
    fn test_positions_follow_cleaned_text() {
        let (xml, markers) =
            find_markers("<t_row> {d[i].brand} </t_row><t_row> {d[i+1].brand} </t_row>");
        assert_eq!(xml, "<t_row>  </t_row><t_row>  </t_row>");
        assert_eq!(
            markers,
            vec![marker("_root.d[i].brand", 8), marker("_root.d[i+1].brand", 25)]
        );
    }

    #[test]
    fn test_less_than_inside_marker_is_text() {
        let (xml, markers) = find_markers("<r>{d[i, n<3].n}</r><r>{d[i+1, n < 3].n}</r>");
        assert_eq!(xml, "<r></r><r></r>");
        assert_eq!(
            markers,
            vec![marker("_root.d[i, n<3].n", 3), marker("_root.d[i+1, n < 3].n", 10)]
        );

        let (xml, markers) = find_markers("{d[i, n<3].n</w:t><w:t>}");
        assert_eq!(xml, "</w:t><w:t>");
        assert_eq!(markers, vec![marker("_root.d[i, n<3].n", 0)]);
    }

    #[test]
    fn test_complement_and_formatters() {
        let (_, markers) = find_markers("{c.now}{d:fmt}{d\n.x}");
        let names: Vec<_> = markers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["_root.c.now", "_root.d:fmt", "_root.d.x"]);
    }
}
