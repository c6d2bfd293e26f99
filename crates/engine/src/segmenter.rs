//! Slicing of the cleaned template between access points.
//!
//! Every array gets its exact boundaries from the locator and two synthetic
//! access points (row start, row end). All access points are then sorted by
//! offset and the text between consecutive ones is attached as `before` or
//! `after` text. The second, template-only copy of each row (the odd zone) is
//! skipped over: access points found there are dropped, and access points
//! of unrelated objects found inside a row are moved into the row's array.

use crate::error::CompileError;
use log::debug;
use std::cmp::Ordering;
use std::collections::HashMap;
use stencil_markup::locate;
use stencil_types::{AccessPoint, ArrayRole, Descriptor, Span};

/// Template text outside every access point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticText {
    pub before: String,
    pub after: String,
}

/// `(node index, access point index)`
type PartRef = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relocation {
    MoveTo(usize),
    Delete,
}

/// Segments `xml` and enriches `descriptor` in place.
pub fn segment(xml: &str, descriptor: &mut Descriptor) -> Result<StaticText, CompileError> {
    locate_arrays(xml, descriptor)?;

    let mut refs: Vec<PartRef> = descriptor
        .iter()
        .enumerate()
        .flat_map(|(n, node)| (0..node.xml_parts.len()).map(move |p| (n, p)))
        .collect();
    {
        let view: &Descriptor = descriptor;
        refs.sort_by(|&a, &b| compare_parts(part(view, a), part(view, b)));
    }

    let mut text = StaticText::default();
    if refs.is_empty() {
        text.before = xml.to_string();
        return Ok(text);
    }

    let mut relocations: HashMap<PartRef, Relocation> = HashMap::new();
    let mut prev_pos = 0;
    let mut prev: Option<PartRef> = None;
    let mut array_depth = 0usize;
    let mut visiting: Vec<usize> = Vec::new();
    let mut last_visited: Option<Span> = None;

    for (i, &current) in refs.iter().enumerate() {
        let pos = part(descriptor, current).position;
        let role = part(descriptor, current).role;
        let Some(obj) = descriptor.index_of(&part(descriptor, current).object) else {
            return Err(CompileError::Program {
                reason: format!("access point bound to unknown node \"{}\"", part(descriptor, current).object),
                listing: String::new(),
            });
        };

        if i == 0 {
            text.before = slice(xml, prev_pos, pos).to_string();
        }
        if let Some(p) = prev.filter(|&p| part(descriptor, p).role == ArrayRole::Start) {
            array_depth += 1;
            let after = slice(xml, prev_pos, pos).to_string();
            let started = descriptor.index_of(&part(descriptor, p).object);
            let prev_part = part_mut(descriptor, p);
            prev_part.after = after;
            prev_part.depth = array_depth;
            if let Some(started) = started {
                visiting.push(started);
                last_visited = descriptor.node(started).span;
            }
        }
        part_mut(descriptor, current).depth = array_depth;
        if role == ArrayRole::End {
            descriptor.node_mut(obj).depth = Some(array_depth);
            array_depth = array_depth.saturating_sub(1);
            part_mut(descriptor, current).before = slice(xml, prev_pos, pos).to_string();
        }

        for &array in visiting.iter().rev() {
            let Some(span) = descriptor.node(array).span else {
                continue;
            };
            let array_path = &descriptor.node(array).path;
            let inside_row = pos > span.start && span.end.is_some_and(|end| pos < end);
            if inside_row && !descriptor.node(obj).parents.contains(array_path) && array != obj {
                relocations.insert(current, Relocation::MoveTo(array));
                break;
            }
            if let (Some(end), Some(end_odd)) = (span.end, span.end_odd) {
                if pos > end && pos < end_odd {
                    relocations.insert(current, Relocation::Delete);
                    break;
                }
            }
        }

        if array_depth > 0 {
            if let Some(Span { end: Some(end), end_odd: Some(end_odd), .. }) = last_visited {
                if pos >= end_odd && pos > end {
                    visiting.pop();
                    last_visited = visiting.last().and_then(|&a| descriptor.node(a).span);
                }
            }
        }

        if let Some(p) = prev {
            let prev_role = part(descriptor, p).role;
            if prev_role == ArrayRole::None && role != ArrayRole::End {
                part_mut(descriptor, p).after = slice(xml, prev_pos, pos).to_string();
            }
            if prev_role == ArrayRole::End && prev_pos != pos {
                let between = slice(xml, prev_pos, pos).to_string();
                if role == ArrayRole::Start {
                    // Text between two adjacent arrays belongs to the second.
                    descriptor.node_mut(obj).before = between;
                } else {
                    part_mut(descriptor, current).before = between;
                }
            }
        }

        if role == ArrayRole::End {
            prev_pos = descriptor.node(obj).span.and_then(|s| s.end_odd).unwrap_or(pos);
        } else if pos > prev_pos {
            prev_pos = pos;
        }
        if i == refs.len() - 1 {
            text.after = slice(xml, prev_pos, xml.len()).to_string();
        }
        prev = Some(current);
    }

    apply_relocations(descriptor, &relocations);
    debug!(
        "segmented {} access points, {} moved or dropped",
        refs.len(),
        relocations.len()
    );
    Ok(text)
}

/// Resolves exact array boundaries and adds the row start/end access points.
fn locate_arrays(xml: &str, descriptor: &mut Descriptor) -> Result<(), CompileError> {
    // Every marker offset: value parts plus the `[i]` and `[i+1]` occurrences.
    let markers: Vec<usize> = descriptor
        .iter()
        .flat_map(|node| {
            let spans = node.span.iter().flat_map(|span| std::iter::once(span.start).chain(span.end));
            node.xml_parts.iter().map(|part| part.position).chain(spans)
        })
        .collect();
    for idx in 0..descriptor.len() {
        let node = descriptor.node(idx);
        let Some(span) = node.span.filter(|_| node.is_array()) else {
            continue;
        };
        let Some(rough_end) = span.end else {
            return Err(CompileError::UnterminatedArray {
                path: node.path.to_string(),
                marker: node.marker.clone(),
            });
        };
        let repetition = locate(xml, span.start, rough_end, &markers).map_err(|source| CompileError::Locate {
            path: node.path.to_string(),
            source,
        })?;
        let path = node.path.clone();
        let node = descriptor.node_mut(idx);
        node.span = Some(Span {
            start: repetition.start_even,
            end: Some(repetition.end_even),
            end_odd: Some(repetition.end_odd),
        });
        node.xml_parts.push(AccessPoint {
            object: path.clone(),
            position: repetition.start_even,
            role: ArrayRole::Start,
            ..Default::default()
        });
        node.xml_parts.push(AccessPoint {
            object: path,
            position: repetition.end_even,
            role: ArrayRole::End,
            ..Default::default()
        });
    }
    Ok(())
}

/// Offset order. On ties, outer loops open first and inner loops close first.
fn compare_parts(a: &AccessPoint, b: &AccessPoint) -> Ordering {
    a.position.cmp(&b.position).then_with(|| match (a.role, b.role) {
        (ArrayRole::Start, ArrayRole::Start) => a.object.as_str().len().cmp(&b.object.as_str().len()),
        (ArrayRole::End, ArrayRole::End) => b.object.as_str().len().cmp(&a.object.as_str().len()),
        (ArrayRole::Start, _) => Ordering::Less,
        (_, ArrayRole::Start) => Ordering::Greater,
        (ArrayRole::End, _) => Ordering::Greater,
        (_, ArrayRole::End) => Ordering::Less,
        _ => Ordering::Equal,
    })
}

fn apply_relocations(descriptor: &mut Descriptor, relocations: &HashMap<PartRef, Relocation>) {
    if relocations.is_empty() {
        return;
    }
    let mut moved: Vec<(usize, AccessPoint)> = Vec::new();
    for n in 0..descriptor.len() {
        let parts = std::mem::take(&mut descriptor.node_mut(n).xml_parts);
        let mut kept = Vec::with_capacity(parts.len());
        for (p, access_point) in parts.into_iter().enumerate() {
            match relocations.get(&(n, p)) {
                Some(Relocation::MoveTo(target)) => moved.push((*target, access_point)),
                Some(Relocation::Delete) => {}
                None => kept.push(access_point),
            }
        }
        descriptor.node_mut(n).xml_parts = kept;
    }
    for (target, access_point) in moved {
        descriptor.node_mut(target).xml_parts.push(access_point);
    }
}

fn part(descriptor: &Descriptor, (n, p): PartRef) -> &AccessPoint {
    &descriptor.node(n).xml_parts[p]
}

fn part_mut(descriptor: &mut Descriptor, (n, p): PartRef) -> &mut AccessPoint {
    &mut descriptor.node_mut(n).xml_parts[p]
}

fn slice(xml: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    xml.get(start..end.min(xml.len())).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_marker::DescriptorBuilder;
    use stencil_markup::find_markers;
    use stencil_types::NodePath;

    fn prepare(template: &str) -> (String, Descriptor) {
        let (xml, markers) = find_markers(template);
        let mut builder = DescriptorBuilder::new();
        for marker in &markers {
            builder.parse(&marker.name, marker.pos).unwrap();
        }
        (xml, builder.finish())
    }

    fn parts<'a>(descriptor: &'a Descriptor, path: &str) -> &'a [AccessPoint] {
        &descriptor.get(&NodePath::from(path)).unwrap().xml_parts
    }

    #[test]
    fn test_no_access_point_keeps_whole_text() {
        let mut descriptor = Descriptor::new();
        let text = segment("<a>plain</a>", &mut descriptor).unwrap();
        assert_eq!(text.before, "<a>plain</a>");
        assert_eq!(text.after, "");
    }

    #[test]
    fn test_object_marker() {
        let (xml, mut descriptor) = prepare("<xml> {d.title} </xml>");
        let text = segment(&xml, &mut descriptor).unwrap();
        assert_eq!(text.before, "<xml> ");
        assert_eq!(text.after, " </xml>");
        let title = &parts(&descriptor, "_rootd")[0];
        assert_eq!(title.position, 6);
        assert_eq!(title.depth, 0);
        assert_eq!(title.after, "");
    }

    #[test]
    fn test_two_object_markers() {
        let (xml, mut descriptor) = prepare("<a>{d.x}-{d.y}</a>");
        let text = segment(&xml, &mut descriptor).unwrap();
        assert_eq!(text.before, "<a>");
        assert_eq!(text.after, "</a>");
        let d = parts(&descriptor, "_rootd");
        assert_eq!(d[0].after, "-");
        assert_eq!(d[1].after, "");
    }

    #[test]
    fn test_array_row() {
        let (xml, mut descriptor) =
            prepare("<xml><t_row> {d[i].brand} </t_row><t_row> {d[i+1].brand} </t_row></xml>");
        let text = segment(&xml, &mut descriptor).unwrap();
        assert_eq!(text.before, "<xml>");
        assert_eq!(text.after, "</xml>");

        let d = descriptor.get(&NodePath::from("_rootd")).unwrap();
        assert_eq!(d.span, Some(Span { start: 5, end: Some(22), end_odd: Some(39) }));
        assert_eq!(d.depth, Some(1));

        let parts = &d.xml_parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].attribute, "brand");
        assert_eq!(parts[0].depth, 1);
        assert_eq!(parts[1].role, ArrayRole::Start);
        assert_eq!(parts[1].after, "<t_row> ");
        assert_eq!(parts[1].depth, 1);
        assert_eq!(parts[2].role, ArrayRole::End);
        assert_eq!(parts[2].before, " </t_row>");
    }

    #[test]
    fn test_odd_zone_parts_are_dropped() {
        let (xml, mut descriptor) = prepare("<a><b>{d[i].x}</b><b>{d[i+1].x}{c.t}</b></a>");
        let text = segment(&xml, &mut descriptor).unwrap();
        assert_eq!(text.before, "<a>");
        assert_eq!(text.after, "</a>");
        assert!(parts(&descriptor, "_rootc").is_empty());
    }

    #[test]
    fn test_unrelated_parts_move_into_row() {
        let (xml, mut descriptor) = prepare("<a><b>{d[i].x}{c.t}</b><b>{d[i+1].x}</b></a>");
        segment(&xml, &mut descriptor).unwrap();
        assert!(parts(&descriptor, "_rootc").is_empty());
        let d = parts(&descriptor, "_rootd");
        let moved = d.iter().find(|p| p.attribute == "t").unwrap();
        assert_eq!(moved.object.as_str(), "_rootc");
        assert_eq!(moved.depth, 1);
    }

    #[test]
    fn test_text_between_adjacent_arrays() {
        let (xml, mut descriptor) = prepare(
            "<a><b>{d[i].x}</b><b>{d[i+1].x}</b>|<p>{c[i].y}</p><p>{c[i+1].y}</p></a>",
        );
        segment(&xml, &mut descriptor).unwrap();
        let c = descriptor.get(&NodePath::from("_rootc")).unwrap();
        assert_eq!(c.before, "|");
    }

    #[test]
    fn test_unterminated_array() {
        let (xml, mut descriptor) = prepare("<a><b>{d[i].x}</b></a>");
        let err = segment(&xml, &mut descriptor).unwrap_err();
        assert!(matches!(err, CompileError::UnterminatedArray { ref path, .. } if path == "_rootd"));
    }

    #[test]
    fn test_tie_order() {
        let start = |obj: &str| AccessPoint {
            object: obj.into(),
            position: 4,
            role: ArrayRole::Start,
            ..Default::default()
        };
        let end = |obj: &str| AccessPoint {
            object: obj.into(),
            position: 4,
            role: ArrayRole::End,
            ..Default::default()
        };
        let plain = AccessPoint { position: 4, ..Default::default() };
        assert_eq!(compare_parts(&start("_rootd"), &start("_rootdsub")), Ordering::Less);
        assert_eq!(compare_parts(&end("_rootd"), &end("_rootdsub")), Ordering::Greater);
        assert_eq!(compare_parts(&start("_rootdsub"), &plain), Ordering::Less);
        assert_eq!(compare_parts(&plain, &end("_rootd")), Ordering::Less);
    }
}
