//! Namespace-tolerant extraction of bibliographic fields from OPS XML.
//!
//! The service emits the same logical schema under at least two namespace
//! conventions (a default namespace vs. an explicit `exchange:` prefix). The
//! parser therefore keeps local names only, which makes every candidate path
//! below match either convention. Structural variation is handled by ordered
//! candidate tables probed per field, first non-empty match wins.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{OpsError, Result};

/// Ordered structural variants for classification codes. The service emits
/// either the IPCR list form or the older flat `classification-ipc` form.
const CLASSIFICATION_PATHS: &[&[&str]] = &[
    &["classifications-ipcr", "classification-ipcr"],
    &["classification-ipc"],
];

/// Sub-elements concatenated, in this order, when a classification node
/// carries decomposed parts instead of a text child.
const CLASSIFICATION_PARTS: &[&str] = &["section", "class", "subclass", "main-group", "subgroup"];

const TITLE_PATH: &[&str] = &["invention-title"];
const INVENTOR_NAME_PATH: &[&str] = &["inventor", "name"];

/// Fields pulled out of one biblio response. A present `title` is the
/// success signal; partial classification/inventor data without a title is
/// treated by the resolver as "no data".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BiblioFields {
    pub title: Option<String>,
    pub inventors: Vec<String>,
    pub classifications: Vec<String>,
}

pub fn extract_biblio(xml: &str) -> Result<BiblioFields> {
    let root = parse_tree(xml)?;
    Ok(BiblioFields {
        title: extract_title(&root),
        inventors: extract_inventors(&root),
        classifications: extract_classifications(&root),
    })
}

/// Pull the `message` element out of an OPS XML error envelope.
pub(crate) fn error_envelope_message(xml: &str) -> Option<String> {
    let root = parse_tree(xml).ok()?;
    first_descendant(&root, "message").and_then(Element::direct_text)
}

fn extract_title(root: &Element) -> Option<String> {
    let candidates = find_all(root, TITLE_PATH);
    candidates
        .iter()
        .filter(|el| el.attr("lang") == Some("en"))
        .find_map(|el| el.direct_text())
        .or_else(|| candidates.iter().find_map(|el| el.direct_text()))
}

fn extract_classifications(root: &Element) -> Vec<String> {
    for path in CLASSIFICATION_PATHS {
        let codes = find_all(root, path)
            .into_iter()
            .filter_map(classification_code)
            .collect::<Vec<_>>();
        if !codes.is_empty() {
            return codes;
        }
    }
    Vec::new()
}

fn classification_code(node: &Element) -> Option<String> {
    if let Some(text) = first_descendant(node, "text").and_then(Element::direct_text) {
        return Some(text);
    }
    let parts = CLASSIFICATION_PARTS
        .iter()
        .filter_map(|part| first_descendant(node, part).and_then(Element::direct_text))
        .collect::<Vec<_>>();
    (!parts.is_empty()).then(|| parts.concat())
}

fn extract_inventors(root: &Element) -> Vec<String> {
    find_all(root, INVENTOR_NAME_PATH)
        .into_iter()
        .filter_map(|name| {
            let parts = ["firstname", "lastname"]
                .iter()
                .filter_map(|part| first_descendant(name, part).and_then(Element::direct_text))
                .collect::<Vec<_>>();
            (!parts.is_empty()).then(|| parts.join(" "))
        })
        .collect()
}

// ─── Minimal prefix-insensitive element tree ─────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Trimmed direct text content, `None` when empty.
    pub(crate) fn direct_text(&self) -> Option<String> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Parse a whole document into a tree keyed by local element names. Any
/// well-formedness problem fails the whole response, which callers treat as
/// "advance to the next identifier encoding".
pub(crate) fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // Index 0 is a synthetic root so documents with sibling top-level
    // fragments still parse.
    let mut stack: Vec<Element> = vec![Element::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(element_from_start(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from_start(&start)?;
                attach_child(&mut stack, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| OpsError::Parse("malformed XML: unbalanced end tag".into()))?;
                attach_child(&mut stack, element)?;
            }
            Ok(Event::Text(text)) => {
                let decoded = text
                    .unescape()
                    .map_err(|e| OpsError::Parse(format!("malformed XML text: {e}")))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decoded);
                }
            }
            Ok(Event::CData(cdata)) => {
                let decoded = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(OpsError::Parse(format!("malformed XML: {e}"))),
        }
    }

    if stack.len() != 1 {
        return Err(OpsError::Parse("malformed XML: unclosed element".into()));
    }
    stack
        .pop()
        .ok_or_else(|| OpsError::Parse("malformed XML: empty document".into()))
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let mut element = Element {
        name: local_name(start.local_name().as_ref()),
        ..Element::default()
    };
    for attr in start.attributes().flatten() {
        let key = local_name(attr.key.local_name().as_ref());
        let value = attr
            .unescape_value()
            .map_err(|e| OpsError::Parse(format!("malformed XML attribute: {e}")))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach_child(stack: &mut Vec<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None => Err(OpsError::Parse(
            "malformed XML: content after document end".into(),
        )),
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// All elements whose name chain matches `path`: the first component is
/// anchored at any descendant, the rest must be successive children (the
/// XPath `.//a/b` shape).
pub(crate) fn find_all<'a>(root: &'a Element, path: &[&str]) -> Vec<&'a Element> {
    let mut out = Vec::new();
    if path.is_empty() {
        return out;
    }
    walk_anchors(root, path, &mut out);
    out
}

fn walk_anchors<'a>(el: &'a Element, path: &[&str], out: &mut Vec<&'a Element>) {
    for child in &el.children {
        if child.name == path[0] {
            if path.len() == 1 {
                out.push(child);
            } else {
                collect_chain(child, &path[1..], out);
            }
        }
        walk_anchors(child, path, out);
    }
}

fn collect_chain<'a>(el: &'a Element, rest: &[&str], out: &mut Vec<&'a Element>) {
    for child in &el.children {
        if child.name == rest[0] {
            if rest.len() == 1 {
                out.push(child);
            } else {
                collect_chain(child, &rest[1..], out);
            }
        }
    }
}

pub(crate) fn first_descendant<'a>(el: &'a Element, name: &str) -> Option<&'a Element> {
    for child in &el.children {
        if child.name == name {
            return Some(child);
        }
        if let Some(found) = first_descendant(child, name) {
            return Some(found);
        }
    }
    None
}
