//! Brief rendering of comparator XML reports.
//!
//! The comparator's XML report is parsed into an owned tree. Pruning builds
//! a new tree without the high-volume subsections instead of editing the
//! parsed one in place.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Subsections dropped from brief output, wherever they appear.
pub const LOW_SIGNAL_TAGS: &[&str] = &[
    "test_info",
    "test_results",
    "problem_summary",
    "added_symbols",
    "affected",
];

/// Errors from reading a comparator XML report.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("{0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("unbalanced element nesting")]
    Unbalanced,

    #[error("document has no root element")]
    Empty,
}

/// A node of the parsed report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element with its attributes and children, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn has_element_children(&self) -> bool {
        self.elements().next().is_some()
    }

    /// Copy of this element with every descendant named in `tags` removed.
    ///
    /// The element itself is kept even if its own name is listed.
    pub fn without_tags(&self, tags: &[&str]) -> XmlElement {
        let children = self
            .children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Element(e) if tags.contains(&e.name.as_str()) => None,
                XmlNode::Element(e) => Some(XmlNode::Element(e.without_tags(tags))),
                XmlNode::Text(t) => Some(XmlNode::Text(t.clone())),
            })
            .collect();
        XmlElement {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            children,
        }
    }

    /// Serialize with two-space indentation.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_indented(&mut out, 0);
        out
    }

    fn write_indented(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {}=\"{}\"", key, quick_xml::escape::escape(value.as_str())));
        }
        if self.children.is_empty() {
            out.push_str(" />\n");
            return;
        }
        out.push('>');

        if !self.has_element_children() {
            for child in &self.children {
                if let XmlNode::Text(t) = child {
                    out.push_str(&quick_xml::escape::escape(t.as_str()));
                }
            }
        } else {
            out.push('\n');
            for child in &self.children {
                match child {
                    XmlNode::Element(e) => e.write_indented(out, depth + 1),
                    XmlNode::Text(t) => {
                        out.push_str(&"  ".repeat(depth + 1));
                        out.push_str(&quick_xml::escape::escape(t.as_str()));
                        out.push('\n');
                    }
                }
            }
            out.push_str(&indent);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push_str(">\n");
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, XmlError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        element.attributes.push((
            String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
            attribute.unescape_value()?.into_owned(),
        ));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError::Unbalanced),
    }
    Ok(())
}

/// Parse an XML document into its root element. Whitespace-only text is dropped.
pub fn parse(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::Unbalanced)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape()?.into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(XmlError::Unbalanced);
    }
    root.ok_or(XmlError::Empty)
}

/// Strip the low-signal subsections from a report tree.
///
/// After removing [`LOW_SIGNAL_TAGS`] recursively, problem sections (the
/// grandchildren of the root) left without any child element are dropped.
pub fn prune_report(root: &XmlElement) -> XmlElement {
    let mut pruned = root.without_tags(LOW_SIGNAL_TAGS);
    for child in pruned.children.iter_mut() {
        if let XmlNode::Element(report) = child {
            report.children.retain(|problems| match problems {
                XmlNode::Element(e) => e.has_element_children(),
                XmlNode::Text(_) => true,
            });
        }
    }
    pruned
}

/// Parse, prune and re-serialize a comparator XML report.
pub fn prune_report_xml(xml: &str) -> Result<String, XmlError> {
    Ok(prune_report(&parse(xml)?).to_xml_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<reports>
  <report kind="binary" version="1.2">
    <test_info><library>libfoo</library></test_info>
    <test_results><verdict>incompatible</verdict></test_results>
    <problem_summary><total>3</total></problem_summary>
    <added_symbols><name>foo_new</name></added_symbols>
    <removed_symbols>
      <name>foo_old</name>
    </removed_symbols>
    <problems_with_types severity="High">
      <type name="struct foo_ctx">
        <problem id="Size">
          <change old_value="16" new_value="24"/>
          <affected><symbol>foo_init</symbol></affected>
        </problem>
      </type>
    </problems_with_types>
    <problems_with_symbols severity="Low"></problems_with_symbols>
  </report>
  <report kind="source">
    <removed_symbols/>
  </report>
</reports>"#;

    #[test]
    fn test_parse_keeps_structure_and_attributes() {
        let root = parse(REPORT).unwrap();
        assert_eq!(root.name, "reports");
        let reports: Vec<&XmlElement> = root.elements().collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[0].attributes,
            vec![
                ("kind".to_string(), "binary".to_string()),
                ("version".to_string(), "1.2".to_string())
            ]
        );
    }

    #[test]
    fn test_prune_drops_low_signal_sections_recursively() {
        let pruned = prune_report(&parse(REPORT).unwrap());
        let xml = pruned.to_xml_string();

        for tag in LOW_SIGNAL_TAGS {
            assert!(!xml.contains(&format!("<{tag}")), "{tag} survived:\n{xml}");
        }
        assert!(xml.contains("foo_old"));
        assert!(xml.contains("old_value=\"16\""));
        assert!(!xml.contains("foo_init"));
    }

    #[test]
    fn test_prune_drops_empty_problem_sections() {
        let pruned = prune_report(&parse(REPORT).unwrap());
        let reports: Vec<&XmlElement> = pruned.elements().collect();

        let binary: Vec<&str> = reports[0].elements().map(|e| e.name.as_str()).collect();
        assert_eq!(binary, vec!["removed_symbols", "problems_with_types"]);
        assert!(!reports[1].has_element_children());
    }

    #[test]
    fn test_prune_does_not_modify_the_input() {
        let root = parse(REPORT).unwrap();
        let before = root.clone();
        let _ = prune_report(&root);
        assert_eq!(root, before);
    }

    #[test]
    fn test_serialized_output_reparses() {
        let xml = prune_report_xml(REPORT).unwrap();
        let reparsed = parse(&xml).unwrap();
        assert_eq!(reparsed, prune_report(&parse(REPORT).unwrap()));
    }

    #[test]
    fn test_text_is_escaped() {
        let mut root = XmlElement::new("name");
        root.children.push(XmlNode::Text("a < b & c".to_string()));
        assert_eq!(root.to_xml_string(), "<name>a &lt; b &amp; c</name>\n");
    }

    #[test]
    fn test_malformed_report_is_an_error() {
        assert!(parse("<reports><report></reports>").is_err());
        assert!(matches!(parse(""), Err(XmlError::Empty)));
    }
}
