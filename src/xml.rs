//! Minimal XML document model used for XMLMC responses.
//!
//! Responses are parsed into an owned element tree so readers can walk them
//! without holding on to the raw text. Serialization goes back through
//! `quick_xml::Writer`, escaping text and attribute values.

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, XmlmcError};

// Guards against hostile responses nesting elements without bound
const MAX_ELEMENT_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        element.children.push(XmlNode::Text(text.into()));
        element
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct element children, skipping text nodes
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|element| element.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |element| element.name == name)
    }

    /// True when the element holds no element children (text only or empty).
    pub fn is_leaf(&self) -> bool {
        self.elements().next().is_none()
    }

    /// Concatenated text of this element and all of its descendants.
    pub fn inner_text(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Text of the first child node when it is a text node.
    pub fn first_text(&self) -> Option<&str> {
        match self.children.first() {
            Some(XmlNode::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// All descendants named `name`, in document order (the element itself included).
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_named(name, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        if self.name == name {
            found.push(self);
        }
        for element in self.elements() {
            element.collect_named(name, found);
        }
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(XmlmcError::parse)
    }

    pub(crate) fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        write_event(writer, Event::Start(start))?;
        for child in &self.children {
            match child {
                XmlNode::Text(text) => write_text(writer, text)?,
                XmlNode::Element(element) => element.write_to(writer)?,
            }
        }
        write_event(writer, Event::End(BytesEnd::new(self.name.as_str())))
    }
}

/// A parsed document: either empty or holding exactly one root element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlDocument {
    root: Option<XmlElement>,
}

impl XmlDocument {
    pub fn empty() -> Self {
        Self { root: None }
    }

    pub fn from_root(root: XmlElement) -> Self {
        Self { root: Some(root) }
    }

    pub fn parse(xml: &str) -> Result<Self> {
        parse_document(xml)
    }

    pub fn root(&self) -> Option<&XmlElement> {
        self.root.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Top level nodes of the document (zero or one element).
    pub fn child_nodes(&self) -> Vec<&XmlElement> {
        self.root.iter().collect()
    }

    /// Every element named `name` anywhere in the document, in document order.
    pub fn elements_by_tag_name(&self, name: &str) -> Vec<&XmlElement> {
        self.root
            .as_ref()
            .map(|root| root.descendants_named(name))
            .unwrap_or_default()
    }

    pub fn to_xml(&self) -> Result<String> {
        match &self.root {
            Some(root) => root.to_xml(),
            None => Ok(String::new()),
        }
    }
}

pub(crate) fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(XmlmcError::parse)
}

/// Writes `text` with all five XML special characters escaped.
pub(crate) fn write_text(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<()> {
    write_event(writer, Event::Text(BytesText::from_escaped(escape(text))))
}

fn parse_document(xml: &str) -> Result<XmlDocument> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text(false);
    config.expand_empty_elements = false;

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().map_err(XmlmcError::parse)? {
            Event::Start(e) => {
                if stack.len() >= MAX_ELEMENT_DEPTH {
                    return Err(XmlmcError::Parse(format!(
                        "element nesting exceeds {} levels",
                        MAX_ELEMENT_DEPTH
                    )));
                }
                stack.push(element_from_start(&e)?);
            }
            Event::Empty(e) => {
                let element = element_from_start(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| XmlmcError::Parse("unbalanced end tag".to_string()))?;
                // Indentation between child elements is not content
                if !element.is_leaf() {
                    element.children.retain(|child| match child {
                        XmlNode::Text(text) => !text.trim().is_empty(),
                        XmlNode::Element(_) => true,
                    });
                }
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(XmlmcError::parse)?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(e) => {
                let text = String::from_utf8(e.into_inner().into_owned()).map_err(XmlmcError::parse)?;
                push_text(&mut stack, &text)?;
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes carry no data
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(XmlmcError::Parse(format!("unclosed element <{}>", open.name)));
    }

    Ok(XmlDocument { root })
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(XmlmcError::parse)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(XmlmcError::parse)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(XmlmcError::Parse(format!(
            "multiple root elements; unexpected <{}>",
            element.name
        ))),
    }
}

fn push_text(stack: &mut [XmlElement], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            // Adjacent text and CDATA sections merge into one node
            if let Some(XmlNode::Text(existing)) = parent.children.last_mut() {
                existing.push_str(text);
            } else {
                parent.children.push(XmlNode::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(XmlmcError::Parse("text outside of the root element".to_string())),
    }
}
