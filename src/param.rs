//! Request parameters and their XML serialization.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use tracing::warn;

use crate::error::{Result, XmlmcError};
use crate::xml::{write_event, write_text};

/// Wire format for date/time values (always UTC)
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// Encoding applied to a leaf value when it is serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XmlmcEncoding {
    #[default]
    None,
    Base64,
}

/// Value held by a parameter: a scalar leaf or nested parameters
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(DateTime<Utc>),
    Node(Box<XmlmcParam>),
    NodeList(Vec<XmlmcParam>),
}

impl ParamValue {
    /// Text form of a scalar value; `None` for nested values.
    pub fn to_text(&self) -> Option<String> {
        match self {
            ParamValue::String(s) => Some(s.clone()),
            ParamValue::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Date(d) => Some(d.format(DATE_TIME_FORMAT).to_string()),
            ParamValue::Node(_) | ParamValue::NodeList(_) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, ParamValue::Node(_) | ParamValue::NodeList(_))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::String(value.clone())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

macro_rules! int_param_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_param_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        // Widening 0.12345f32 directly gives 0.12345000356435776; go through the
        // shortest f32 text so the serialized form matches what the caller wrote
        let widened = value.to_string().parse::<f64>().unwrap_or(f64::from(value));
        ParamValue::Float(widened)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for ParamValue {
    fn from(value: DateTime<Tz>) -> Self {
        ParamValue::Date(value.with_timezone(&Utc))
    }
}

impl From<XmlmcParam> for ParamValue {
    fn from(value: XmlmcParam) -> Self {
        ParamValue::Node(Box::new(value))
    }
}

impl From<Vec<XmlmcParam>> for ParamValue {
    fn from(value: Vec<XmlmcParam>) -> Self {
        ParamValue::NodeList(value)
    }
}

/// A named request parameter.
///
/// A parameter is either a leaf carrying a scalar or a branch carrying child
/// parameters; it is never both.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlmcParam {
    name: String,
    value: ParamValue,
    encoding: XmlmcEncoding,
}

impl XmlmcParam {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            encoding: XmlmcEncoding::None,
        }
    }

    /// A branch with no children yet, to be filled with [`XmlmcParam::add`].
    pub fn complex(name: impl Into<String>) -> Self {
        Self::new(name, ParamValue::NodeList(Vec::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn encoding(&self) -> XmlmcEncoding {
        self.encoding
    }

    /// Child parameters of a branch; empty for a leaf.
    pub fn children(&self) -> &[XmlmcParam] {
        match &self.value {
            ParamValue::Node(child) => std::slice::from_ref(child.as_ref()),
            ParamValue::NodeList(children) => children,
            _ => &[],
        }
    }

    /// Sets the encoding applied to this value at serialization time.
    pub fn encode_value(&mut self, encoding: XmlmcEncoding) -> &mut Self {
        self.encoding = encoding;
        self
    }

    /// Appends a child parameter and returns it for further nesting.
    ///
    /// Adding a child to a leaf turns it into a branch and drops the scalar.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut XmlmcParam {
        self.push_child(XmlmcParam::new(name, value))
    }

    pub fn add_complex(&mut self, name: impl Into<String>) -> &mut XmlmcParam {
        self.push_child(XmlmcParam::complex(name))
    }

    fn push_child(&mut self, child: XmlmcParam) -> &mut XmlmcParam {
        let children = match std::mem::replace(&mut self.value, ParamValue::NodeList(Vec::new())) {
            ParamValue::NodeList(children) => children,
            ParamValue::Node(existing) => vec![*existing],
            scalar => {
                warn!(
                    "Parameter '{}' held scalar {:?}; replacing it with nested parameters",
                    self.name, scalar
                );
                Vec::new()
            }
        };
        self.value = ParamValue::NodeList(children);

        match &mut self.value {
            ParamValue::NodeList(children) => {
                children.push(child);
                let last = children.len() - 1;
                &mut children[last]
            }
            _ => unreachable!("value was just set to a node list"),
        }
    }

    /// Serializes this parameter as `<name>…</name>`.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(XmlmcError::parse)
    }

    pub(crate) fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        write_event(writer, Event::Start(BytesStart::new(self.name.as_str())))?;
        match self.value.to_text() {
            Some(text) => write_text(writer, &self.encoded(text))?,
            None => {
                for child in self.children() {
                    child.write_to(writer)?;
                }
            }
        }
        write_event(writer, Event::End(BytesEnd::new(self.name.as_str())))
    }

    fn encoded(&self, text: String) -> String {
        match self.encoding {
            XmlmcEncoding::None => text,
            XmlmcEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(text.as_bytes()),
        }
    }
}

/// Serializes a list of sibling parameters without any wrapping element.
pub fn params_to_xml(params: &[XmlmcParam]) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    for param in params {
        param.write_to(&mut writer)?;
    }
    String::from_utf8(writer.into_inner()).map_err(XmlmcError::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn xml_of(param: XmlmcParam) -> String {
        param.to_xml().unwrap()
    }

    #[test]
    fn test_scalar_serialization() {
        assert_eq!(xml_of(XmlmcParam::new("key", "string")), "<key>string</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", false)), "<key>false</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", true)), "<key>true</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", 0.12345_f64)), "<key>0.12345</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", 12345_i64)), "<key>12345</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", 0.12345_f32)), "<key>0.12345</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", 12345_i32)), "<key>12345</key>");
        assert_eq!(xml_of(XmlmcParam::new("key", -7_i64)), "<key>-7</key>");
    }

    #[test]
    fn test_date_serialization_is_utc() {
        let utc = Utc.with_ymd_and_hms(2016, 5, 27, 11, 2, 58).unwrap();
        assert_eq!(xml_of(XmlmcParam::new("key", utc)), "<key>2016-05-27 11:02:58Z</key>");

        let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2016, 5, 27, 13, 2, 58).unwrap();
        assert_eq!(xml_of(XmlmcParam::new("key", local)), "<key>2016-05-27 11:02:58Z</key>");
    }

    #[test]
    fn test_nested_param() {
        let param = XmlmcParam::new("key", XmlmcParam::new("child", "string"));
        assert_eq!(xml_of(param), "<key><child>string</child></key>");
    }

    #[test]
    fn test_param_list() {
        let param = XmlmcParam::new(
            "key",
            vec![
                XmlmcParam::new("child1", "string"),
                XmlmcParam::new("child2", "string"),
                XmlmcParam::new("child3", "string"),
            ],
        );
        assert_eq!(
            xml_of(param),
            "<key><child1>string</child1><child2>string</child2><child3>string</child3></key>"
        );
    }

    #[test]
    fn test_complex_builder() {
        let mut location = XmlmcParam::complex("location");
        location.add("latitude", 51.5575);
        location.add("elevation", 0);
        location.add_complex("place").add("name", "Odyssey Business Park");

        assert_eq!(
            xml_of(location),
            "<location><latitude>51.5575</latitude><elevation>0</elevation>\
             <place><name>Odyssey Business Park</name></place></location>"
        );
    }

    #[test]
    fn test_empty_complex_param() {
        assert_eq!(xml_of(XmlmcParam::complex("location")), "<location></location>");
    }

    #[test]
    fn test_adding_child_to_node_keeps_existing_child() {
        let mut param = XmlmcParam::new("key", XmlmcParam::new("a", "1"));
        param.add("b", "2");
        assert_eq!(param.children().len(), 2);
        assert_eq!(xml_of(param), "<key><a>1</a><b>2</b></key>");
    }

    #[test]
    fn test_adding_child_to_leaf_promotes_to_branch() {
        let mut param = XmlmcParam::new("key", "scalar");
        param.add("child", "x");
        assert!(!param.value().is_leaf());
        assert_eq!(xml_of(param), "<key><child>x</child></key>");
    }

    #[test]
    fn test_base64_applied_at_serialization() {
        let mut param = XmlmcParam::new("password", "password");
        param.encode_value(XmlmcEncoding::Base64);
        assert_eq!(param.value(), &ParamValue::String("password".to_string()));
        assert_eq!(xml_of(param), "<password>cGFzc3dvcmQ=</password>");
    }

    #[test]
    fn test_special_characters_always_escaped() {
        let param = XmlmcParam::new("content", "<>&'\"\" &amp; &lt;");
        assert_eq!(
            xml_of(param),
            "<content>&lt;&gt;&amp;&apos;&quot;&quot; &amp;amp; &amp;lt;</content>"
        );
    }

    #[test]
    fn test_params_to_xml_emits_siblings() {
        let params = vec![XmlmcParam::new("key", "a"), XmlmcParam::new("key", "b")];
        assert_eq!(params_to_xml(&params).unwrap(), "<key>a</key><key>b</key>");
        assert_eq!(params_to_xml(&[]).unwrap(), "");
    }
}
