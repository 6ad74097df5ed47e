//! Parsed `methodCallResult` envelopes and typed parameter readers.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Result, XmlmcError};
use crate::param::DATE_TIME_FORMAT;
use crate::xml::{XmlDocument, XmlElement};

const RESULT_ELEMENT: &str = "methodCallResult";
const STATUS_OK: &str = "ok";

/// One XMLMC response, kept on the client until the next invoke
#[derive(Debug, Clone)]
pub struct XmlmcResponse {
    raw: String,
    document: XmlDocument,
    success: bool,
    error_message: Option<String>,
}

impl XmlmcResponse {
    /// Parses a response body; fails if it is not a `methodCallResult` envelope.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let document = XmlDocument::parse(&raw)?;

        let root = document
            .root()
            .ok_or_else(|| XmlmcError::Parse("empty response document".to_string()))?;
        if root.name != RESULT_ELEMENT {
            return Err(XmlmcError::Parse(format!(
                "expected <{}> envelope, found <{}>",
                RESULT_ELEMENT, root.name
            )));
        }

        let success = root
            .attribute("status")
            .map(|status| status.eq_ignore_ascii_case(STATUS_OK))
            .unwrap_or(false);

        let error_message = if success {
            None
        } else {
            Some(
                root.child("state")
                    .and_then(|state| state.child("error"))
                    .or_else(|| root.descendants_named("error").into_iter().next())
                    .map(|error| error.inner_text())
                    .unwrap_or_else(|| "request failed without an error message".to_string()),
            )
        };

        Ok(Self {
            raw,
            document,
            success,
            error_message,
        })
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The response body exactly as received.
    pub fn xml(&self) -> &str {
        &self.raw
    }

    pub fn document(&self) -> &XmlDocument {
        &self.document
    }

    /// The `<params>` element of the envelope, if the server sent one.
    pub fn params(&self) -> Option<&XmlElement> {
        self.document.root().and_then(|root| root.child("params"))
    }

    fn occurrences<'a>(&'a self, key: &'a str) -> Vec<&'a XmlElement> {
        self.params()
            .map(|params| params.children_named(key).collect())
            .unwrap_or_default()
    }

    fn leaf(&self, key: &str) -> Result<&XmlElement> {
        self.params()
            .and_then(|params| {
                params
                    .descendants_named(key)
                    .into_iter()
                    .find(|element| element.is_leaf())
            })
            .ok_or_else(|| XmlmcError::ParamNotFound(key.to_string()))
    }

    /// Text of the first leaf named `key` anywhere under `<params>`.
    pub fn param_as_string(&self, key: &str) -> Result<String> {
        Ok(self.leaf(key)?.inner_text())
    }

    pub fn param_as_bool(&self, key: &str) -> Result<bool> {
        let value = self.param_as_string(key)?;
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid(key, value, "boolean")),
        }
    }

    pub fn param_as_long(&self, key: &str) -> Result<i64> {
        let value = self.param_as_string(key)?;
        value.trim().parse().map_err(|_| invalid(key, value, "integer"))
    }

    pub fn param_as_double(&self, key: &str) -> Result<f64> {
        let value = self.param_as_string(key)?;
        value.trim().parse().map_err(|_| invalid(key, value, "number"))
    }

    /// Parses `yyyy-MM-dd HH:mm:ssZ`, falling back to RFC 3339.
    pub fn param_as_date(&self, key: &str) -> Result<DateTime<Utc>> {
        let value = self.param_as_string(key)?;
        parse_date(value.trim()).ok_or_else(|| invalid(key, value, "date/time"))
    }

    /// Number of `<key>` elements directly under `<params>`.
    pub fn param_count(&self, key: &str) -> usize {
        self.occurrences(key).len()
    }

    /// Values of every text-only `<key>` directly under `<params>`, in document order.
    ///
    /// Occurrences holding nested elements are skipped.
    pub fn param_as_string_array(&self, key: &str) -> Vec<String> {
        self.occurrences(key)
            .into_iter()
            .filter(|element| element.is_leaf())
            .map(XmlElement::inner_text)
            .collect()
    }

    /// The `occurrence`-th `<key>` under `<params>` as its own document.
    ///
    /// Occurrences count from 1 and 0 is read as 1. A missing occurrence gives
    /// an empty document rather than an error.
    pub fn param_as_complex_type(&self, key: &str, occurrence: usize) -> XmlDocument {
        let index = occurrence.max(1) - 1;
        self.occurrences(key)
            .get(index)
            .map(|element| XmlDocument::from_root((*element).clone()))
            .unwrap_or_default()
    }
}

fn invalid(key: &str, value: String, expected: &'static str) -> XmlmcError {
    XmlmcError::InvalidValue {
        key: key.to_string(),
        value,
        expected,
    }
}

pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .map(|date| date.with_timezone(&Utc))
                .ok()
        })
}
