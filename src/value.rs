//! Attribute value types.
//!
//! The set of value kinds is closed: every kind is a variant of
//! [`ScalarValue`], and an [`AttributeValue`] is either one scalar or a
//! homogeneous array of scalars. Adding a kind means extending the enum and
//! following the compiler through every exhaustive match.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The kind of an attribute value, independent of array-ness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValueType {
    Text,
    MultilineText,
    Integer,
    Json,
    Yaml,
}

impl AttributeValueType {
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::MultilineText)
    }
}

impl fmt::Display for AttributeValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::MultilineText => "multiline_text",
            Self::Integer => "integer",
            Self::Json => "json",
            Self::Yaml => "yaml",
        };
        f.write_str(s)
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Text(String),
    MultilineText(String),
    Integer(i64),
    Json(serde_json::Value),
    Yaml(serde_yaml::Value),
}

impl ScalarValue {
    #[must_use]
    pub const fn value_type(&self) -> AttributeValueType {
        match self {
            Self::Text(_) => AttributeValueType::Text,
            Self::MultilineText(_) => AttributeValueType::MultilineText,
            Self::Integer(_) => AttributeValueType::Integer,
            Self::Json(_) => AttributeValueType::Json,
            Self::Yaml(_) => AttributeValueType::Yaml,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::MultilineText(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let Self::Text(v) = self {
            if v.contains('\n') || v.contains('\r') {
                return Err(ValidationError::InvalidValue {
                    reason: "single-line text contains a line break".to_string(),
                });
            }
        }
        Ok(())
    }

    fn parse(ty: AttributeValueType, raw: &serde_json::Value) -> Result<Self, ValidationError> {
        let mismatch = || ValidationError::InvalidValue {
            reason: format!("expected {ty} value, got {raw}"),
        };
        let value = match ty {
            AttributeValueType::Text => Self::Text(raw.as_str().ok_or_else(mismatch)?.to_string()),
            AttributeValueType::MultilineText => {
                Self::MultilineText(raw.as_str().ok_or_else(mismatch)?.to_string())
            }
            AttributeValueType::Integer => match raw {
                serde_json::Value::Number(n) => Self::Integer(n.as_i64().ok_or_else(mismatch)?),
                serde_json::Value::String(s) => {
                    Self::Integer(s.trim().parse::<i64>().map_err(|_| mismatch())?)
                }
                _ => return Err(mismatch()),
            },
            AttributeValueType::Json => Self::Json(raw.clone()),
            AttributeValueType::Yaml => {
                let src = raw.as_str().ok_or_else(mismatch)?;
                let doc = serde_yaml::from_str(src).map_err(|e| ValidationError::InvalidValue {
                    reason: format!("invalid YAML document: {e}"),
                })?;
                Self::Yaml(doc)
            }
        };
        value.validate()?;
        Ok(value)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) | Self::MultilineText(v) => f.write_str(v),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::Yaml(v) => match serde_yaml::to_string(v) {
                Ok(s) => f.write_str(s.trim_end()),
                Err(_) => f.write_str("<invalid yaml>"),
            },
        }
    }
}

/// The value of one attribute version: a scalar or a homogeneous array.
///
/// # Examples
///
/// ```
/// use strata::{AttributeValue, AttributeValueType};
///
/// let v = AttributeValue::text("srv1");
/// assert_eq!(v.value_type(), AttributeValueType::Text);
/// assert!(!v.is_array());
/// assert_eq!(v.to_string(), "srv1");
///
/// let ports = AttributeValue::integer_array([80, 443]);
/// assert!(ports.is_array());
/// assert_eq!(ports.to_string(), "[80, 443]");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeValue {
    Scalar {
        value: ScalarValue,
    },
    Array {
        element_type: AttributeValueType,
        items: Vec<ScalarValue>,
    },
}

impl AttributeValue {
    #[must_use]
    pub fn text(v: impl Into<String>) -> Self {
        Self::Scalar {
            value: ScalarValue::Text(v.into()),
        }
    }

    #[must_use]
    pub fn multiline_text(v: impl Into<String>) -> Self {
        Self::Scalar {
            value: ScalarValue::MultilineText(v.into()),
        }
    }

    #[must_use]
    pub const fn integer(v: i64) -> Self {
        Self::Scalar {
            value: ScalarValue::Integer(v),
        }
    }

    #[must_use]
    pub const fn json(v: serde_json::Value) -> Self {
        Self::Scalar {
            value: ScalarValue::Json(v),
        }
    }

    /// Parses a YAML document into a structured-document value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` if `src` is not valid YAML.
    pub fn yaml(src: &str) -> Result<Self, ValidationError> {
        Self::build(
            AttributeValueType::Yaml,
            false,
            &serde_json::Value::String(src.to_string()),
        )
    }

    #[must_use]
    pub fn text_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array {
            element_type: AttributeValueType::Text,
            items: items.into_iter().map(|s| ScalarValue::Text(s.into())).collect(),
        }
    }

    #[must_use]
    pub fn integer_array(items: impl IntoIterator<Item = i64>) -> Self {
        Self::Array {
            element_type: AttributeValueType::Integer,
            items: items.into_iter().map(ScalarValue::Integer).collect(),
        }
    }

    /// Builds an array value, checking that every item has `element_type`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` on a mixed array.
    pub fn array(
        element_type: AttributeValueType,
        items: Vec<ScalarValue>,
    ) -> Result<Self, ValidationError> {
        let value = Self::Array { element_type, items };
        value.validate()?;
        Ok(value)
    }

    /// Builds a value of the given kind from untyped JSON input.
    ///
    /// Arrays are expected as JSON arrays; YAML documents as strings.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` if `raw` does not fit the kind.
    pub fn build(
        ty: AttributeValueType,
        is_array: bool,
        raw: &serde_json::Value,
    ) -> Result<Self, ValidationError> {
        if is_array {
            let raw_items = raw.as_array().ok_or_else(|| ValidationError::InvalidValue {
                reason: format!("expected array of {ty}, got {raw}"),
            })?;
            let items = raw_items
                .iter()
                .map(|r| ScalarValue::parse(ty, r))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self::Array {
                element_type: ty,
                items,
            })
        } else {
            Ok(Self::Scalar {
                value: ScalarValue::parse(ty, raw)?,
            })
        }
    }

    #[must_use]
    pub const fn value_type(&self) -> AttributeValueType {
        match self {
            Self::Scalar { value } => value.value_type(),
            Self::Array { element_type, .. } => *element_type,
        }
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// All scalar items: one for a scalar, every element for an array.
    #[must_use]
    pub fn items(&self) -> &[ScalarValue] {
        match self {
            Self::Scalar { value } => std::slice::from_ref(value),
            Self::Array { items, .. } => items,
        }
    }

    /// Checks the value for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` if an array item does not have
    /// the array's element type, or single-line text spans several lines.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Self::Array { element_type, items } = self {
            if let Some(bad) = items.iter().find(|i| i.value_type() != *element_type) {
                return Err(ValidationError::InvalidValue {
                    reason: format!(
                        "array of {element_type} contains a {} item",
                        bad.value_type()
                    ),
                });
            }
        }
        self.items().iter().try_for_each(ScalarValue::validate)
    }

    /// Violations of a text length constraint, one per offending item.
    #[must_use]
    pub fn check_text_length(&self, min: Option<usize>, max: Option<usize>) -> Vec<String> {
        if !self.value_type().is_textual() {
            return vec![format!("length constraint requires text, value is {}", self.value_type())];
        }
        let mut out = Vec::new();
        for (i, item) in self.items().iter().enumerate() {
            let Some(text) = item.as_text() else { continue };
            let len = text.chars().count();
            match (min, max) {
                (_, Some(max)) if len > max => {
                    out.push(format!("{}text too long ({len} > {max})", self.item_prefix(i)));
                }
                (Some(min), _) if len < min => {
                    out.push(format!("{}text too short ({len} < {min})", self.item_prefix(i)));
                }
                _ => {}
            }
        }
        out
    }

    /// Violations of a regex constraint, one per non-matching item.
    #[must_use]
    pub fn check_regex(&self, regex: &Regex) -> Vec<String> {
        if !self.value_type().is_textual() {
            return vec![format!("regex constraint requires text, value is {}", self.value_type())];
        }
        self.items()
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let text = item.as_text()?;
                (!regex.is_match(text)).then(|| {
                    format!("{}regex {regex} did not match text {text:?}", self.item_prefix(i))
                })
            })
            .collect()
    }

    /// Violations of an array length constraint.
    #[must_use]
    pub fn check_array_length(&self, min: Option<usize>, max: Option<usize>) -> Vec<String> {
        match self {
            Self::Scalar { .. } => vec!["array length constraint requires an array".to_string()],
            Self::Array { items, .. } => {
                let len = items.len();
                if max.is_some_and(|m| len > m) {
                    vec![format!("array too long ({len} items)")]
                } else if min.is_some_and(|m| len < m) {
                    vec![format!("array too short ({len} items)")]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn item_prefix(&self, index: usize) -> String {
        if self.is_array() {
            format!("item {index}: ")
        } else {
            String::new()
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { value } => write!(f, "{value}"),
            Self::Array { items, .. } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::text(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::text(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::integer(v)
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(v: serde_json::Value) -> Self {
        Self::json(v)
    }
}

/// A compiled regex that compares, hashes and serializes by its source pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegexPattern(Regex);

impl RegexPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConstraint` if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| ValidationError::InvalidConstraint {
                reason: format!("invalid regex '{pattern}': {e}"),
            })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    #[must_use]
    pub const fn regex(&self) -> &Regex {
        &self.0
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RegexPattern {}

impl std::hash::Hash for RegexPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for RegexPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RegexPattern {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<RegexPattern> for String {
    fn from(p: RegexPattern) -> Self {
        p.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_types() {
        assert_eq!(AttributeValue::text("a").value_type(), AttributeValueType::Text);
        assert_eq!(
            AttributeValue::multiline_text("a\nb").value_type(),
            AttributeValueType::MultilineText
        );
        assert_eq!(AttributeValue::integer(3).value_type(), AttributeValueType::Integer);
        assert_eq!(AttributeValue::json(json!({"a": 1})).value_type(), AttributeValueType::Json);
        assert_eq!(AttributeValue::yaml("a: 1").unwrap().value_type(), AttributeValueType::Yaml);
    }

    #[test]
    fn test_mixed_array_is_invalid() {
        let err = AttributeValue::array(
            AttributeValueType::Text,
            vec![ScalarValue::Text("a".into()), ScalarValue::Integer(1)],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { .. }));
    }

    #[test]
    fn test_single_line_text_with_newline_is_invalid() {
        assert!(AttributeValue::text("a\nb").validate().is_err());
        assert!(AttributeValue::multiline_text("a\nb").validate().is_ok());
    }

    #[test]
    fn test_build_from_raw_json() {
        let v = AttributeValue::build(AttributeValueType::Integer, false, &json!("42")).unwrap();
        assert_eq!(v, AttributeValue::integer(42));

        let v = AttributeValue::build(AttributeValueType::Text, true, &json!(["a", "b"])).unwrap();
        assert_eq!(v, AttributeValue::text_array(["a", "b"]));

        assert!(AttributeValue::build(AttributeValueType::Integer, false, &json!("x")).is_err());
        assert!(AttributeValue::build(AttributeValueType::Text, true, &json!("a")).is_err());
        assert!(AttributeValue::build(AttributeValueType::Yaml, false, &json!("a: [")).is_err());
    }

    #[test]
    fn test_equality_is_semantic_for_documents() {
        let a = AttributeValue::json(json!({"a": 1, "b": [1, 2]}));
        let b = AttributeValue::json(serde_json::from_str(r#"{ "b": [1,2], "a": 1 }"#).unwrap());
        assert_eq!(a, b);

        let y1 = AttributeValue::yaml("a: 1\nb: x").unwrap();
        let y2 = AttributeValue::yaml("a:   1\nb:   x\n").unwrap();
        assert_eq!(y1, y2);
    }

    #[test]
    fn test_text_and_multiline_are_distinct() {
        assert_ne!(AttributeValue::text("a"), AttributeValue::multiline_text("a"));
    }

    #[test]
    fn test_text_length_check() {
        let v = AttributeValue::text("abc");
        assert!(v.check_text_length(Some(1), Some(3)).is_empty());
        assert_eq!(v.check_text_length(Some(4), None).len(), 1);
        assert_eq!(v.check_text_length(None, Some(2)).len(), 1);
        assert_eq!(AttributeValue::integer(1).check_text_length(Some(1), None).len(), 1);

        let arr = AttributeValue::text_array(["", "ok", ""]);
        assert_eq!(arr.check_text_length(Some(1), None).len(), 2);
    }

    #[test]
    fn test_regex_check() {
        let re = Regex::new("^srv[0-9]+$").unwrap();
        assert!(AttributeValue::text("srv1").check_regex(&re).is_empty());
        assert_eq!(AttributeValue::text("db1").check_regex(&re).len(), 1);
        assert_eq!(AttributeValue::text_array(["srv1", "x"]).check_regex(&re).len(), 1);
    }

    #[test]
    fn test_array_length_check() {
        let arr = AttributeValue::integer_array([1, 2, 3]);
        assert!(arr.check_array_length(Some(1), Some(3)).is_empty());
        assert_eq!(arr.check_array_length(None, Some(2)).len(), 1);
        assert_eq!(AttributeValue::integer(1).check_array_length(None, None).len(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(AttributeValue::integer(7).to_string(), "7");
        assert_eq!(AttributeValue::text_array(["a", "b"]).to_string(), "[a, b]");
        assert_eq!(AttributeValue::json(json!({"a": 1})).to_string(), r#"{"a":1}"#);
        assert_eq!(AttributeValue::yaml("a: 1").unwrap().to_string(), "a: 1");
    }

    #[test]
    fn test_value_serialization() {
        let val = AttributeValue::text_array(["x", "y"]);
        let json = serde_json::to_string(&val).unwrap();
        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }

    #[test]
    fn test_regex_pattern_equality_by_source() {
        let a = RegexPattern::new("^a+$").unwrap();
        let b = RegexPattern::new("^a+$").unwrap();
        assert_eq!(a, b);
        assert!(a.is_match("aaa"));
        assert!(RegexPattern::new("(").is_err());

        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, r#""^a+$""#);
        let back: RegexPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
