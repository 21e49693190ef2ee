//! A minimal JSONPath-like selector evaluator.
//!
//! Manifests declare paths like `$.choices[0].delta.content` or
//! `$.content_block.input`. Supports dotted field access and numeric
//! array indexing; nothing fancier (no wildcards, filters, or slices) is
//! needed for the field-extraction role selectors play here.

use serde_json::Value;

/// One parsed segment of a selector path.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// A compiled selector, ready to evaluate against any number of frames.
#[derive(Debug, Clone)]
pub struct Selector {
    raw: String,
    segments: Vec<Segment>,
}

impl Selector {
    /// Parses a `$.`-prefixed path. Returns `None` if the path is
    /// syntactically invalid; callers should validate manifests (which
    /// rejects bad paths) before ever constructing a `Selector`.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let body = path.strip_prefix('$')?;
        let mut segments = Vec::new();
        let mut rest = body;

        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                rest = after_dot;
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                let (field, remainder) = rest.split_at(end);
                if field.is_empty() {
                    return None;
                }
                segments.push(Segment::Field(field.to_string()));
                rest = remainder;
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let end = after_bracket.find(']')?;
                let (index_str, remainder) = after_bracket.split_at(end);
                let index: usize = index_str.parse().ok()?;
                segments.push(Segment::Index(index));
                rest = &remainder[1..];
            } else {
                return None;
            }
        }

        Some(Self { raw: path.to_string(), segments })
    }

    /// The original path string, for error messages and observability.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluates this selector against `value`, returning the matched
    /// sub-value if the full path resolves.
    #[must_use]
    pub fn evaluate<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Field(name), Value::Object(map)) => map.get(name)?,
                (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Evaluates this selector and extracts the result as a string, for
    /// content-delta-shaped selections where the value is expected to be a
    /// JSON string.
    #[must_use]
    pub fn evaluate_str<'v>(&self, value: &'v Value) -> Option<&'v str> {
        self.evaluate(value)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dotted_path() {
        let selector = Selector::parse("$.delta.text").unwrap();
        assert_eq!(selector.segments, vec![Segment::Field("delta".into()), Segment::Field("text".into())]);
    }

    #[test]
    fn test_parse_with_array_index() {
        let selector = Selector::parse("$.choices[0].delta.content").unwrap();
        assert_eq!(
            selector.segments,
            vec![
                Segment::Field("choices".into()),
                Segment::Index(0),
                Segment::Field("delta".into()),
                Segment::Field("content".into()),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_missing_dollar() {
        assert!(Selector::parse("delta.text").is_none());
    }

    #[test]
    fn test_evaluate_nested_array() {
        let selector = Selector::parse("$.choices[0].delta.content").unwrap();
        let frame = json!({"choices": [{"delta": {"content": "Hel"}}]});
        assert_eq!(selector.evaluate_str(&frame), Some("Hel"));
    }

    #[test]
    fn test_evaluate_missing_path_returns_none() {
        let selector = Selector::parse("$.choices[0].delta.content").unwrap();
        let frame = json!({"choices": []});
        assert_eq!(selector.evaluate(&frame), None);
    }

    #[test]
    fn test_evaluate_top_level_field() {
        let selector = Selector::parse("$.usage").unwrap();
        let frame = json!({"usage": {"input_tokens": 5}});
        assert_eq!(selector.evaluate(&frame), Some(&json!({"input_tokens": 5})));
    }
}
