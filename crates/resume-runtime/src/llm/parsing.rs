//! Parsing helpers for free-text chat responses: balanced-brace JSON
//! extraction and the array-or-string field coercion.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Strips Markdown code fences (```json ... ``` or ``` ... ```) before
/// scanning for JSON, then returns the first balanced `{…}` object found,
/// tolerating leading/trailing prose. Bracket depth tracking respects
/// quoted strings and escape sequences so braces inside string values
/// don't skew the count.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let cleaned = strip_code_fences(raw);
    let bytes = cleaned.as_bytes();
    let start = cleaned.find('{')?;

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(cleaned[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fences(raw: &str) -> std::borrow::Cow<'_, str> {
    if !raw.contains("```") {
        return std::borrow::Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut in_fence = false;
    for line in raw.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    std::borrow::Cow::Owned(out)
}

/// Array-or-string coercion for `skills` / `domainKnowledge` /
/// `academicBackground`. An array is joined with `", "`; a scalar string
/// is kept as-is. Applied at the gateway boundary so the stored shape in
/// the database stays a plain comma-joined string either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringOrArray(pub String);

impl<'de> Deserialize<'de> for StringOrArray {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Arr(Vec<String>),
        }

        match Repr::deserialize(deserializer) {
            Ok(Repr::Str(s)) => Ok(StringOrArray(s)),
            Ok(Repr::Arr(items)) => Ok(StringOrArray(items.join(", "))),
            Err(e) => Err(de::Error::custom(format!("expected string or array of strings: {e}"))),
        }
    }
}

impl From<StringOrArray> for String {
    fn from(v: StringOrArray) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_object() {
        let raw = r#"{"name":"J. Doe","skills":["Java","Go"]}"#;
        assert_eq!(extract_json_object(raw).unwrap(), raw);
    }

    #[test]
    fn extracts_object_with_leading_and_trailing_prose() {
        let raw = "Sure, here is the extraction:\n{\"name\":\"Jane\"}\nLet me know if you need more.";
        assert_eq!(extract_json_object(raw).unwrap(), r#"{"name":"Jane"}"#);
    }

    #[test]
    fn extracts_object_inside_markdown_fence() {
        let raw = "```json\n{\"name\":\"Jane\"}\n```";
        assert_eq!(extract_json_object(raw).unwrap(), r#"{"name":"Jane"}"#);
    }

    #[test]
    fn ignores_braces_inside_string_values() {
        let raw = r#"{"note":"use {curly} braces carefully","ok":true}"#;
        assert_eq!(extract_json_object(raw).unwrap(), raw);
    }

    #[test]
    fn returns_none_when_no_object_present() {
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn coerces_array_to_joined_string() {
        let v: StringOrArray = serde_json::from_str(r#"["A","B"]"#).unwrap();
        assert_eq!(v.0, "A, B");
    }

    #[test]
    fn keeps_scalar_string_as_is() {
        let v: StringOrArray = serde_json::from_str(r#""A, B""#).unwrap();
        assert_eq!(v.0, "A, B");
    }

    #[test]
    fn array_and_scalar_forms_produce_same_value() {
        let from_array: StringOrArray = serde_json::from_str(r#"["A","B"]"#).unwrap();
        let from_scalar: StringOrArray = serde_json::from_str(r#""A, B""#).unwrap();
        assert_eq!(from_array, from_scalar);
    }
}
