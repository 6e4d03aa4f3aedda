//! Best-effort parsing of truncated JSON text.
//!
//! A streaming model response is a growing prefix of one JSON document. Each prefix is
//! turned into the most complete value it implies: unterminated strings are closed,
//! open arrays and objects are closed, and anything that cannot be completed honestly
//! (a dangling key, a half-written `tru`, a trailing `-`) is dropped.

use serde_json::{Map, Number, Value};

/// Parse a possibly-truncated JSON prefix. `None` when nothing is parseable yet.
pub fn parse_partial(text: &str) -> Option<Value> {
    let text = strip_code_fence(text);
    let mut parser = PartialParser {
        bytes: text.as_bytes(),
        text,
        pos: 0,
    };
    parser.skip_ws();
    parser.parse_value()
}

/// Strictly parse a finished response, tolerating surrounding markdown fences.
///
/// The first complete value wins; prose the model appends after it is ignored.
pub fn parse_complete(text: &str) -> Result<Value, serde_json::Error> {
    let body = strip_code_fence(text).trim();
    match serde_json::Deserializer::from_str(body).into_iter::<Value>().next() {
        Some(value) => value,
        // Empty input: let the strict parser produce its EOF error
        None => serde_json::from_str(body),
    }
}

/// Split `text` into `chunk_size` pieces and parse each growing prefix, keeping only
/// snapshots that differ from the previous one.
pub fn snapshots_from_text(text: &str, chunk_size: usize) -> Vec<Value> {
    let chunk_size = chunk_size.max(1);
    let mut snapshots: Vec<Value> = Vec::new();
    let mut end = 0;
    while end < text.len() {
        end = (end + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        if let Some(snapshot) = parse_partial(&text[..end]) {
            if snapshots.last() != Some(&snapshot) {
                snapshots.push(snapshot);
            }
        }
    }
    snapshots
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = match rest.find('\n') {
                Some(newline) => &rest[newline + 1..],
                None => return "",
            };
            match body.rfind("```") {
                Some(close) => &body[..close],
                None => body,
            }
        }
        None => trimmed,
    }
}

struct PartialParser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PartialParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        match self.peek()? {
            b'{' => Some(self.parse_object()),
            b'[' => Some(self.parse_array()),
            b'"' => self.parse_string().map(|(s, _)| Value::String(s)),
            b't' => self.parse_literal("true", Value::Bool(true)),
            b'f' => self.parse_literal("false", Value::Bool(false)),
            b'n' => self.parse_literal("null", Value::Null),
            b'-' | b'0'..=b'9' => self.parse_number(),
            _ => None,
        }
    }

    fn parse_object(&mut self) -> Value {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'"') => {}
                Some(_) => break,
            }
            let key = match self.parse_string() {
                Some((key, true)) => key,
                _ => break,
            };
            self.skip_ws();
            if self.peek() != Some(b':') {
                break;
            }
            self.pos += 1;
            self.skip_ws();
            match self.parse_value() {
                Some(value) => {
                    map.insert(key, value);
                }
                None => break,
            }
        }
        Value::Object(map)
    }

    fn parse_array(&mut self) -> Value {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(_) => {}
            }
            match self.parse_value() {
                Some(value) => items.push(value),
                None => break,
            }
        }
        Value::Array(items)
    }

    /// Returns the decoded string and whether its closing quote was seen.
    fn parse_string(&mut self) -> Option<(String, bool)> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &self.text[self.pos..];
            let ch = match rest.chars().next() {
                Some(ch) => ch,
                None => return Some((out, false)),
            };
            match ch {
                '"' => {
                    self.pos += 1;
                    return Some((out, true));
                }
                '\\' => {
                    let escape = match rest[1..].chars().next() {
                        Some(escape) => escape,
                        None => {
                            self.pos = self.bytes.len();
                            return Some((out, false));
                        }
                    };
                    self.pos += 1 + escape.len_utf8();
                    match escape {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'u' => {
                            let hex = self.text.get(self.pos..self.pos + 4);
                            match hex.and_then(|h| u32::from_str_radix(h, 16).ok()) {
                                Some(code) => {
                                    self.pos += 4;
                                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                                }
                                None => {
                                    self.pos = self.bytes.len();
                                    return Some((out, false));
                                }
                            }
                        }
                        other => out.push(other),
                    }
                }
                other => {
                    self.pos += other.len_utf8();
                    out.push(other);
                }
            }
        }
    }

    fn parse_literal(&mut self, word: &str, value: Value) -> Option<Value> {
        let rest = &self.text[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            Some(value)
        } else {
            None
        }
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9')
        ) {
            self.pos += 1;
        }
        // a number running to the end of the buffer may still be growing
        if self.pos >= self.bytes.len() {
            return None;
        }
        let raw = &self.text[start..self.pos];
        if let Ok(int) = raw.parse::<i64>() {
            return Some(Value::Number(int.into()));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closes_open_containers_and_strings() {
        assert_eq!(
            parse_partial(r#"[{"type": "flashcard", "frontContent": "What is"#),
            Some(json!([{"type": "flashcard", "frontContent": "What is"}]))
        );
    }

    #[test]
    fn drops_dangling_keys_and_partial_literals() {
        assert_eq!(parse_partial(r#"{"1": {"a": 1}, "2"#), Some(json!({"1": {"a": 1}})));
        assert_eq!(parse_partial(r#"{"1": {"a": 1}, "2":"#), Some(json!({"1": {"a": 1}})));
        assert_eq!(parse_partial(r#"{"ok": tr"#), Some(json!({})));
        assert_eq!(parse_partial(r#"{"n": 12"#), Some(json!({})));
        assert_eq!(parse_partial(r#"{"n": 12}"#), Some(json!({"n": 12})));
    }

    #[test]
    fn later_elements_only_appear_after_earlier_ones_close() {
        let snapshot = parse_partial(r#"[{"a": "x"}, {"b": "#).unwrap();
        assert_eq!(snapshot, json!([{"a": "x"}, {}]));
    }

    #[test]
    fn handles_escapes_and_unicode() {
        assert_eq!(
            parse_partial(r#"["a\"b\né", "ü"#),
            Some(json!(["a\"b\né", "ü"]))
        );
        assert_eq!(parse_partial(r#"["a\"#), Some(json!(["a"])));
    }

    #[test]
    fn nothing_parseable_yet() {
        assert_eq!(parse_partial(""), None);
        assert_eq!(parse_partial("   "), None);
        assert_eq!(parse_partial("Sure, here"), None);
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(
            parse_complete("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(parse_partial("```json\n[1, "), Some(json!([1])));
    }

    #[test]
    fn trailing_prose_after_a_complete_document_is_ignored() {
        assert_eq!(
            parse_complete("[{\"a\": 1}, {\"a\": 2}]\nHope this helps!").unwrap(),
            json!([{"a": 1}, {"a": 2}])
        );
        assert!(parse_complete("[{\"a\": 1}").is_err());
        assert!(parse_complete("").is_err());
        assert!(parse_complete("Sure! [1]").is_err());
    }

    #[test]
    fn snapshots_grow_monotonically_and_end_complete() {
        let text = r#"[{"type":"slide","title":"One"},{"type":"slide","title":"Two"}]"#;
        let snapshots = snapshots_from_text(text, 7);
        assert!(snapshots.len() > 2);
        assert_eq!(snapshots.last().unwrap(), &parse_complete(text).unwrap());
    }
}
