//! Field path resolution over untyped provider payloads.
//!
//! A path is a dot-separated list of segments. A segment may end in `[]` to
//! flatten an array, or `[Key]` to pick the value of the `Key`/`Value` entry
//! whose key matches (the shape cloud APIs use for tag lists):
//!
//! ```text
//! VpcId
//! SecurityGroups[].GroupId
//! BlockDeviceMappings[].Ebs.VolumeId
//! Tags[Name]
//! ```
//!
//! Resolution never fails: a missing or mistyped step yields no values.

use serde_json::Value;

use crate::schema::Tags;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Field,
    Flatten,
    Keyed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    name: String,
    selector: Selector,
}

/// Split on dots that are not inside brackets, so `Tags[app.tier]` is one segment.
fn split_segments(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&path[start..]);
    segments
}

fn parse_segment(raw: &str) -> Segment {
    if let Some(open) = raw.find('[') {
        if raw.ends_with(']') {
            let name = raw[..open].to_string();
            let inner = &raw[open + 1..raw.len() - 1];
            let selector = if inner.is_empty() {
                Selector::Flatten
            } else {
                Selector::Keyed(inner.to_string())
            };
            return Segment { name, selector };
        }
    }
    Segment {
        name: raw.to_string(),
        selector: Selector::Field,
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    if name.is_empty() {
        return Some(value);
    }
    value.as_object().and_then(|obj| obj.get(name))
}

/// Look up a key/value entry field, accepting both `Key` and `key` casings.
fn entry_field<'a>(entry: &'a Value, upper: &str, lower: &str) -> Option<&'a Value> {
    let obj = entry.as_object()?;
    obj.get(upper).or_else(|| obj.get(lower))
}

fn apply<'a>(segment: &Segment, current: &'a Value, out: &mut Vec<&'a Value>) {
    let Some(value) = field(current, &segment.name) else {
        return;
    };
    match &segment.selector {
        Selector::Field => out.push(value),
        Selector::Flatten => {
            if let Some(items) = value.as_array() {
                out.extend(items.iter());
            }
        }
        Selector::Keyed(key) => {
            if let Some(items) = value.as_array() {
                let found = items.iter().find(|entry| {
                    entry_field(entry, "Key", "key").and_then(Value::as_str) == Some(key.as_str())
                });
                if let Some(v) = found.and_then(|entry| entry_field(entry, "Value", "value")) {
                    out.push(v);
                }
            } else if let Some(v) = value.as_object().and_then(|obj| obj.get(key)) {
                out.push(v);
            }
        }
    }
}

fn coerce(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Resolve `path` against `record`, returning every matching leaf as a string.
pub fn resolve(record: &Value, path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }

    let mut current: Vec<&Value> = vec![record];
    for raw in split_segments(path) {
        let segment = parse_segment(raw);
        let mut next = Vec::new();
        for value in &current {
            apply(&segment, value, &mut next);
        }
        if next.is_empty() {
            return Vec::new();
        }
        current = next;
    }

    current.into_iter().filter_map(coerce).collect()
}

/// Resolve `path` and keep only the first value.
pub fn resolve_first(record: &Value, path: &str) -> Option<String> {
    resolve(record, path).into_iter().next()
}

/// Read a tag collection at `path`.
///
/// Accepts a list of key/value entries (`Key`/`Value` or `key`/`value`) or a
/// plain object of strings. Anything else yields no tags.
pub fn resolve_tags(record: &Value, path: &str) -> Tags {
    let mut tags = Tags::new();
    let target = if path.is_empty() {
        Some(record)
    } else {
        split_segments(path)
            .into_iter()
            .try_fold(record, |value, raw| field(value, &parse_segment(raw).name))
    };

    match target {
        Some(Value::Array(entries)) => {
            for entry in entries {
                let key = entry_field(entry, "Key", "key").and_then(coerce);
                let value = entry_field(entry, "Value", "value").and_then(coerce);
                if let (Some(key), Some(value)) = (key, value) {
                    tags.insert(key, value);
                }
            }
        }
        Some(Value::Object(obj)) => {
            for (key, value) in obj {
                if let Some(value) = coerce(value) {
                    tags.insert(key.clone(), value);
                }
            }
        }
        _ => {}
    }
    tags
}
