//! Event-to-endpoint matching.
//!
//! An endpoint receives an event when it is active, subscribes to the
//! event's type, and all of its filters evaluate true. Filter fields are
//! dotted paths resolved against the event structure; an unresolved path
//! yields an absent value, which fails every operator unless the rule is
//! negated.

use fanout_core::models::{Endpoint, Event, FilterOp, FilterRule};
use serde_json::Value;
use tracing::warn;

/// Whether the endpoint must receive the given event.
pub fn endpoint_matches(endpoint: &Endpoint, event: &Event) -> bool {
    endpoint.is_active
        && endpoint.subscribes_to(&event.event_type)
        && endpoint.filters.iter().all(|rule| evaluate_filter(rule, event))
}

/// Evaluates a single filter rule against an event.
pub fn evaluate_filter(rule: &FilterRule, event: &Event) -> bool {
    let actual = resolve_field(event, &rule.field);
    let outcome = apply_op(rule.op, actual.as_ref(), &rule.value);
    if rule.negate {
        !outcome
    } else {
        outcome
    }
}

/// Resolves a dotted field path against the event structure.
///
/// Top-level roots are `id`, `source`, `type`, `created_at`, `metadata`,
/// and `payload`; the remaining segments descend into JSON objects by key
/// and arrays by numeric index.
fn resolve_field(event: &Event, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;

    match root {
        "id" => at_end(segments).then(|| Value::String(event.id.to_string())),
        "source" => at_end(segments).then(|| Value::String(event.source.clone())),
        "type" => at_end(segments).then(|| Value::String(event.event_type.clone())),
        "created_at" => at_end(segments).then(|| Value::String(event.created_at.to_rfc3339())),
        "metadata" => {
            let key = segments.next()?;
            if segments.next().is_some() {
                return None;
            }
            event.metadata.get(key).map(|v| Value::String(v.clone()))
        },
        "payload" => walk(&event.payload, segments),
        _ => None,
    }
}

fn at_end<'a>(mut segments: impl Iterator<Item = &'a str>) -> bool {
    segments.next().is_none()
}

fn walk<'a>(value: &Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Applies a comparison operator. Absent values fail every operator.
fn apply_op(op: FilterOp, actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    match op {
        FilterOp::Equals => actual == expected,
        FilterOp::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        FilterOp::Regex => {
            let Some(pattern) = expected.as_str() else {
                return false;
            };
            let Some(subject) = value_as_text(actual) else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(&subject),
                Err(error) => {
                    warn!(pattern, error = %error, "invalid filter regex");
                    false
                },
            }
        },
        FilterOp::In => expected.as_array().is_some_and(|items| items.contains(actual)),
        FilterOp::NotIn => expected.as_array().is_some_and(|items| !items.contains(actual)),
    }
}

/// Textual form of a scalar for regex matching.
fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
