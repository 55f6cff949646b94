//! Lenient parsing of provider answers into a structured analysis.
//!
//! Candidate text, in order:
//! 1. the interior of a block fenced with `json`, `yaml`, `yml` or `data`
//! 2. the interior of the first fenced block
//! 3. the whole answer, if it looks like an object
//!
//! The candidate is read as JSON. Blocks labelled `yaml`, `yml` or `data` may
//! also be YAML (which accepts flow mappings with bare keys such as
//! `{analysis: x}`). A mapping without any of the expected keys does not count.
//! Anything else becomes a raw-text analysis. Parsing never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::models::{ANALYSIS_KEYS, KEY_ANALYSIS, StructuredAnalysis};

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").expect("valid fence regex")
});

const DATA_LABELS: [&str; 4] = ["json", "yaml", "yml", "data"];
const YAML_LABELS: [&str; 3] = ["yaml", "yml", "data"];

/// Text to parse and whether it may be YAML
struct Candidate<'a> {
    body: &'a str,
    allow_yaml: bool,
}

pub fn parse_analysis_response(text: &str) -> StructuredAnalysis {
    candidate(text)
        .and_then(parse_mapping)
        .filter(has_expected_key)
        .unwrap_or_else(|| raw_text_analysis(text))
}

fn candidate(text: &str) -> Option<Candidate<'_>> {
    let blocks: Vec<(String, &str)> = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let label = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            caps.get(2).map(|body| (label, body.as_str()))
        })
        .collect();

    let chosen = blocks
        .iter()
        .find(|(label, _)| DATA_LABELS.contains(&label.as_str()))
        .or_else(|| blocks.first());
    if let Some((label, body)) = chosen {
        return Some(Candidate { body: *body, allow_yaml: YAML_LABELS.contains(&label.as_str()) });
    }

    let trimmed = text.trim();
    trimmed.starts_with('{').then_some(Candidate { body: trimmed, allow_yaml: false })
}

fn parse_mapping(candidate: Candidate<'_>) -> Option<StructuredAnalysis> {
    let body = candidate.body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        return Some(map);
    }
    if !candidate.allow_yaml {
        return None;
    }

    match serde_yaml::from_str::<serde_yaml::Value>(body) {
        Ok(serde_yaml::Value::Mapping(mapping)) => Some(yaml_mapping_to_json(mapping)),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Analysis response is not structured: {}", e);
            None
        },
    }
}

fn has_expected_key(map: &StructuredAnalysis) -> bool {
    ANALYSIS_KEYS.iter().any(|key| map.contains_key(*key))
}

fn yaml_mapping_to_json(mapping: serde_yaml::Mapping) -> Map<String, Value> {
    mapping
        .into_iter()
        .filter_map(|(key, value)| {
            let key = match key {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key, yaml_to_json(value)))
        })
        .collect()
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        },
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        },
        serde_yaml::Value::Mapping(mapping) => Value::Object(yaml_mapping_to_json(mapping)),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

/// Whole answer as the analysis, every other expected key empty
fn raw_text_analysis(text: &str) -> StructuredAnalysis {
    let mut map = Map::new();
    for key in ANALYSIS_KEYS {
        let value = if key == KEY_ANALYSIS { text.to_string() } else { String::new() };
        map.insert(key.to_string(), Value::String(value));
    }
    map
}
