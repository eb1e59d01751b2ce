//! `{{path.to.value}}` templates over JSON.
//!
//! A string that is exactly one placeholder is replaced by the referenced
//! value with its JSON type intact. Placeholders embedded in longer strings
//! are interpolated: strings verbatim, everything else as compact JSON.
//! Paths are dotted; array elements are addressed as `items.0` or
//! `items[0]`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::{ProcflowError, Result};

const PLACEHOLDER: &str = r"\{\{\s*([^{}]+?)\s*\}\}";

fn placeholder() -> Result<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER).ok())
        .as_ref()
        .ok_or_else(|| ProcflowError::Template("placeholder pattern failed to compile".into()))
}

fn whole_placeholder() -> Result<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^{PLACEHOLDER}$")).ok())
        .as_ref()
        .ok_or_else(|| ProcflowError::Template("placeholder pattern failed to compile".into()))
}

/// Resolve a dotted path inside `scope`.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    normalized
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(scope, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Render every string inside `template` against `scope`.
pub fn render(template: &Value, scope: &Value) -> Result<Value> {
    match template {
        Value::String(s) => render_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| render(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), render(v, scope)?)))
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve<'a>(scope: &'a Value, path: &str) -> Result<&'a Value> {
    lookup(scope, path)
        .ok_or_else(|| ProcflowError::Template(format!("unresolved placeholder {{{{{path}}}}}")))
}

fn render_str(s: &str, scope: &Value) -> Result<Value> {
    if let Some(caps) = whole_placeholder()?.captures(s) {
        return Ok(resolve(scope, &caps[1])?.clone());
    }

    let re = placeholder()?;
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        match resolve(scope, path.as_str())? {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

/// Render a template that must produce text.
pub fn render_text(template: &str, scope: &Value) -> Result<String> {
    Ok(match render_str(template, scope)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "inputs": {"target": "api.example.com", "threshold": 3},
            "results": {"scan": {"count": 5, "hosts": ["a", "b"]}}
        })
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let out = render(
            &json!({"n": "{{results.scan.count}}", "hosts": "{{ results.scan.hosts }}"}),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, json!({"n": 5, "hosts": ["a", "b"]}));
    }

    #[test]
    fn test_embedded_placeholders_interpolate() {
        let out = render(
            &json!("scan {{inputs.target}} found {{results.scan.count}} on {{results.scan.hosts[1]}}"),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, json!("scan api.example.com found 5 on b"));
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = render(&json!(["{{results.nope}}"]), &scope()).unwrap_err();
        assert!(matches!(err, ProcflowError::Template(msg) if msg.contains("results.nope")));
    }

    #[test]
    fn test_non_strings_pass_through() {
        let t = json!({"a": 1, "b": [true, null]});
        assert_eq!(render(&t, &scope()).unwrap(), t);
    }

    #[test]
    fn test_lookup_array_index_forms() {
        let s = scope();
        assert_eq!(lookup(&s, "results.scan.hosts.0"), Some(&json!("a")));
        assert_eq!(lookup(&s, "results.scan.hosts[1]"), Some(&json!("b")));
        assert_eq!(lookup(&s, "results.scan.hosts[9]"), None);
    }
}
