//! Input guard: scrubs untrusted JSON values before they reach a plugin's
//! compute function, when `EngineOptions::sanitize_input` is enabled.
//!
//! Grounded on the input-validation pass `langgraph_core`'s `state.rs`
//! applies to incoming channel updates before merging them into graph
//! state, generalized here to a recursive JSON sanitizer with a
//! configurable depth ceiling and a dangerous-key denylist.

use crate::error::{EngineError, Result};
use crate::options::EngineOptions;
use regex::Regex;
use std::sync::OnceLock;

/// Keys that are stripped from any object, regardless of depth, because
/// they name JavaScript-prototype-pollution vectors. Irrelevant to this
/// engine's own execution, but traffic passing through it may be consumed
/// by a downstream JS boundary, so the guard still denies them.
const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

const MAX_STRING_LEN: usize = 64 * 1024;

fn dangerous_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)<script\b|javascript:|on\w+\s*=").expect("static pattern is valid")
    })
}

/// Recursively sanitizes `value`, enforcing `max_depth` and stripping
/// dangerous keys. In non-strict mode (the default) violations are logged
/// and the offending subtree is replaced with `null` rather than failing
/// the whole compute; in strict mode the first violation is an error.
pub fn sanitize(value: serde_json::Value, options: &EngineOptions, context: &str) -> Result<serde_json::Value> {
    if !options.sanitize_input {
        return Ok(value);
    }
    sanitize_at_depth(value, options.max_depth, context, false)
}

/// Strict variant used where a violation must hard-fail the caller (e.g.
/// accepting a new node's config at graph-construction time).
pub fn sanitize_strict(
    value: serde_json::Value,
    max_depth: usize,
    context: &str,
) -> Result<serde_json::Value> {
    sanitize_at_depth(value, max_depth, context, true)
}

fn sanitize_at_depth(
    value: serde_json::Value,
    remaining_depth: usize,
    context: &str,
    strict: bool,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) if s.len() > MAX_STRING_LEN => {
            reject_or_null(strict, context, "string exceeds maximum length")
        }
        serde_json::Value::String(s) if dangerous_pattern().is_match(&s) => {
            reject_or_null(strict, context, "string matches a dangerous pattern")
        }
        serde_json::Value::Array(items) => {
            if remaining_depth == 0 {
                return reject_or_null(strict, context, "maximum nesting depth exceeded");
            }
            let mut sanitized = Vec::with_capacity(items.len());
            for item in items {
                sanitized.push(sanitize_at_depth(item, remaining_depth - 1, context, strict)?);
            }
            Ok(serde_json::Value::Array(sanitized))
        }
        serde_json::Value::Object(map) => {
            if remaining_depth == 0 {
                return reject_or_null(strict, context, "maximum nesting depth exceeded");
            }
            let mut sanitized = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    if strict {
                        return Err(EngineError::InputGuardError {
                            context: context.to_string(),
                            value: key,
                        });
                    }
                    tracing::warn!(context, key = %key, "input guard stripped dangerous key");
                    continue;
                }
                sanitized.insert(key, sanitize_at_depth(val, remaining_depth - 1, context, strict)?);
            }
            Ok(serde_json::Value::Object(sanitized))
        }
        other => Ok(other),
    }
}

fn reject_or_null(strict: bool, context: &str, reason: &str) -> Result<serde_json::Value> {
    if strict {
        Err(EngineError::InputGuardError {
            context: context.to_string(),
            value: reason.to_string(),
        })
    } else {
        tracing::warn!(context, reason, "input guard rejected value");
        Ok(serde_json::Value::Null)
    }
}
