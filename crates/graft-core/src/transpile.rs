//! DSL-to-script transpilation.
//!
//! Handler bodies are rewritten into the canonical script form through a
//! fixed, ordered sequence of textual passes:
//!
//! 1. keyword normalization — `set` becomes `let`, word-form operators
//!    (`and`, `or`, `not`, `is`, `isnt`) become symbolic ones;
//! 2. interpolation — `${expr}` inside string literals becomes the native
//!    `{expr}` form, bare braces are escaped to `{{` / `}}`;
//! 3. helper call forms — author shorthands (`errorembed`, `successembed`,
//!    `timespan`, `tag`, `wait`) become their capability-surface names;
//! 4. context injection — the bound context values and parameters are
//!    prepended as `let` statements.
//!
//! The order is significant: call-form substitution assumes operators and
//! keywords are already normalized. Passes 1 and 3 only touch text outside
//! string literals, so a body that happens to contain a rewrite pattern
//! inside a string is left alone. There is no implicit-await pass: every
//! capability call is asynchronous in the evaluator, so sequencing never
//! depends on recognizing call names.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::context::ExecContext;

static WORD_OPS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("set", "let"),
        ("isnt", "!="),
        ("is", "=="),
        ("and", "&&"),
        ("or", "||"),
        ("not", "!"),
    ]
    .iter()
    .map(|(word, sym)| (Regex::new(&format!(r"\b{word}\b")).unwrap(), *sym))
    .collect()
});

static HELPER_CALLS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    [
        ("errorembed", "embed_error"),
        ("successembed", "embed_success"),
        ("timespan", "format_duration"),
        ("tag", "user_tag"),
        ("wait", "sleep"),
    ]
    .iter()
    .map(|(short, full)| {
        (
            Regex::new(&format!(r"\b{short}\(")).unwrap(),
            format!("{full}("),
        )
    })
    .collect()
});

/// Applies `code` to every segment outside double-quoted string literals and
/// `lit` to every literal's inner content, preserving the quotes themselves.
fn map_segments(
    src: &str,
    mut code: impl FnMut(&str) -> String,
    mut lit: impl FnMut(&str) -> String,
) -> String {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut seg_start = 0;
    let mut in_str = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_str => i += 1,
            b'"' => {
                let segment = &src[seg_start..i];
                if in_str {
                    out.push_str(&lit(segment));
                } else {
                    out.push_str(&code(segment));
                }
                out.push('"');
                in_str = !in_str;
                seg_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    let tail = &src[seg_start..];
    if in_str {
        out.push_str(&lit(tail));
    } else {
        out.push_str(&code(tail));
    }
    out
}

/// Rewrites `${expr}` to `{expr}` and escapes bare braces inside one string
/// literal's content.
fn rewrite_interpolation(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len() + 4);
    let mut run = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                out.push_str(&s[run..i]);
                match s[i + 2..].find('}') {
                    Some(offset) => {
                        let close = i + 2 + offset;
                        out.push('{');
                        out.push_str(&s[i + 2..close]);
                        out.push('}');
                        i = close + 1;
                    }
                    None => {
                        // Unterminated marker: keep it as literal text.
                        out.push_str("${{");
                        i += 2;
                    }
                }
                run = i;
            }
            b'{' => {
                out.push_str(&s[run..i]);
                out.push_str("{{");
                i += 1;
                run = i;
            }
            b'}' => {
                out.push_str(&s[run..i]);
                out.push_str("}}");
                i += 1;
                run = i;
            }
            _ => i += 1,
        }
    }
    out.push_str(&s[run..]);
    out
}

fn normalize_keywords(code: &str) -> String {
    let mut text = code.to_string();
    for (pattern, replacement) in WORD_OPS.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text
}

fn substitute_helpers(code: &str) -> String {
    let mut text = code.to_string();
    for (pattern, replacement) in HELPER_CALLS.iter() {
        text = pattern.replace_all(&text, replacement.as_str()).into_owned();
    }
    text
}

/// Runs the syntactic passes (1–3) without context injection.
pub fn apply_passes(src: &str) -> String {
    let pass1 = map_segments(src, normalize_keywords, |lit| lit.to_string());
    let pass2 = map_segments(&pass1, |code| code.to_string(), rewrite_interpolation);
    map_segments(&pass2, substitute_helpers, |lit| lit.to_string())
}

/// Serializes a bound value as a script literal.
///
/// Strings get their braces escaped so injected content can never be
/// re-interpolated; objects become object literals with quoted keys.
pub fn value_literal(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let quoted =
                serde_json::to_string(s).expect("string serialization is infallible");
            quoted.replace('{', "{{").replace('}', "}}")
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(value_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(key, v)| {
                    let quoted_key = serde_json::to_string(key)
                        .expect("string serialization is infallible");
                    format!("{}: {}", quoted_key, value_literal(v))
                })
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        other => other.to_string(),
    }
}

/// Transpiles a handler body given its execution context and bound
/// parameters. The result is canonical script text ready for parsing.
pub fn transpile(body: &str, ctx: &ExecContext, params: &[(String, Value)]) -> String {
    let rewritten = apply_passes(body);

    let mut out = String::with_capacity(rewritten.len() + 128);
    for (name, value) in ctx.bindings() {
        out.push_str("let ");
        out.push_str(name);
        out.push_str(" = ");
        out.push_str(&value_literal(&value));
        out.push('\n');
    }
    for (name, value) in params {
        out.push_str("let ");
        out.push_str(name);
        out.push_str(" = ");
        out.push_str(&value_literal(value));
        out.push('\n');
    }
    out.push_str(&rewritten);
    out
}

/// Transpiles a listener predicate: syntactic passes only, no injection.
/// Context values reach predicates through the evaluator environment.
pub fn transpile_predicate(predicate: &str) -> String {
    apply_passes(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_ctx() -> ExecContext {
        ExecContext::Message {
            guild_id: "g1".into(),
            channel_id: "c1".into(),
            message_id: "m1".into(),
            user_id: "u1".into(),
            user_name: "ada".into(),
            content: "hello there".into(),
        }
    }

    #[test]
    fn normalizes_keywords_and_word_operators() {
        let out = apply_passes("set x = a is 1 and b isnt 2 or not c");
        assert_eq!(out, "let x = a == 1 && b != 2 || ! c");
    }

    #[test]
    fn leaves_patterns_inside_string_literals_alone() {
        // The flagged lexical-ambiguity edge case: rewrite patterns inside a
        // string literal must survive untouched.
        let out = apply_passes(r#"send("please set this and that, it is fine")"#);
        assert_eq!(out, r#"send("please set this and that, it is fine")"#);
    }

    #[test]
    fn rewrites_interpolation_markers() {
        let out = apply_passes(r#"send("hi ${user_name}, ${count} left")"#);
        assert_eq!(out, r#"send("hi {user_name}, {count} left")"#);
    }

    #[test]
    fn escapes_bare_braces_in_strings() {
        let out = apply_passes(r#"send("a { b } c")"#);
        assert_eq!(out, r#"send("a {{ b }} c")"#);
    }

    #[test]
    fn keeps_unterminated_marker_literal() {
        let out = apply_passes(r#"send("price: ${amount")"#);
        assert_eq!(out, r#"send("price: ${{amount")"#);
    }

    #[test]
    fn substitutes_helper_call_forms() {
        let out = apply_passes("errorembed(\"no\")\nsuccessembed(\"yes\")\ntimespan(90)\ntag(user)\nwait(2)");
        assert_eq!(
            out,
            "embed_error(\"no\")\nembed_success(\"yes\")\nformat_duration(90)\nuser_tag(user)\nsleep(2)"
        );
    }

    #[test]
    fn helper_substitution_does_not_touch_longer_names() {
        // user_tag( already contains tag( but has no word boundary.
        let out = apply_passes("user_tag(user)");
        assert_eq!(out, "user_tag(user)");
    }

    #[test]
    fn injects_context_bindings_first() {
        let out = transpile("send(content)", &message_ctx(), &[]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], r#"let guild = "g1""#);
        assert_eq!(lines[1], r#"let channel = "c1""#);
        assert_eq!(lines[5], r#"let content = "hello there""#);
        assert_eq!(*lines.last().unwrap(), "send(content)");
    }

    #[test]
    fn injects_parameters_after_context() {
        let params = vec![
            ("target".to_string(), Value::String("bob".into())),
            ("times".to_string(), Value::from(3)),
        ];
        let out = transpile("send(target)", &message_ctx(), &params);
        assert!(out.contains("let target = \"bob\"\n"));
        assert!(out.contains("let times = 3\n"));
    }

    #[test]
    fn injected_strings_cannot_be_reinterpolated() {
        // A message containing brace syntax must arrive as literal text.
        let ctx = ExecContext::Message {
            guild_id: "g".into(),
            channel_id: "c".into(),
            message_id: "m".into(),
            user_id: "u".into(),
            user_name: "n".into(),
            content: "{user} and ${guild}".into(),
        };
        let out = transpile("send(content)", &ctx, &[]);
        assert!(out.contains(r#"let content = "{{user}} and ${{guild}}""#));
    }

    #[test]
    fn value_literal_handles_objects_and_arrays() {
        let value = serde_json::json!({"text": "hi", "count": 2, "flags": [true, false]});
        let lit = value_literal(&value);
        assert!(lit.starts_with('{') && lit.ends_with('}'));
        assert!(lit.contains("\"text\": \"hi\""));
        assert!(lit.contains("\"count\": 2"));
        assert!(lit.contains("\"flags\": [true, false]"));
    }

    #[test]
    fn predicate_transpile_applies_passes_only() {
        let out = transpile_predicate("content contains \"hi\" and user isnt \"bot\"");
        assert_eq!(out, "content contains \"hi\" && user != \"bot\"");
    }
}
