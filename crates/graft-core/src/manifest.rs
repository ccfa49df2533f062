//! Plugin manifest and settings-schema parsing.
//!
//! The manifest block declares a plugin's identity and the capability scopes
//! it requests; the settings block declares the typed configuration surface
//! guild administrators may override. Both are located by a header pattern
//! and pulled out with the block extractor, then read field by field with
//! small quote-tolerant patterns.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::block::extract_block;
use crate::error::{ParseError, ParseResult};

// =============================================================================
// Value Types
// =============================================================================

/// The type of a setting or command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Free-form text.
    String,
    /// Signed integer.
    Int,
    /// Boolean literal (`true` / `false`).
    Bool,
}

impl ValueKind {
    /// Parses a type keyword as written in plugin source.
    pub fn from_keyword(kw: &str) -> Option<Self> {
        match kw {
            "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Coerces raw text into a value of this kind.
    ///
    /// Coercion never fails: an unparseable int becomes `0`, anything but
    /// the `true` literal becomes `false`, and strings are quote-stripped.
    pub fn coerce(self, raw: &str) -> SettingValue {
        let raw = raw.trim();
        match self {
            Self::String => SettingValue::Str(strip_quotes(raw).to_string()),
            Self::Int => SettingValue::Int(strip_quotes(raw).parse().unwrap_or(0)),
            Self::Bool => SettingValue::Bool(strip_quotes(raw) == "true"),
        }
    }
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// A text value.
    Str(String),
    /// An integer value.
    Int(i64),
    /// A boolean value.
    Bool(bool),
}

impl SettingValue {
    /// Converts to a JSON value for injection into handler bodies.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

// =============================================================================
// Manifest
// =============================================================================

/// A plugin's declared identity and capability requirements.
///
/// Immutable once parsed from a given source revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Display name. The only mandatory field.
    pub name: String,
    /// Semantic version, `1.0.0` when absent.
    pub version: String,
    /// Author handle.
    pub author: String,
    /// Short description for listings.
    pub description: String,
    /// Search tags.
    pub tags: Vec<String>,
    /// Listing price, `0` for free plugins.
    pub price: f64,
    /// Declared capability scopes.
    pub scopes: Vec<String>,
    /// Optional homepage URL.
    pub homepage: Option<String>,
    /// Optional icon URL.
    pub icon: Option<String>,
    /// Optional license identifier or URL.
    pub license: Option<String>,
    /// Optional FAQ URL.
    pub faq: Option<String>,
}

static MANIFEST_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*manifest[ \t]*\{").unwrap());
static SETTINGS_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*settings[ \t]*\{").unwrap());
static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*:[ \t]*(.+?)[ \t]*$").unwrap()
});
static SETTING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*setting[ \t]+(string|int|bool)[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]+"([^"]*)"(?:[ \t]+default[ \t]+(.+?))?[ \t]*$"#,
    )
    .unwrap()
});

/// Strips one layer of matching single or double quotes.
pub(crate) fn strip_quotes(raw: &str) -> &str {
    let raw = raw.trim();
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        if (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'')
        {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

/// Splits a `[a, b, c]` list into quote-stripped entries.
fn parse_array(raw: &str) -> Vec<String> {
    let inner = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|item| strip_quotes(item).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Reads all `key: value` lines of a block body into a map.
fn field_map(body: &str) -> HashMap<String, String> {
    FIELD_LINE
        .captures_iter(body)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

/// Extracts the manifest block from plugin source text.
///
/// A missing manifest block is fatal for the whole plugin. Absent fields
/// take documented defaults; only `name` is required.
pub fn parse_manifest(source: &str) -> ParseResult<PluginManifest> {
    let header = MANIFEST_HEADER.find(source).ok_or(ParseError::MissingManifest)?;
    let (body, _) =
        extract_block(source, header.start()).ok_or_else(|| ParseError::UnterminatedBlock {
            construct: "manifest".to_string(),
            offset: header.start(),
        })?;

    let fields = field_map(body);
    let string_field =
        |key: &str| -> Option<String> { fields.get(key).map(|v| strip_quotes(v).to_string()) };

    let name = string_field("name").filter(|n| !n.is_empty()).ok_or_else(|| {
        ParseError::InvalidField {
            field: "name".to_string(),
            reason: "manifest must declare a non-empty name".to_string(),
        }
    })?;

    let price = match fields.get("price") {
        Some(raw) => strip_quotes(raw)
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidField {
                field: "price".to_string(),
                reason: format!("'{raw}' is not a number"),
            })?,
        None => 0.0,
    };

    Ok(PluginManifest {
        name,
        version: string_field("version").unwrap_or_else(|| "1.0.0".to_string()),
        author: string_field("author").unwrap_or_default(),
        description: string_field("description").unwrap_or_default(),
        tags: fields.get("tags").map(|v| parse_array(v)).unwrap_or_default(),
        price,
        scopes: fields.get("scopes").map(|v| parse_array(v)).unwrap_or_default(),
        homepage: string_field("homepage"),
        icon: string_field("icon"),
        license: string_field("license"),
        faq: string_field("faq"),
    })
}

// =============================================================================
// Settings Schema
// =============================================================================

/// One declared setting: key, type, description, default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingSpec {
    /// Setting key, unique within the plugin.
    pub key: String,
    /// Declared value type.
    pub kind: ValueKind,
    /// Human-readable description shown to administrators.
    pub description: String,
    /// Default value, already coerced to `kind`.
    pub default: SettingValue,
}

/// The ordered settings declarations of a plugin.
///
/// A plugin instance's live values are an overlay on this schema; missing
/// keys fall back to the declared default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsSchema {
    /// Declarations in source order.
    pub entries: Vec<SettingSpec>,
}

impl SettingsSchema {
    /// Looks up a declaration by key.
    pub fn get(&self, key: &str) -> Option<&SettingSpec> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Overlays live values on the schema, producing the resolved map a
    /// sandbox is built with. Overlay values are re-coerced per declared
    /// type; keys absent from the overlay fall back to the default; overlay
    /// keys not in the schema are dropped.
    pub fn resolve(&self, overlay: &HashMap<String, String>) -> HashMap<String, SettingValue> {
        self.entries
            .iter()
            .map(|spec| {
                let value = overlay
                    .get(&spec.key)
                    .map(|raw| spec.kind.coerce(raw))
                    .unwrap_or_else(|| spec.default.clone());
                (spec.key.clone(), value)
            })
            .collect()
    }
}

/// Extracts the settings block from plugin source text.
///
/// A plugin without a settings block gets an empty schema, not an error.
pub fn parse_settings(source: &str) -> ParseResult<SettingsSchema> {
    let Some(header) = SETTINGS_HEADER.find(source) else {
        return Ok(SettingsSchema::default());
    };
    let (body, _) =
        extract_block(source, header.start()).ok_or_else(|| ParseError::UnterminatedBlock {
            construct: "settings".to_string(),
            offset: header.start(),
        })?;

    let mut entries = Vec::new();
    for cap in SETTING_LINE.captures_iter(body) {
        let kind = ValueKind::from_keyword(&cap[1]).ok_or_else(|| {
            ParseError::InvalidParam(format!("unknown setting type '{}'", &cap[1]))
        })?;
        let default = match cap.get(4) {
            Some(raw) => kind.coerce(raw.as_str()),
            None => match kind {
                ValueKind::String => SettingValue::Str(String::new()),
                ValueKind::Int => SettingValue::Int(0),
                ValueKind::Bool => SettingValue::Bool(false),
            },
        };
        entries.push(SettingSpec {
            key: cap[2].to_string(),
            kind,
            description: cap[3].to_string(),
            default,
        });
    }

    Ok(SettingsSchema { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
plugin {
  manifest {
    name: "Greeter"
    version: "1.2.0"
    author: "ada"
    description: "Greets people"
    tags: ["fun", "social"]
    price: 0
    scopes: ["messages.send", "storage.write"]
    homepage: "https://example.com/greeter"
  }

  settings {
    setting string greeting "Greeting template" default "Hello, ${user_name}!"
    setting int max_uses "Daily greeting budget" default 5
    setting bool loud "Shout the greeting" default true
    setting string farewell "Parting words"
  }
}
"#;

    #[test]
    fn parses_full_manifest() {
        let manifest = parse_manifest(SAMPLE).unwrap();
        assert_eq!(manifest.name, "Greeter");
        assert_eq!(manifest.version, "1.2.0");
        assert_eq!(manifest.author, "ada");
        assert_eq!(manifest.tags, vec!["fun", "social"]);
        assert_eq!(manifest.price, 0.0);
        assert_eq!(manifest.scopes, vec!["messages.send", "storage.write"]);
        assert_eq!(manifest.homepage.as_deref(), Some("https://example.com/greeter"));
        assert!(manifest.icon.is_none());
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let err = parse_manifest("command hi { execute { send(\"x\") } }").unwrap_err();
        assert!(matches!(err, ParseError::MissingManifest));
    }

    #[test]
    fn absent_fields_take_defaults() {
        let src = "manifest { name: minimal }";
        let manifest = parse_manifest(src).unwrap();
        assert_eq!(manifest.name, "minimal");
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.price, 0.0);
        assert!(manifest.tags.is_empty());
        assert!(manifest.scopes.is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = parse_manifest("manifest { name: \"\" }").unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field, .. } if field == "name"));
    }

    #[test]
    fn parses_settings_with_coerced_defaults() {
        let schema = parse_settings(SAMPLE).unwrap();
        assert_eq!(schema.entries.len(), 4);
        assert_eq!(schema.entries[0].key, "greeting");
        assert_eq!(schema.entries[0].kind, ValueKind::String);
        assert_eq!(
            schema.entries[0].default,
            SettingValue::Str("Hello, ${user_name}!".to_string())
        );
        assert_eq!(schema.entries[1].default, SettingValue::Int(5));
        assert_eq!(schema.entries[2].default, SettingValue::Bool(true));
        // No default declared: type zero value.
        assert_eq!(schema.entries[3].default, SettingValue::Str(String::new()));
    }

    #[test]
    fn bad_int_default_coerces_to_zero() {
        assert_eq!(ValueKind::Int.coerce("not-a-number"), SettingValue::Int(0));
        assert_eq!(ValueKind::Bool.coerce("yes"), SettingValue::Bool(false));
        assert_eq!(ValueKind::String.coerce("'quoted'"), SettingValue::Str("quoted".into()));
    }

    #[test]
    fn resolve_overlays_live_values() {
        let schema = parse_settings(SAMPLE).unwrap();
        let mut overlay = HashMap::new();
        overlay.insert("max_uses".to_string(), "9".to_string());
        overlay.insert("unknown".to_string(), "ignored".to_string());

        let resolved = schema.resolve(&overlay);
        assert_eq!(resolved["max_uses"], SettingValue::Int(9));
        // Missing key falls back to the declared default.
        assert_eq!(resolved["loud"], SettingValue::Bool(true));
        assert!(!resolved.contains_key("unknown"));
    }

    #[test]
    fn missing_settings_block_yields_empty_schema() {
        let schema = parse_settings("manifest { name: x }").unwrap();
        assert!(schema.entries.is_empty());
    }
}
