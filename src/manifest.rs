//! Extension manifest model and validation.
//!
//! Each extension ships a JSON manifest declaring its identity, compatibility
//! range, permissions, and contributions (commands, panels, themes, prompts,
//! migrations, AI providers, tools). Validation runs once at load time and
//! collects *every* problem as a human-readable string rather than failing
//! fast; every downstream component trusts a validated manifest without
//! re-checking shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HostError, HostResult};
use crate::permissions::is_valid_permission;

/// Fallback locale used when a preferred locale has no entry.
pub const DEFAULT_LOCALE: &str = "en";

/// Display text that is either a plain string or a locale→string map.
///
/// Resolution order: preferred locale, then [`DEFAULT_LOCALE`], then the
/// first available entry, then the empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LocalizedString {
    Plain(String),
    ByLocale(BTreeMap<String, String>),
}

impl LocalizedString {
    /// Resolve to a concrete string for the given preferred locale.
    pub fn resolve(&self, preferred: &str) -> &str {
        match self {
            LocalizedString::Plain(s) => s,
            LocalizedString::ByLocale(map) => map
                .get(preferred)
                .or_else(|| map.get(DEFAULT_LOCALE))
                .or_else(|| map.values().next())
                .map(String::as_str)
                .unwrap_or(""),
        }
    }
}

impl Default for LocalizedString {
    fn default() -> Self {
        LocalizedString::Plain(String::new())
    }
}

/// Complete extension manifest, parsed after validation succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Globally unique identifier of the form `publisher.name`.
    pub id: String,

    /// Semantic version of the extension.
    pub version: String,

    /// Human-readable display name.
    pub name: String,

    /// Extension kind.
    #[serde(rename = "type")]
    pub kind: ExtensionKind,

    /// Host compatibility declaration.
    pub engines: Engines,

    /// Declared permission strings (validated against the allow-list).
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Contributed functionality.
    #[serde(default)]
    pub contributes: Contributes,
}

/// Extension kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Feature,
    Theme,
}

/// Host compatibility declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engines {
    /// Semver range the host application version must satisfy.
    pub app: String,
}

/// Contributions declared by a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contributes {
    #[serde(default)]
    pub commands: Vec<CommandContribution>,

    #[serde(default)]
    pub panels: Vec<PanelContribution>,

    #[serde(default)]
    pub themes: Vec<ThemeContribution>,

    #[serde(default)]
    pub prompts: Vec<PromptContribution>,

    #[serde(default)]
    pub migrations: Vec<MigrationContribution>,

    #[serde(default)]
    pub providers: Vec<ProviderContribution>,

    #[serde(default)]
    pub tools: Vec<ToolContribution>,
}

/// A contributed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandContribution {
    pub id: String,
    pub title: LocalizedString,
    #[serde(default)]
    pub description: Option<LocalizedString>,
}

/// A contributed UI panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelContribution {
    pub id: String,
    pub title: LocalizedString,
    pub view: PanelView,
}

/// How a panel is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelView {
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// A contributed theme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeContribution {
    pub id: String,
    #[serde(default)]
    pub label: Option<LocalizedString>,
    #[serde(default)]
    pub path: Option<String>,
}

/// A contributed prompt fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContribution {
    pub id: String,
    #[serde(default)]
    pub section: Option<PromptSection>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub i18n: Option<BTreeMap<String, String>>,
}

/// Prompt section a fragment attaches to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptSection {
    System,
    Behavior,
    Tools,
}

/// A contributed data migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationContribution {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A contributed tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContribution {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// A contributed AI provider definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderContribution {
    pub id: String,
    pub name: LocalizedString,
    #[serde(default)]
    pub description: Option<LocalizedString>,
    #[serde(default, rename = "configSchema")]
    pub config_schema: Option<ConfigSchema>,
}

/// Configuration schema for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub properties: BTreeMap<String, ConfigProperty>,
    #[serde(default)]
    pub order: Vec<String>,
}

/// One property in a provider configuration schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigProperty {
    #[serde(rename = "type")]
    pub kind: ConfigPropertyType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub validation: Option<ValidationRules>,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Allowed property types in a provider configuration schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigPropertyType {
    String,
    Number,
    Boolean,
    Select,
    Password,
    Url,
}

/// An option for a `select` property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Validation constraints on a configuration property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, rename = "minLength")]
    pub min_length: Option<u64>,
    #[serde(default, rename = "maxLength")]
    pub max_length: Option<u64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ExtensionManifest {
    /// Validate and parse a raw manifest value.
    ///
    /// Returns [`HostError::ManifestInvalid`] carrying every collected
    /// problem when validation fails.
    pub fn from_value(raw: &Value) -> HostResult<Self> {
        let errors = validate_manifest(raw);
        if !errors.is_empty() {
            return Err(HostError::ManifestInvalid(errors));
        }
        Ok(serde_json::from_value(raw.clone())?)
    }
}

/// Validate a raw parsed manifest object.
///
/// Pure and total: never panics, collects every problem rather than failing
/// fast, and returns an empty vector for a valid manifest. Validating the
/// same manifest twice yields identical error arrays.
pub fn validate_manifest(raw: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(obj) = raw.as_object() else {
        return vec!["Manifest must be a JSON object".to_string()];
    };

    // Identity and compatibility
    if let Some(id) = require_string(obj, "id", &mut errors) {
        if !is_valid_extension_id(id) {
            errors.push(format!(
                "id '{id}' must be of the form publisher.name (lowercase alphanumerics and hyphens)"
            ));
        }
    }

    if let Some(version) = require_string(obj, "version", &mut errors) {
        if semver::Version::parse(version).is_err() {
            errors.push(format!(
                "version '{version}' is not valid semver (e.g. 1.0.0)"
            ));
        }
    }

    if let Some(name) = require_string(obj, "name", &mut errors) {
        if name.is_empty() {
            errors.push("name must not be empty".to_string());
        }
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("feature") | Some("theme") => {}
        Some(other) => errors.push(format!("type '{other}' must be 'feature' or 'theme'")),
        None => errors.push("Missing required string field 'type'".to_string()),
    }

    match obj.get("engines") {
        Some(Value::Object(engines)) => {
            if let Some(app) = require_string(engines, "app", &mut errors) {
                if semver::VersionReq::parse(app).is_err() {
                    errors.push(format!(
                        "engines.app '{app}' is not a valid semver range"
                    ));
                }
            }
        }
        Some(_) => errors.push("engines must be an object".to_string()),
        None => errors.push("Missing required field 'engines'".to_string()),
    }

    // Permissions
    match obj.get("permissions") {
        None => {}
        Some(Value::Array(permissions)) => {
            for (i, entry) in permissions.iter().enumerate() {
                match entry.as_str() {
                    Some(permission) if is_valid_permission(permission) => {}
                    Some(permission) => errors.push(format!("Unknown permission '{permission}'")),
                    None => errors.push(format!("permissions[{i}] must be a string")),
                }
            }
        }
        Some(_) => errors.push("permissions must be an array of strings".to_string()),
    }

    // Contributions
    match obj.get("contributes") {
        None => {}
        Some(Value::Object(contributes)) => validate_contributes(contributes, &mut errors),
        Some(_) => errors.push("contributes must be an object".to_string()),
    }

    errors
}

fn is_valid_extension_id(id: &str) -> bool {
    match id.split_once('.') {
        Some((publisher, name)) => {
            is_valid_id_part(publisher) && is_valid_id_part(name)
        }
        None => false,
    }
}

fn is_valid_id_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Fetch a required string field, recording an error when missing or
/// mistyped. Returns the value so callers can run further checks.
fn require_string<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    match obj.get(field) {
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            errors.push(format!("Field '{field}' must be a string"));
            None
        }
        None => {
            errors.push(format!("Missing required string field '{field}'"));
            None
        }
    }
}

fn validate_contributes(contributes: &serde_json::Map<String, Value>, errors: &mut Vec<String>) {
    for_each_entry(contributes, "commands", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);
        require_localized(entry, "title", label, errors);
    });

    for_each_entry(contributes, "panels", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);
        require_localized(entry, "title", label, errors);
        match entry.get("view") {
            Some(Value::Object(view)) => {
                match view.get("kind").and_then(Value::as_str) {
                    Some(kind) if !kind.is_empty() => {}
                    _ => errors.push(format!("{label} requires view.kind")),
                }
            }
            _ => errors.push(format!("{label} requires a view object")),
        }
    });

    for_each_entry(contributes, "themes", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);
    });

    for_each_entry(contributes, "prompts", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);

        if let Some(section) = entry.get("section") {
            match section.as_str() {
                Some("system") | Some("behavior") | Some("tools") => {}
                Some(other) => errors.push(format!(
                    "{label} has invalid section '{other}' (expected system, behavior or tools)"
                )),
                None => errors.push(format!("{label} section must be a string")),
            }
        }

        let has_text = matches!(entry.get("text"), Some(Value::String(_)));
        let has_i18n = match entry.get("i18n") {
            Some(Value::Object(map)) => {
                for (locale, text) in map {
                    if !text.is_string() {
                        errors.push(format!("{label} i18n['{locale}'] must be a string"));
                    }
                }
                true
            }
            Some(_) => {
                errors.push(format!("{label} i18n must be a locale→string map"));
                false
            }
            None => false,
        };
        if !has_text && !has_i18n {
            errors.push(format!("{label} must provide either text or i18n"));
        }
    });

    for_each_entry(contributes, "migrations", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);
    });

    for_each_entry(contributes, "tools", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);
        require_entry_string(entry, "name", label, errors);
        require_entry_string(entry, "description", label, errors);
    });

    for_each_entry(contributes, "providers", errors, |entry, label, errors| {
        require_entry_string(entry, "id", label, errors);
        require_localized(entry, "name", label, errors);

        match entry.get("configSchema") {
            None => {}
            Some(Value::Object(schema)) => validate_config_schema(schema, label, errors),
            Some(_) => errors.push(format!("{label} configSchema must be an object")),
        }
    });
}

/// Run a per-entry check over a contribution array, reporting type errors on
/// the array and its entries. Entry labels prefer the entry's `id`.
fn for_each_entry(
    contributes: &serde_json::Map<String, Value>,
    section: &str,
    errors: &mut Vec<String>,
    check: impl Fn(&serde_json::Map<String, Value>, &str, &mut Vec<String>),
) {
    match contributes.get(section) {
        None => {}
        Some(Value::Array(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                match entry.as_object() {
                    Some(entry) => {
                        let label = match entry.get("id").and_then(Value::as_str) {
                            Some(id) => format!("{} '{id}'", singular(section)),
                            None => format!("{section}[{i}]"),
                        };
                        check(entry, &label, errors);
                    }
                    None => errors.push(format!("{section}[{i}] must be an object")),
                }
            }
        }
        Some(_) => errors.push(format!("contributes.{section} must be an array")),
    }
}

fn singular(section: &str) -> &str {
    match section {
        "commands" => "Command",
        "panels" => "Panel",
        "themes" => "Theme",
        "prompts" => "Prompt",
        "migrations" => "Migration",
        "tools" => "Tool",
        "providers" => "Provider",
        other => other,
    }
}

fn require_entry_string(
    entry: &serde_json::Map<String, Value>,
    field: &str,
    label: &str,
    errors: &mut Vec<String>,
) {
    match entry.get(field) {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) => errors.push(format!("{label} field '{field}' must not be empty")),
        Some(_) => errors.push(format!("{label} field '{field}' must be a string")),
        None => errors.push(format!("{label} requires '{field}'")),
    }
}

/// A localized string is either a plain string or a locale→string map.
fn require_localized(
    entry: &serde_json::Map<String, Value>,
    field: &str,
    label: &str,
    errors: &mut Vec<String>,
) {
    match entry.get(field) {
        Some(Value::String(_)) => {}
        Some(Value::Object(map)) => {
            for (locale, text) in map {
                if !text.is_string() {
                    errors.push(format!("{label} {field}['{locale}'] must be a string"));
                }
            }
        }
        Some(_) => errors.push(format!(
            "{label} field '{field}' must be a string or locale map"
        )),
        None => errors.push(format!("{label} requires '{field}'")),
    }
}

fn validate_config_schema(
    schema: &serde_json::Map<String, Value>,
    label: &str,
    errors: &mut Vec<String>,
) {
    let properties = match schema.get("properties") {
        Some(Value::Object(properties)) if !properties.is_empty() => Some(properties),
        _ => {
            errors.push(format!(
                "{label} configSchema.properties must be a non-empty object"
            ));
            None
        }
    };

    match schema.get("order") {
        None => {}
        Some(Value::Array(order)) => {
            for entry in order {
                match entry.as_str() {
                    Some(key) => {
                        let declared =
                            properties.map(|p| p.contains_key(key)).unwrap_or(true);
                        if !declared {
                            errors.push(format!(
                                "{label} configSchema.order references undeclared property '{key}'"
                            ));
                        }
                    }
                    None => errors.push(format!(
                        "{label} configSchema.order entries must be strings"
                    )),
                }
            }
        }
        Some(_) => errors.push(format!("{label} configSchema.order must be an array")),
    }

    let Some(properties) = properties else {
        return;
    };

    for (key, property) in properties {
        let Some(property) = property.as_object() else {
            errors.push(format!("{label} property '{key}' must be an object"));
            continue;
        };

        let kind = property.get("type").and_then(Value::as_str);
        match kind {
            Some("string") | Some("number") | Some("boolean") | Some("select")
            | Some("password") | Some("url") => {}
            Some(other) => errors.push(format!(
                "{label} property '{key}' has invalid type '{other}'"
            )),
            None => errors.push(format!("{label} property '{key}' requires a type")),
        }

        match property.get("title").and_then(Value::as_str) {
            Some(title) if !title.is_empty() => {}
            _ => errors.push(format!("{label} property '{key}' requires a title")),
        }

        if kind == Some("select") {
            match property.get("options") {
                Some(Value::Array(options)) if !options.is_empty() => {
                    for (i, option) in options.iter().enumerate() {
                        let valid = option
                            .as_object()
                            .map(|o| {
                                o.get("value").map(Value::is_string).unwrap_or(false)
                                    && o.get("label").map(Value::is_string).unwrap_or(false)
                            })
                            .unwrap_or(false);
                        if !valid {
                            errors.push(format!(
                                "{label} property '{key}' options[{i}] must have string value and label"
                            ));
                        }
                    }
                }
                _ => errors.push(format!(
                    "{label} select property '{key}' requires non-empty options"
                )),
            }
        }

        if let Some(validation) = property.get("validation") {
            match validation.as_object() {
                Some(validation) => {
                    validate_rule(validation, "pattern", Value::is_string, label, key, errors);
                    validate_rule(validation, "minLength", Value::is_u64, label, key, errors);
                    validate_rule(validation, "maxLength", Value::is_u64, label, key, errors);
                    validate_rule(validation, "min", Value::is_number, label, key, errors);
                    validate_rule(validation, "max", Value::is_number, label, key, errors);
                }
                None => errors.push(format!(
                    "{label} property '{key}' validation must be an object"
                )),
            }
        }
    }
}

fn validate_rule(
    validation: &serde_json::Map<String, Value>,
    rule: &str,
    type_check: impl Fn(&Value) -> bool,
    label: &str,
    key: &str,
    errors: &mut Vec<String>,
) {
    if let Some(value) = validation.get(rule) {
        if !type_check(value) {
            errors.push(format!(
                "{label} property '{key}' validation.{rule} has wrong type"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_manifest() -> Value {
        json!({
            "id": "acme.weather",
            "version": "1.2.0",
            "name": "Weather",
            "type": "feature",
            "engines": { "app": ">=2.0.0" }
        })
    }

    #[test]
    fn test_minimal_manifest_is_valid() {
        assert!(validate_manifest(&minimal_manifest()).is_empty());
    }

    #[test]
    fn test_validation_is_pure() {
        let mut manifest = minimal_manifest();
        manifest["permissions"] = json!(["filesystem", "network:api_example"]);

        let first = validate_manifest(&manifest);
        let second = validate_manifest(&manifest);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_non_object_manifest() {
        let errors = validate_manifest(&json!("not a manifest"));
        assert_eq!(errors, vec!["Manifest must be a JSON object".to_string()]);
    }

    #[test]
    fn test_missing_required_fields() {
        let errors = validate_manifest(&json!({}));
        assert!(errors.iter().any(|e| e.contains("'id'")));
        assert!(errors.iter().any(|e| e.contains("'version'")));
        assert!(errors.iter().any(|e| e.contains("'name'")));
        assert!(errors.iter().any(|e| e.contains("'type'")));
        assert!(errors.iter().any(|e| e.contains("'engines'")));
    }

    #[test]
    fn test_id_shape() {
        let mut manifest = minimal_manifest();
        manifest["id"] = json!("no-publisher");
        let errors = validate_manifest(&manifest);
        assert!(errors.iter().any(|e| e.contains("publisher.name")));
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let mut manifest = minimal_manifest();
        manifest["permissions"] = json!(["events.emit", "filesystem"]);
        let errors = validate_manifest(&manifest);
        assert_eq!(errors, vec!["Unknown permission 'filesystem'".to_string()]);
    }

    #[test]
    fn test_network_permissions_accepted() {
        let mut manifest = minimal_manifest();
        manifest["permissions"] =
            json!(["network:api.example.com:8080", "network:*", "network:localhost:3000"]);
        assert!(validate_manifest(&manifest).is_empty());
    }

    #[test]
    fn test_panel_requires_view_kind() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "panels": [{ "id": "main", "title": "Main" }]
        });
        let errors = validate_manifest(&manifest);
        assert_eq!(errors, vec!["Panel 'main' requires a view object".to_string()]);
    }

    #[test]
    fn test_prompt_requires_text_or_i18n() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "prompts": [
                { "id": "greet", "section": "system", "text": "Hello" },
                { "id": "style", "i18n": { "en": "Be brief", "de": "Fasse dich kurz" } },
                { "id": "empty", "section": "behavior" }
            ]
        });
        let errors = validate_manifest(&manifest);
        assert_eq!(
            errors,
            vec!["Prompt 'empty' must provide either text or i18n".to_string()]
        );
    }

    #[test]
    fn test_prompt_invalid_section() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "prompts": [{ "id": "p", "section": "footer", "text": "x" }]
        });
        let errors = validate_manifest(&manifest);
        assert!(errors[0].contains("invalid section 'footer'"));
    }

    #[test]
    fn test_provider_order_matches_properties() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "providers": [{
                "id": "openai",
                "name": "OpenAI",
                "configSchema": {
                    "properties": {
                        "apiKey": { "type": "password", "title": "API key" },
                        "model": {
                            "type": "select",
                            "title": "Model",
                            "options": [{ "value": "gpt", "label": "GPT" }]
                        }
                    },
                    "order": ["apiKey", "model"]
                }
            }]
        });
        assert!(validate_manifest(&manifest).is_empty());

        // Remove a referenced property: exactly one error naming the key.
        manifest["contributes"]["providers"][0]["configSchema"]["properties"]
            .as_object_mut()
            .unwrap()
            .remove("model");
        let errors = validate_manifest(&manifest);
        assert_eq!(
            errors,
            vec![
                "Provider 'openai' configSchema.order references undeclared property 'model'"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_select_requires_options() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "providers": [{
                "id": "p",
                "name": "P",
                "configSchema": {
                    "properties": {
                        "mode": { "type": "select", "title": "Mode" }
                    }
                }
            }]
        });
        let errors = validate_manifest(&manifest);
        assert_eq!(
            errors,
            vec!["Provider 'p' select property 'mode' requires non-empty options".to_string()]
        );
    }

    #[test]
    fn test_validation_block_type_checked() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "providers": [{
                "id": "p",
                "name": "P",
                "configSchema": {
                    "properties": {
                        "token": {
                            "type": "string",
                            "title": "Token",
                            "validation": { "minLength": "five", "pattern": "^sk-" }
                        }
                    }
                }
            }]
        });
        let errors = validate_manifest(&manifest);
        assert_eq!(
            errors,
            vec!["Provider 'p' property 'token' validation.minLength has wrong type".to_string()]
        );
    }

    #[test]
    fn test_tool_requires_description() {
        let mut manifest = minimal_manifest();
        manifest["contributes"] = json!({
            "tools": [{ "id": "fetch-weather", "name": "Fetch weather" }]
        });
        let errors = validate_manifest(&manifest);
        assert_eq!(
            errors,
            vec!["Tool 'fetch-weather' requires 'description'".to_string()]
        );
    }

    #[test]
    fn test_from_value_roundtrip() {
        let mut manifest = minimal_manifest();
        manifest["permissions"] = json!(["events.emit"]);
        manifest["contributes"] = json!({
            "panels": [{
                "id": "main",
                "title": { "en": "Weather", "de": "Wetter" },
                "view": { "kind": "webview", "source": "panel.html" }
            }]
        });

        let parsed = ExtensionManifest::from_value(&manifest).unwrap();
        assert_eq!(parsed.id, "acme.weather");
        assert_eq!(parsed.kind, ExtensionKind::Feature);
        assert_eq!(parsed.contributes.panels[0].title.resolve("de"), "Wetter");

        let invalid = json!({ "id": "acme.weather" });
        assert!(matches!(
            ExtensionManifest::from_value(&invalid),
            Err(HostError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn test_localized_string_resolution() {
        let plain = LocalizedString::Plain("Hello".to_string());
        assert_eq!(plain.resolve("fr"), "Hello");

        let mut map = BTreeMap::new();
        map.insert("en".to_string(), "Hello".to_string());
        map.insert("fr".to_string(), "Bonjour".to_string());
        let localized = LocalizedString::ByLocale(map);
        assert_eq!(localized.resolve("fr"), "Bonjour");
        assert_eq!(localized.resolve("de"), "Hello");

        let mut no_en = BTreeMap::new();
        no_en.insert("fr".to_string(), "Bonjour".to_string());
        assert_eq!(LocalizedString::ByLocale(no_en).resolve("de"), "Bonjour");

        assert_eq!(LocalizedString::ByLocale(BTreeMap::new()).resolve("en"), "");
    }
}
