//! Definition documents and their on-disk formats.

use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::escalation::SpecialRule;
use crate::table::TransitionRule;

/// Serialization format of a definition file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionFormat {
    Yaml,
    Toml,
    Json,
}

impl DefinitionFormat {
    /// Extensions tried by the catalog, in lookup order.
    pub const EXTENSIONS: [(&'static str, DefinitionFormat); 4] = [
        ("yaml", DefinitionFormat::Yaml),
        ("yml", DefinitionFormat::Yaml),
        ("toml", DefinitionFormat::Toml),
        ("json", DefinitionFormat::Json),
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::EXTENSIONS
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, f)| *f)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionFormat::Yaml => "yaml",
            DefinitionFormat::Toml => "toml",
            DefinitionFormat::Json => "json",
        }
    }

    /// Parse `text` into `T`.
    pub fn parse<T: DeserializeOwned>(self, text: &str, source_name: &str) -> Result<T, ConfigError> {
        let parsed = match self {
            DefinitionFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            DefinitionFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            DefinitionFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|detail| ConfigError::Parse {
            source_name: source_name.to_string(),
            format: self,
            detail,
        })
    }
}

impl fmt::Display for DefinitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read and parse a document, inferring the format from the extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = DefinitionFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    format.parse(&text, &path.display().to_string())
}

/// A transition table on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionTableDoc {
    pub version: String,
    pub transitions: Vec<TransitionRule>,
}

/// Special rules on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialRulesDoc {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<SpecialRule>,
}

/// A complete, versioned routing definition.
///
/// ```yaml
/// version: pipeline-v3
/// transitions:
///   - current_role: developer
///     status_code: done
///     next_role: reviewer
///     action: spawn
/// special_rules:
///   - rule_name: fallback
///     config: { kind: unknown_transition_fallback, fallback_role: coordinator }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub version: String,
    pub transitions: Vec<TransitionRule>,
    #[serde(default)]
    pub special_rules: Vec<SpecialRule>,
}

impl PipelineDefinition {
    pub fn new(
        version: impl Into<String>,
        transitions: Vec<TransitionRule>,
        special_rules: Vec<SpecialRule>,
    ) -> Self {
        Self {
            version: version.into(),
            transitions,
            special_rules,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_document(path)
    }

    /// Join separately stored table and rules. Both must name the same version.
    pub fn from_parts(table: TransitionTableDoc, rules: SpecialRulesDoc) -> Result<Self, ConfigError> {
        if table.version != rules.version {
            return Err(ConfigError::VersionMismatch {
                expected: table.version,
                found: rules.version,
            });
        }
        Ok(Self {
            version: table.version,
            transitions: table.transitions,
            special_rules: rules.rules,
        })
    }

    pub fn from_part_files(table_path: &Path, rules_path: &Path) -> Result<Self, ConfigError> {
        Self::from_parts(read_document(table_path)?, read_document(rules_path)?)
    }

    /// blake3 over a canonical JSON rendering: rules in key order, rule
    /// configs with sorted object keys. Declaration order does not matter.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let mut transitions: Vec<&TransitionRule> = self.transitions.iter().collect();
        transitions.sort_by(|a, b| {
            (&a.current_role, &a.status_code).cmp(&(&b.current_role, &b.status_code))
        });
        let mut rules: Vec<&SpecialRule> = self.special_rules.iter().collect();
        rules.sort_by(|a, b| a.rule_name.cmp(&b.rule_name));

        let canonical = serde_json::json!({
            "version": self.version,
            "transitions": transitions,
            "special_rules": rules,
        });
        let bytes = serde_json::to_vec(&canonical).map_err(|e| ConfigError::Parse {
            source_name: self.version.clone(),
            format: DefinitionFormat::Json,
            detail: e.to_string(),
        })?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Action;
    use tempfile::TempDir;

    const YAML: &str = r#"
version: v1
transitions:
  - current_role: developer
    status_code: done
    next_role: reviewer
    action: spawn
    required_context_keys: [diff]
  - current_role: verifier
    status_code: pass
    action: end
special_rules:
  - rule_name: fallback
    config:
      kind: unknown_transition_fallback
      fallback_role: coordinator
"#;

    const TOML: &str = r#"
version = "v1"

[[transitions]]
current_role = "verifier"
status_code = "pass"
action = "end"

[[transitions]]
current_role = "developer"
status_code = "done"
next_role = "reviewer"
action = "spawn"
required_context_keys = ["diff"]

[[special_rules]]
rule_name = "fallback"
config = { fallback_role = "coordinator", kind = "unknown_transition_fallback" }
"#;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DefinitionFormat::from_extension("YML"), Some(DefinitionFormat::Yaml));
        assert_eq!(DefinitionFormat::from_extension("toml"), Some(DefinitionFormat::Toml));
        assert_eq!(DefinitionFormat::from_extension("json"), Some(DefinitionFormat::Json));
        assert_eq!(DefinitionFormat::from_extension("ini"), None);
    }

    #[test]
    fn test_parse_yaml() {
        let def: PipelineDefinition = DefinitionFormat::Yaml.parse(YAML, "inline").unwrap();
        assert_eq!(def.version, "v1");
        assert_eq!(def.transitions.len(), 2);
        assert_eq!(def.transitions[1].action, Action::End);
        assert_eq!(def.special_rules[0].kind(), Some("unknown_transition_fallback"));
    }

    #[test]
    fn test_parse_error_names_source() {
        let err = DefinitionFormat::Yaml
            .parse::<PipelineDefinition>("version: [", "broken.yaml")
            .unwrap_err();
        match err {
            ConfigError::Parse { source_name, format, .. } => {
                assert_eq!(source_name, "broken.yaml");
                assert_eq!(format, DefinitionFormat::Yaml);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_action_is_parse_error() {
        let text = r#"{"version": "v1", "transitions": [
            {"current_role": "a", "status_code": "b", "next_role": "c", "action": "teleport"}
        ]}"#;
        assert!(DefinitionFormat::Json
            .parse::<PipelineDefinition>(text, "inline")
            .is_err());
    }

    #[test]
    fn test_fingerprint_ignores_declaration_order_and_format() {
        let yaml: PipelineDefinition = DefinitionFormat::Yaml.parse(YAML, "a").unwrap();
        let toml: PipelineDefinition = DefinitionFormat::Toml.parse(TOML, "b").unwrap();
        assert_eq!(yaml.fingerprint().unwrap(), toml.fingerprint().unwrap());

        let mut changed = yaml.clone();
        changed.transitions[0].next_role = Some("tester".into());
        assert_ne!(yaml.fingerprint().unwrap(), changed.fingerprint().unwrap());
    }

    #[test]
    fn test_from_part_files() {
        let dir = TempDir::new().unwrap();
        let table = dir.path().join("table.yaml");
        let rules = dir.path().join("rules.json");
        std::fs::write(
            &table,
            "version: v2\ntransitions:\n  - {current_role: a, status_code: ok, action: end}\n",
        )
        .unwrap();
        std::fs::write(
            &rules,
            r#"{"version": "v2", "rules": [{"rule_name": "f", "config": {"kind": "unknown_transition_fallback", "fallback_role": "x"}}]}"#,
        )
        .unwrap();

        let def = PipelineDefinition::from_part_files(&table, &rules).unwrap();
        assert_eq!(def.version, "v2");
        assert_eq!(def.transitions.len(), 1);
        assert_eq!(def.special_rules.len(), 1);

        std::fs::write(&rules, r#"{"version": "v3", "rules": []}"#).unwrap();
        assert!(matches!(
            PipelineDefinition::from_part_files(&table, &rules),
            Err(ConfigError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_read_document_rejects_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("def.ini");
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(
            read_document::<PipelineDefinition>(&path),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }
}
