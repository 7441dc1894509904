//! Directory of versioned definition files: `<dir>/<version>.{yaml,yml,toml,json}`.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::definition::{DefinitionFormat, PipelineDefinition};
use super::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionCatalog {
    dir: PathBuf,
}

impl DefinitionCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Locate the file for `version`. The first extension in
    /// [`DefinitionFormat::EXTENSIONS`] order wins.
    pub fn resolve(&self, version: &str) -> Result<(PathBuf, DefinitionFormat), ConfigError> {
        validate_version(version)?;
        for (ext, format) in DefinitionFormat::EXTENSIONS {
            let candidate = self.dir.join(format!("{version}.{ext}"));
            if candidate.is_file() {
                return Ok((candidate, format));
            }
        }
        Err(ConfigError::DefinitionNotFound {
            version: version.to_string(),
            dir: self.dir.clone(),
        })
    }

    /// Load `version`. The document must declare the version it is filed under.
    pub fn load(&self, version: &str) -> Result<PipelineDefinition, ConfigError> {
        let (path, format) = self.resolve(version)?;
        debug!(path = %path.display(), %format, "Loading pipeline definition");
        let definition = PipelineDefinition::from_file(&path)?;
        if definition.version != version {
            return Err(ConfigError::VersionMismatch {
                expected: version.to_string(),
                found: definition.version,
            });
        }
        Ok(definition)
    }

    /// Versions available in the directory, sorted and deduplicated.
    pub fn versions(&self) -> Result<Vec<String>, ConfigError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| ConfigError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() || DefinitionFormat::from_path(&path).is_none() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                versions.push(stem.to_string());
            }
        }
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}

/// Versions double as file stems, so they may not escape the directory.
pub fn validate_version(version: &str) -> Result<(), ConfigError> {
    let ok = !version.trim().is_empty()
        && version != "."
        && version != ".."
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{
        "version": "VERSION",
        "transitions": [{"current_role": "a", "status_code": "ok", "action": "end"}],
        "special_rules": [{"rule_name": "f", "config": {"kind": "unknown_transition_fallback", "fallback_role": "x"}}]
    }"#;

    fn write(dir: &Path, file: &str, version: &str) {
        std::fs::write(dir.join(file), MINIMAL.replace("VERSION", version)).unwrap();
    }

    #[test]
    fn test_resolve_and_load() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pipeline-v1.json", "pipeline-v1");
        let catalog = DefinitionCatalog::new(dir.path());

        let (path, format) = catalog.resolve("pipeline-v1").unwrap();
        assert_eq!(format, DefinitionFormat::Json);
        assert!(path.ends_with("pipeline-v1.json"));

        let def = catalog.load("pipeline-v1").unwrap();
        assert_eq!(def.version, "pipeline-v1");
    }

    #[test]
    fn test_missing_version_is_not_found() {
        let dir = TempDir::new().unwrap();
        let catalog = DefinitionCatalog::new(dir.path());
        assert!(matches!(
            catalog.load("nope"),
            Err(ConfigError::DefinitionNotFound { .. })
        ));
    }

    #[test]
    fn test_version_must_match_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "v1.json", "v2");
        let catalog = DefinitionCatalog::new(dir.path());
        assert!(matches!(
            catalog.load("v1"),
            Err(ConfigError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_path_like_versions() {
        let catalog = DefinitionCatalog::new("/tmp");
        for bad in ["", "..", "../etc/passwd", "a/b", "v 1"] {
            assert!(
                matches!(catalog.resolve(bad), Err(ConfigError::InvalidVersion(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_versions_listing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "v2.json", "v2");
        write(dir.path(), "v1.json", "v1");
        std::fs::write(dir.path().join("v1.yaml"), "version: v1\ntransitions: []\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let catalog = DefinitionCatalog::new(dir.path());
        assert_eq!(catalog.versions().unwrap(), vec!["v1", "v2"]);
        // yaml is tried before json
        assert_eq!(catalog.resolve("v1").unwrap().1, DefinitionFormat::Yaml);
    }
}
