//! Model registry: loads `models.yaml`, resolving each entry's
//! `class_name` to a built-in model constructor. Per-entry load
//! failures are isolated and never block the rest of the registry.

use std::collections::HashMap;
use std::path::Path;

use jobato_core::BuiltinModel;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("duplicate model identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("default_model {0} is not a registered identifier")]
    UnknownDefault(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelRegistryEntryConfig {
    pub identifier: String,
    #[serde(rename = "modulePath")]
    pub module_path: String,
    #[serde(rename = "className")]
    pub class_name: String,
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ModelsFile {
    #[serde(default)]
    models: Vec<ModelRegistryEntryConfig>,
    #[serde(rename = "defaultModel", default)]
    default_model: Option<String>,
}

/// One successfully- or unsuccessfully-loaded registry entry.
#[derive(Debug, Clone)]
pub struct LoadedEntry {
    pub config: ModelRegistryEntryConfig,
    pub model: BuiltinModel,
}

/// A per-entry load failure, captured rather than propagated.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub identifier: String,
    pub error_type: &'static str,
    pub error_message: String,
}

pub struct ModelRegistry {
    entries: HashMap<String, LoadedEntry>,
    failures: Vec<LoadFailure>,
    default_model: Option<String>,
}

impl ModelRegistry {
    pub fn load(config_dir: &Path) -> Result<Self, RegistryError> {
        let path = config_dir.join("models.yaml");
        let content = std::fs::read_to_string(&path).map_err(|source| RegistryError::Read {
            path: path.clone(),
            source,
        })?;
        let file: ModelsFile = serde_yaml::from_str(&content).map_err(|source| RegistryError::Parse {
            path: path.clone(),
            source,
        })?;

        let mut entries = HashMap::new();
        let mut failures = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for config in file.models {
            if !config.enabled {
                continue;
            }
            if !seen.insert(config.identifier.clone()) {
                return Err(RegistryError::DuplicateIdentifier(config.identifier));
            }
            match BuiltinModel::construct(&config.class_name) {
                Ok(model) => {
                    entries.insert(config.identifier.clone(), LoadedEntry { config, model });
                }
                Err(err) => failures.push(LoadFailure {
                    identifier: config.identifier.clone(),
                    error_type: "UnknownClass",
                    error_message: err.to_string(),
                }),
            }
        }

        if let Some(default) = &file.default_model {
            if !entries.contains_key(default) {
                return Err(RegistryError::UnknownDefault(default.clone()));
            }
        }

        Ok(Self {
            entries,
            failures,
            default_model: file.default_model,
        })
    }

    pub fn get_model(&self, identifier: &str) -> Option<&LoadedEntry> {
        self.entries.get(identifier)
    }

    pub fn has_model(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn get_available_models(&self) -> impl Iterator<Item = &LoadedEntry> {
        self.entries.values()
    }

    pub fn get_default_model(&self) -> Option<&LoadedEntry> {
        self.default_model.as_deref().and_then(|id| self.entries.get(id))
    }

    pub fn failures(&self) -> &[LoadFailure] {
        &self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_models_yaml(dir: &Path, content: &str) {
        let mut file = std::fs::File::create(dir.join("models.yaml")).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn loads_enabled_entries_and_isolates_unknown_class() {
        let dir = tempfile::tempdir().unwrap();
        write_models_yaml(
            dir.path(),
            r#"
defaultModel: baseline
models:
  - identifier: baseline
    modulePath: jobato.models.baseline
    className: BaselineModel
    version: "1.0.0"
    name: Baseline
    enabled: true
  - identifier: ghost
    modulePath: jobato.models.ghost
    className: GhostModel
    version: "0.1.0"
    name: Ghost
    enabled: true
"#,
        );
        let registry = ModelRegistry::load(dir.path()).unwrap();
        assert!(registry.has_model("baseline"));
        assert!(!registry.has_model("ghost"));
        assert_eq!(registry.failures().len(), 1);
        assert_eq!(registry.failures()[0].identifier, "ghost");
        assert!(registry.get_default_model().is_some());
    }

    #[test]
    fn disabled_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_models_yaml(
            dir.path(),
            r#"
models:
  - identifier: baseline
    modulePath: jobato.models.baseline
    className: BaselineModel
    version: "1.0.0"
    name: Baseline
    enabled: false
"#,
        );
        let registry = ModelRegistry::load(dir.path()).unwrap();
        assert!(!registry.has_model("baseline"));
        assert!(registry.failures().is_empty());
    }

    #[test]
    fn unknown_default_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_models_yaml(
            dir.path(),
            r#"
defaultModel: missing
models:
  - identifier: baseline
    modulePath: jobato.models.baseline
    className: BaselineModel
    version: "1.0.0"
    name: Baseline
    enabled: true
"#,
        );
        let err = ModelRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDefault(_)));
    }
}
