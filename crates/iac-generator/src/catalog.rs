//! Template catalog
//!
//! Holds the reusable Terraform / Kubernetes / Compose / monitoring fragments
//! the generator selects from. Entries are tagged by capability (`database`,
//! `cache`, ...) and by the cloud provider they target.

use crate::builtin::builtin_templates;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use text2iac_common::{ArtifactKind, CloudProvider, Error, Result};
use tracing::{debug, info};

/// Provider a template is written for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateProvider {
    /// Usable with every provider
    #[default]
    Any,
    Aws,
    Azure,
    Gcp,
    Local,
}

impl TemplateProvider {
    pub fn supports(&self, provider: CloudProvider) -> bool {
        match self {
            TemplateProvider::Any => true,
            TemplateProvider::Aws => provider == CloudProvider::Aws,
            TemplateProvider::Azure => provider == CloudProvider::Azure,
            TemplateProvider::Gcp => provider == CloudProvider::Gcp,
            TemplateProvider::Local => provider == CloudProvider::Local,
        }
    }

    pub fn is_specific(&self) -> bool {
        *self != TemplateProvider::Any
    }
}

/// One reusable template fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    /// Unique template name
    pub name: String,

    /// Artifact kind this template contributes to
    pub kind: ArtifactKind,

    #[serde(default)]
    pub provider: TemplateProvider,

    /// Capability tags matched against analyzer components
    pub tags: Vec<String>,

    /// File name the rendered body is written to
    pub filename: String,

    /// Template body with `{{placeholder}}` variables
    pub body: String,

    /// Templates this one references and cannot render without
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

impl TemplateEntry {
    pub fn requiring(mut self, names: &[&str]) -> Self {
        self.requires = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Tags of this entry that appear in `tokens` (already lowercased)
    pub fn matching_tags(&self, tokens: &BTreeSet<String>) -> Vec<String> {
        self.tags
            .iter()
            .map(|tag| tag.to_lowercase())
            .filter(|tag| tokens.contains(tag))
            .collect()
    }
}

/// A JSON template file holds either one entry or a list of entries
#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    One(TemplateEntry),
    Many(Vec<TemplateEntry>),
}

/// Read-only template catalog
#[derive(Debug, Clone)]
pub struct TemplateStore {
    entries: Vec<TemplateEntry>,
}

impl TemplateStore {
    /// Catalog containing only the built-in templates
    pub fn builtin() -> Self {
        Self {
            entries: builtin_templates(),
        }
    }

    /// Catalog from explicit entries
    pub fn with_entries(entries: Vec<TemplateEntry>) -> Result<Self> {
        let store = Self { entries };
        store.validate()?;
        Ok(store)
    }

    /// Built-in catalog extended with every `*.json` file in `dir`
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries = builtin_templates();

        let read_dir = std::fs::read_dir(dir).map_err(|e| {
            Error::Generation(format!(
                "Failed to read templates directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths: Vec<_> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let data = std::fs::read_to_string(&path).map_err(|e| {
                Error::Generation(format!("Failed to read template {}: {}", path.display(), e))
            })?;

            let file: TemplateFile = serde_json::from_str(&data).map_err(|e| {
                Error::Generation(format!("Invalid template file {}: {}", path.display(), e))
            })?;

            let loaded = match file {
                TemplateFile::One(entry) => vec![entry],
                TemplateFile::Many(list) => list,
            };
            debug!("Loaded {} template(s) from {}", loaded.len(), path.display());
            entries.extend(loaded);
        }

        let store = Self { entries };
        store.validate()?;
        info!(
            "Template store loaded: {} templates ({} from {})",
            store.entries.len(),
            store.entries.len() - builtin_templates().len(),
            dir.display()
        );
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for entry in &self.entries {
            if entry.name.is_empty() {
                return Err(Error::Generation("template name cannot be empty".into()));
            }
            if entry.filename.is_empty() || entry.filename.contains(['/', '\\']) || entry.filename == ".." {
                return Err(Error::Generation(format!(
                    "template {} has an invalid filename: {:?}",
                    entry.name, entry.filename
                )));
            }
            if entry.tags.is_empty() {
                return Err(Error::Generation(format!(
                    "template {} must have at least one tag",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(Error::Generation(format!(
                    "duplicate template name: {}",
                    entry.name
                )));
            }
        }

        for entry in &self.entries {
            for required in &entry.requires {
                if !names.contains(required.as_str()) {
                    return Err(Error::Generation(format!(
                        "template {} requires unknown template {}",
                        entry.name, required
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries usable with `provider` whose tags intersect `tokens`
    pub fn matching<'a>(
        &'a self,
        tokens: &'a BTreeSet<String>,
        provider: CloudProvider,
    ) -> impl Iterator<Item = &'a TemplateEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.provider.supports(provider))
            .filter(move |e| !e.matching_tags(tokens).is_empty())
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let store = TemplateStore::builtin();
        assert!(!store.is_empty());
        store.validate().expect("built-in catalog must validate");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let entry = TemplateEntry {
            name: "pg".into(),
            kind: ArtifactKind::Terraform,
            provider: TemplateProvider::Any,
            tags: vec!["Database".into(), "PostgreSQL".into()],
            filename: "db.tf".into(),
            body: String::new(),
            requires: Vec::new(),
        };
        assert_eq!(entry.matching_tags(&tokens(&["database"])), vec!["database"]);
        assert!(entry.matching_tags(&tokens(&["cache"])).is_empty());
    }

    #[test]
    fn test_provider_filter() {
        let store = TemplateStore::builtin();
        let t = tokens(&["database"]);
        let azure: Vec<_> = store.matching(&t, CloudProvider::Azure).collect();
        assert!(!azure.is_empty());
        assert!(azure.iter().all(|e| e.provider.supports(CloudProvider::Azure)));
        assert!(azure.iter().all(|e| e.provider != TemplateProvider::Aws));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let entry = TemplateEntry {
            name: "same".into(),
            kind: ArtifactKind::Monitoring,
            provider: TemplateProvider::Any,
            tags: vec!["monitoring".into()],
            filename: "a.yml".into(),
            body: String::new(),
            requires: Vec::new(),
        };
        let err = TemplateStore::with_entries(vec![entry.clone(), entry]).unwrap_err();
        assert!(err.to_string().contains("duplicate template name"));
    }

    #[test]
    fn test_rejects_path_in_filename() {
        let entry = TemplateEntry {
            name: "escape".into(),
            kind: ArtifactKind::Terraform,
            provider: TemplateProvider::Any,
            tags: vec!["network".into()],
            filename: "../main.tf".into(),
            body: String::new(),
            requires: Vec::new(),
        };
        assert!(TemplateStore::with_entries(vec![entry]).is_err());
    }
}
