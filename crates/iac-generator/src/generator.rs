//! Template selection and rendering
//!
//! Turns an [`Analysis`] into concrete artifact files. A template is eligible
//! when one of its tags equals one of the analyzed components, compared
//! case-insensitively. Submission options (`includeMonitoring`, `includeCI`)
//! and the template hint select further templates by tag; those are reported
//! in [`GeneratedArtifacts::requested`], never in `matched`. All eligible
//! templates are rendered; when two of them would write the same file,
//! precedence is:
//!
//! 1. a provider-specific template beats a provider-independent one
//! 2. more matching tags beats fewer
//! 3. the lexicographically smaller name wins
//!
//! Losing candidates are reported in [`GeneratedArtifacts::shadowed`].

use crate::catalog::{TemplateEntry, TemplateStore};
use crate::cost::estimate_monthly_cost;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use text2iac_common::{Analysis, ArtifactKind, Environment, Error, RequestOptions, Result};
use tracing::{debug, info, warn};

/// Per-request inputs besides the analysis
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub environment: Environment,
    pub options: RequestOptions,
    /// Free-form template hint supplied with the submission
    pub template_hint: Option<String>,
}

/// A template that lost a filename conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowedTemplate {
    pub template: String,
    pub kind: ArtifactKind,
    pub filename: String,
    pub shadowed_by: String,
}

/// Rendered artifacts, grouped by kind then filename
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifacts {
    #[serde(flatten)]
    pub files: BTreeMap<ArtifactKind, BTreeMap<String, String>>,

    /// Templates selected because a tag equals a component
    pub matched: Vec<String>,

    /// Templates selected only through submission options or the hint
    pub requested: Vec<String>,

    /// Templates pulled in because a matched template requires them
    pub dependencies: Vec<String>,

    pub shadowed: Vec<ShadowedTemplate>,

    pub estimated_monthly_cost: f64,
}

impl GeneratedArtifacts {
    pub fn get(&self, kind: ArtifactKind) -> Option<&BTreeMap<String, String>> {
        self.files.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(|files| files.is_empty())
    }

    pub fn kinds(&self) -> impl Iterator<Item = ArtifactKind> + '_ {
        self.files.keys().copied()
    }

    /// Write every file under `root/<kind>/<filename>`
    ///
    /// Returns the directory written for each kind.
    pub fn write_to(&self, root: &Path) -> Result<BTreeMap<ArtifactKind, PathBuf>> {
        let mut locations = BTreeMap::new();

        for (kind, files) in &self.files {
            let dir = root.join(kind.dir_name());
            std::fs::create_dir_all(&dir)?;

            for (filename, content) in files {
                std::fs::write(dir.join(filename), content)?;
            }

            debug!("Wrote {} {} file(s) to {}", files.len(), kind, dir.display());
            locations.insert(*kind, dir);
        }

        Ok(locations)
    }
}

/// Selects and renders templates from a [`TemplateStore`]
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator {
    store: TemplateStore,
}

impl TemplateGenerator {
    pub fn new(store: TemplateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Generate artifacts for `analysis`
    pub fn generate(
        &self,
        analysis: &Analysis,
        ctx: &GenerationContext,
    ) -> Result<GeneratedArtifacts> {
        let components = component_tags(&analysis.components);
        let provider = ctx.options.cloud_provider;

        let mut candidates: Vec<&TemplateEntry> =
            self.store.matching(&components, provider).collect();
        if candidates.is_empty() {
            return Err(Error::Generation(format!(
                "no templates match components [{}] for provider {}",
                analysis.components.join(", "),
                provider.as_str()
            )));
        }

        let requested_tags = requested_tags(ctx);
        for entry in self.store.matching(&requested_tags, provider) {
            if !candidates.iter().any(|c| c.name == entry.name) {
                candidates.push(entry);
            }
        }

        let mut slots: BTreeMap<(ArtifactKind, String), Vec<&TemplateEntry>> = BTreeMap::new();
        for entry in candidates {
            slots
                .entry((entry.kind, entry.filename.clone()))
                .or_default()
                .push(entry);
        }

        let mut selected: BTreeMap<(ArtifactKind, String), &TemplateEntry> = BTreeMap::new();
        let mut shadowed = Vec::new();

        for (slot, mut group) in slots {
            group.sort_by_key(|e| {
                (
                    Reverse(e.provider.is_specific()),
                    Reverse(e.matching_tags(&components).len()),
                    e.name.clone(),
                )
            });

            let winner = group[0];
            for loser in &group[1..] {
                warn!(
                    "Template {} shadowed by {} for {}/{}",
                    loser.name, winner.name, slot.0, slot.1
                );
                shadowed.push(ShadowedTemplate {
                    template: loser.name.clone(),
                    kind: slot.0,
                    filename: slot.1.clone(),
                    shadowed_by: winner.name.clone(),
                });
            }
            selected.insert(slot, winner);
        }

        let (matched, requested): (Vec<&TemplateEntry>, Vec<&TemplateEntry>) = selected
            .values()
            .copied()
            .partition(|e| !e.matching_tags(&components).is_empty());
        let mut matched: Vec<String> = matched.into_iter().map(|e| e.name.clone()).collect();
        let mut requested: Vec<String> = requested.into_iter().map(|e| e.name.clone()).collect();
        matched.sort();
        requested.sort();

        let dependencies = self.resolve_dependencies(&mut selected, &mut shadowed, ctx)?;

        let vars = render_vars(analysis, ctx);
        let mut files: BTreeMap<ArtifactKind, BTreeMap<String, String>> = BTreeMap::new();
        for ((kind, filename), entry) in &selected {
            files
                .entry(*kind)
                .or_default()
                .insert(filename.clone(), render(&entry.body, &vars));
        }

        let artifacts = GeneratedArtifacts {
            files,
            matched,
            requested,
            dependencies,
            shadowed,
            estimated_monthly_cost: estimate_monthly_cost(&analysis.components),
        };

        info!(
            "Generated {} artifact kind(s) from {} template(s) for {}",
            artifacts.files.len(),
            selected.len(),
            analysis.project_name
        );

        Ok(artifacts)
    }

    /// Pull in templates required by the selection, transitively
    fn resolve_dependencies<'a>(
        &'a self,
        selected: &mut BTreeMap<(ArtifactKind, String), &'a TemplateEntry>,
        shadowed: &mut Vec<ShadowedTemplate>,
        ctx: &GenerationContext,
    ) -> Result<Vec<String>> {
        let mut added = Vec::new();
        let mut pending: Vec<String> = selected
            .values()
            .flat_map(|e| e.requires.iter().cloned())
            .collect();

        while let Some(name) = pending.pop() {
            if selected.values().any(|e| e.name == name) {
                continue;
            }

            let entry = self.store.get(&name).ok_or_else(|| {
                Error::Generation(format!("required template {} not found", name))
            })?;

            if !entry.provider.supports(ctx.options.cloud_provider) {
                return Err(Error::Generation(format!(
                    "required template {} does not support provider {}",
                    name,
                    ctx.options.cloud_provider.as_str()
                )));
            }

            let slot = (entry.kind, entry.filename.clone());
            if let Some(occupant) = selected.get(&slot) {
                // The matched template already provides this file
                shadowed.push(ShadowedTemplate {
                    template: entry.name.clone(),
                    kind: entry.kind,
                    filename: entry.filename.clone(),
                    shadowed_by: occupant.name.clone(),
                });
                continue;
            }

            pending.extend(entry.requires.iter().cloned());
            selected.insert(slot, entry);
            added.push(entry.name.clone());
        }

        added.sort();
        Ok(added)
    }
}

/// Lowercased, trimmed component names
pub fn component_tags(components: &[String]) -> BTreeSet<String> {
    components
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Tags asked for by submission options and the template hint
pub fn requested_tags(ctx: &GenerationContext) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if ctx.options.include_monitoring {
        tags.insert("monitoring".to_string());
    }
    if ctx.options.include_ci {
        tags.insert("ci".to_string());
    }
    if let Some(hint) = &ctx.template_hint {
        tags.extend(component_tags(std::slice::from_ref(hint)));
    }
    tags
}

/// Lowercase, dash-separated name usable in resource identifiers
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug: String = slug.trim_matches('-').chars().take(40).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "my-infrastructure".to_string()
    } else {
        slug.to_string()
    }
}

fn render_vars(analysis: &Analysis, ctx: &GenerationContext) -> Vec<(&'static str, String)> {
    vec![
        ("project_name", slugify(&analysis.project_name)),
        ("environment", ctx.environment.as_str().to_string()),
        ("region", ctx.options.region().to_string()),
        ("provider", ctx.options.cloud_provider.as_str().to_string()),
    ]
}

/// Substitute `{{key}}` placeholders; unknown placeholders are left as-is
pub fn render(body: &str, vars: &[(&str, String)]) -> String {
    let mut out = body.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}
