//! IaC Generator
//!
//! Selects infrastructure templates (Terraform, Kubernetes, Docker Compose,
//! monitoring, CI) that match an analyzed description and renders them into
//! artifact files. Also provides the rough monthly cost estimate reported
//! with each generation.

mod builtin;
pub mod catalog;
pub mod cost;
pub mod generator;

pub use catalog::{TemplateEntry, TemplateProvider, TemplateStore};
pub use cost::{component_cost, estimate_monthly_cost};
pub use generator::{
    component_tags, requested_tags, slugify, GeneratedArtifacts, GenerationContext, ShadowedTemplate,
    TemplateGenerator,
};
