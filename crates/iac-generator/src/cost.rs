//! Order-of-magnitude monthly cost estimate
//!
//! A fixed per-component lookup summed across the analyzed components.
//! It is a rough planning figure, not a billing computation.

/// Estimate in USD for components not found in the table
pub const DEFAULT_COMPONENT_COST: f64 = 20.0;

/// First entry whose key occurs in the component name wins
const COMPONENT_COSTS: &[(&str, f64)] = &[
    ("kubernetes", 75.0),
    ("k8s", 75.0),
    ("kafka", 60.0),
    ("database", 50.0),
    ("postgres", 50.0),
    ("mysql", 50.0),
    ("rds", 50.0),
    ("mongo", 45.0),
    ("cache", 25.0),
    ("redis", 25.0),
    ("api", 30.0),
    ("backend", 30.0),
    ("web", 30.0),
    ("load-balancer", 20.0),
    ("loadbalancer", 20.0),
    ("cdn", 20.0),
    ("queue", 15.0),
    ("monitoring", 15.0),
    ("frontend", 15.0),
    ("storage", 10.0),
    ("s3", 10.0),
    ("network", 5.0),
    ("basic-infrastructure", 5.0),
];

/// Monthly estimate for one component
pub fn component_cost(component: &str) -> f64 {
    let component = component.to_lowercase();
    COMPONENT_COSTS
        .iter()
        .find(|(key, _)| component.contains(key))
        .map(|(_, cost)| *cost)
        .unwrap_or(DEFAULT_COMPONENT_COST)
}

/// Sum of the per-component estimates
pub fn estimate_monthly_cost(components: &[String]) -> f64 {
    components.iter().map(|c| component_cost(c)).sum()
}
