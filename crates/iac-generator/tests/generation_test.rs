//! End-to-end tests for template selection and rendering

use iac_generator::{component_tags, GenerationContext, TemplateGenerator, TemplateStore};
use std::fs;
use tempfile::TempDir;
use text2iac_common::{Analysis, ArtifactKind, Complexity, Environment, RequestOptions};

fn analysis(components: &[&str]) -> Analysis {
    Analysis {
        components: components.iter().map(|c| c.to_string()).collect(),
        complexity: Complexity::Medium,
        project_name: "orders-service".into(),
        requirements: vec!["Highly available".into()],
        recommendations: vec![],
    }
}

#[test]
fn test_every_matched_template_intersects_components() {
    let generator = TemplateGenerator::default();
    let component_sets: &[&[&str]] = &[
        &["api", "database"],
        &["Redis", "web"],
        &["API", "PostgreSQL", "metrics"],
        &["storage"],
        &["kubernetes", "postgresql"],
        &["basic-infrastructure"],
    ];

    for components in component_sets {
        let a = analysis(components);
        let out = generator
            .generate(&a, &GenerationContext::default())
            .expect("generation should succeed");
        let lowered: Vec<String> = a.components.iter().map(|c| c.to_lowercase()).collect();

        assert!(!out.matched.is_empty());
        for name in &out.matched {
            let entry = generator.store().get(name).unwrap();
            assert!(
                entry
                    .tags
                    .iter()
                    .any(|tag| lowered.contains(&tag.to_lowercase())),
                "{} matched without a shared tag for {:?}",
                name,
                components
            );
        }
        assert_eq!(component_tags(&a.components).len(), lowered.len());
    }
}

#[test]
fn test_fallback_analysis_still_generates() {
    let out = TemplateGenerator::default()
        .generate(&Analysis::fallback(), &GenerationContext::default())
        .unwrap();
    assert!(out.get(ArtifactKind::Terraform).unwrap().contains_key("main.tf"));
}

#[test]
fn test_write_to_lays_out_kind_directories() {
    let dir = TempDir::new().unwrap();
    let ctx = GenerationContext {
        environment: Environment::Staging,
        options: RequestOptions {
            include_monitoring: true,
            ..Default::default()
        },
        template_hint: None,
    };
    let out = TemplateGenerator::default()
        .generate(&analysis(&["api", "database"]), &ctx)
        .unwrap();

    let locations = out.write_to(dir.path()).unwrap();
    let terraform_dir = &locations[&ArtifactKind::Terraform];
    assert_eq!(terraform_dir, &dir.path().join("terraform"));

    let db = fs::read_to_string(terraform_dir.join("database.tf")).unwrap();
    assert!(db.contains("orders-service-staging-db"));
    assert!(!db.contains("{{"));

    assert!(dir.path().join("docker-compose/docker-compose.yml").exists());
    assert!(dir.path().join("monitoring/prometheus.yml").exists());
}

#[test]
fn test_custom_templates_loaded_from_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("queue.json"),
        r#"{
            "name": "compose-rabbitmq",
            "kind": "dockerCompose",
            "tags": ["queue", "rabbitmq"],
            "filename": "docker-compose.queue.yml",
            "body": "services:\n  queue:\n    image: rabbitmq:3\n"
        }"#,
    )
    .unwrap();
    fs::write(dir.path().join("README.txt"), "ignored").unwrap();

    let store = TemplateStore::load_dir(dir.path()).unwrap();
    assert!(store.get("compose-rabbitmq").is_some());

    let out = TemplateGenerator::new(store)
        .generate(&analysis(&["queue"]), &GenerationContext::default())
        .unwrap();
    let compose = out.get(ArtifactKind::DockerCompose).unwrap();
    assert!(compose["docker-compose.queue.yml"].contains("rabbitmq:3"));
}

#[test]
fn test_malformed_template_file_fails_loading() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    let err = TemplateStore::load_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn test_template_hint_adds_match_tokens() {
    let ctx = GenerationContext {
        template_hint: Some("kubernetes".into()),
        ..Default::default()
    };
    let out = TemplateGenerator::default()
        .generate(&analysis(&["storage"]), &ctx)
        .unwrap();
    assert!(out.get(ArtifactKind::Kubernetes).is_some());
    assert_eq!(out.requested, vec!["k8s-app"]);
    assert!(!out.matched.contains(&"k8s-app".to_string()));
}

#[test]
fn test_options_alone_do_not_satisfy_matching() {
    let ctx = GenerationContext {
        options: RequestOptions {
            include_monitoring: true,
            ..Default::default()
        },
        template_hint: Some("kubernetes".into()),
        ..Default::default()
    };
    let err = TemplateGenerator::default()
        .generate(&analysis(&["Node.js API"]), &ctx)
        .unwrap_err();
    assert!(err.to_string().contains("Node.js API"));
}
