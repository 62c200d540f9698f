//! Pipeline tests against the in-memory store with fake collaborators

mod common;

use common::{orchestrator, wait_for_terminal, FakeDeployer, FakeLlm, NODE_API_REPLY};
use request_service::storage::CasOutcome;
use request_service::{RequestStore, Submission};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use text2iac_common::{
    ArtifactKind, Environment, Error, RequestOptions, RequestSource, RequestStatus,
};

fn submission(description: &str) -> Submission {
    Submission {
        description: description.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_node_api_with_postgres_completes() {
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), FakeDeployer::succeeding());

    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();
    assert_eq!(accepted.status, RequestStatus::Pending);
    assert_eq!(accepted.environment, Environment::Development);

    let (done, seen) = wait_for_terminal(&env.orchestrator, &accepted.id).await;
    assert_eq!(done.status, RequestStatus::Completed, "{}", done.message);

    // Never regresses
    let order: Vec<usize> = seen
        .iter()
        .map(|s| RequestStatus::all().iter().position(|x| x == s).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);

    let analysis = done.analysis.as_ref().unwrap();
    assert!(analysis.components.iter().any(|c| c == "database"));

    let artifacts = done.artifacts.as_ref().unwrap();
    assert!(
        artifacts.contains_key(&ArtifactKind::Terraform)
            || artifacts.contains_key(&ArtifactKind::DockerCompose)
    );
    let terraform_dir = std::path::Path::new(&artifacts[&ArtifactKind::Terraform]);
    assert!(terraform_dir.starts_with(env.artifact_dir.path().join(&done.id)));
    assert!(terraform_dir.join("database.tf").exists());

    assert!(done.estimated_monthly_cost.unwrap() > 0.0);
    assert!(done.resources.is_empty(), "no deployment without options.deploy");
    assert!(done.updated_at >= done.created_at);
}

#[tokio::test]
async fn test_submit_returns_before_analysis_finishes() {
    let llm = FakeLlm::slow(NODE_API_REPLY, Duration::from_secs(2));
    let env = orchestrator(llm, FakeDeployer::succeeding());

    let started = Instant::now();
    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    let status = env.orchestrator.get_status(&accepted.id).await.unwrap();
    assert!(!status.is_terminal());

    env.orchestrator.cancel(&accepted.id).await.unwrap();
}

#[tokio::test]
async fn test_analyzer_network_error_fails_request() {
    let env = orchestrator(
        FakeLlm::failing("connection refused by llm host"),
        FakeDeployer::succeeding(),
    );

    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();
    let (done, _) = wait_for_terminal(&env.orchestrator, &accepted.id).await;

    assert_eq!(done.status, RequestStatus::Failed);
    assert!(done.message.contains("connection refused by llm host"));
    assert!(done.artifacts.is_none());
    assert!(done.analysis.is_none());
}

#[tokio::test]
async fn test_unparseable_analysis_uses_fallback() {
    let env = orchestrator(
        FakeLlm::replying("I'd rather not answer in JSON"),
        FakeDeployer::succeeding(),
    );

    let accepted = env
        .orchestrator
        .submit(submission("Something vague about servers"))
        .await
        .unwrap();
    let (done, _) = wait_for_terminal(&env.orchestrator, &accepted.id).await;

    assert_eq!(done.status, RequestStatus::Completed, "{}", done.message);
    assert_eq!(
        done.analysis.unwrap().components,
        vec!["basic-infrastructure".to_string()]
    );
}

#[tokio::test]
async fn test_cancel_while_analyzing_is_final() {
    let llm = FakeLlm::slow(NODE_API_REPLY, Duration::from_millis(300));
    let env = orchestrator(llm.clone(), FakeDeployer::succeeding());

    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();

    // Wait until the analyzer has been called
    let deadline = Instant::now() + Duration::from_secs(5);
    while llm.calls.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = env.orchestrator.cancel(&accepted.id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let now = env.orchestrator.get_status(&accepted.id).await.unwrap();
    assert_eq!(now.status, RequestStatus::Cancelled);

    // Well past the analyzer delay
    tokio::time::sleep(Duration::from_millis(600)).await;
    let later = env.orchestrator.get_status(&accepted.id).await.unwrap();
    assert_eq!(later.status, RequestStatus::Cancelled);
    assert!(later.analysis.is_none());
    assert!(later.artifacts.is_none());
    assert_eq!(env.orchestrator.in_flight(), 0);

    let err = env.orchestrator.cancel(&accepted.id).await.unwrap_err();
    assert!(matches!(err, Error::Terminal { .. }));
}

#[tokio::test]
async fn test_cancel_unknown_request() {
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), FakeDeployer::succeeding());
    let err = env.orchestrator.cancel("no-such-id").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = env.orchestrator.get_status("no-such-id").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_validation_creates_no_record() {
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), FakeDeployer::succeeding());

    let too_long = "x".repeat(2001);
    for description in ["short", "123456789", too_long.as_str()] {
        let err = env
            .orchestrator
            .submit(submission(description))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{}", description.len());
    }

    let err = env
        .orchestrator
        .submit(Submission {
            requestor: Some("not-an-email".into()),
            ..submission("Create a Node.js API with PostgreSQL")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(env.orchestrator.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_deploy_applies_terraform_and_reports_resources() {
    let deployer = FakeDeployer::succeeding();
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), deployer.clone());

    let accepted = env
        .orchestrator
        .submit(Submission {
            options: RequestOptions {
                deploy: true,
                ..Default::default()
            },
            ..submission("Create a Node.js API with PostgreSQL")
        })
        .await
        .unwrap();
    let (done, _) = wait_for_terminal(&env.orchestrator, &accepted.id).await;

    assert_eq!(done.status, RequestStatus::Completed, "{}", done.message);
    let kinds: Vec<_> = done.resources.iter().map(|r| r.resource_type.as_str()).collect();
    assert_eq!(kinds, vec!["terraform_resource", "kubectl_resource"]);

    // Terraform first, then the Kubernetes manifests
    let applied = deployer.applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].0, "terraform");
    assert!(applied[0].1.contains(&"database.tf".to_string()));
    assert_eq!(applied[1].0, "kubectl");
}

#[tokio::test]
async fn test_deploy_failure_keeps_tool_output() {
    let env = orchestrator(
        FakeLlm::replying(NODE_API_REPLY),
        FakeDeployer::terraform_failing(),
    );

    let accepted = env
        .orchestrator
        .submit(Submission {
            options: RequestOptions {
                deploy: true,
                ..Default::default()
            },
            ..submission("Create a Node.js API with PostgreSQL")
        })
        .await
        .unwrap();
    let (done, _) = wait_for_terminal(&env.orchestrator, &accepted.id).await;

    assert_eq!(done.status, RequestStatus::Failed);
    assert!(done.message.contains("terraform apply failed"));
    assert!(done
        .deploy_output
        .as_deref()
        .unwrap()
        .contains("could not reach provider"));
    assert!(done.artifacts.is_none());
    // Analysis survives the failure
    assert!(done.analysis.is_some());
}

#[tokio::test]
async fn test_status_updates_are_broadcast() {
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), FakeDeployer::succeeding());
    let mut rx = env.orchestrator.subscribe();

    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();

    let mut statuses = Vec::new();
    while let Ok(Ok(update)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        if update.request_id != accepted.id {
            continue;
        }
        statuses.push(update.status);
        if update.status.is_terminal() {
            break;
        }
    }

    assert_eq!(
        statuses,
        vec![
            RequestStatus::Pending,
            RequestStatus::Analyzing,
            RequestStatus::Generating,
            RequestStatus::Completed
        ]
    );
}

#[tokio::test]
async fn test_repeated_reads_are_identical() {
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), FakeDeployer::succeeding());
    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();
    wait_for_terminal(&env.orchestrator, &accepted.id).await;

    let first = env.orchestrator.get_status(&accepted.id).await.unwrap();
    let second = env.orchestrator.get_status(&accepted.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_list_by_requestor_and_stats() {
    let env = orchestrator(FakeLlm::replying(NODE_API_REPLY), FakeDeployer::succeeding());

    for _ in 0..2 {
        let accepted = env
            .orchestrator
            .submit(Submission {
                requestor: Some("ops@example.com".into()),
                source: RequestSource::Email,
                ..submission("Create a Node.js API with PostgreSQL")
            })
            .await
            .unwrap();
        wait_for_terminal(&env.orchestrator, &accepted.id).await;
    }

    let requests = env
        .orchestrator
        .list_by_requestor("ops@example.com")
        .await
        .unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.source == RequestSource::Email));

    let stats = env.orchestrator.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 2);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_requests() {
    let llm = FakeLlm::slow(NODE_API_REPLY, Duration::from_secs(30));
    let env = orchestrator(llm, FakeDeployer::succeeding());

    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), env.orchestrator.shutdown())
        .await
        .expect("shutdown should not wait for the analyzer");

    let done = env.orchestrator.get_status(&accepted.id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Cancelled);
    assert!(done.message.contains("shutting down"));

    let err = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

#[tokio::test]
async fn test_late_stage_result_after_external_cancel_is_discarded() {
    let llm = FakeLlm::slow(NODE_API_REPLY, Duration::from_millis(300));
    let env = orchestrator(llm.clone(), FakeDeployer::succeeding());
    let mut rx = env.orchestrator.subscribe();

    let accepted = env
        .orchestrator
        .submit(submission("Create a Node.js API with PostgreSQL"))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while llm.calls.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Another writer cancels in the store; the pipeline's token never fires
    let mut cancelled = env.store.get(&accepted.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, RequestStatus::Analyzing);
    cancelled
        .transition(RequestStatus::Cancelled, "Cancelled elsewhere")
        .unwrap();
    let outcome = env
        .store
        .compare_and_set(RequestStatus::Analyzing, &cancelled)
        .await
        .unwrap();
    assert_eq!(outcome, CasOutcome::Applied);

    let deadline = Instant::now() + Duration::from_secs(5);
    while env.orchestrator.in_flight() > 0 {
        assert!(Instant::now() < deadline, "pipeline never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let stored = env.store.get(&accepted.id).await.unwrap().unwrap();
    assert_eq!(stored, cancelled);
    assert!(stored.analysis.is_none());

    // Broadcasts (and terminal webhooks) only follow applied writes
    let mut statuses = Vec::new();
    while let Ok(update) = rx.try_recv() {
        if update.request_id == accepted.id {
            statuses.push(update.status);
        }
    }
    assert_eq!(statuses, vec![RequestStatus::Pending, RequestStatus::Analyzing]);
}
