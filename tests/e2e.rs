//! End-to-end scenarios: the production router plus a live worker pool
//! against mock collaborators.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use common::{
    HarnessOptions, MockLlmMode, TestHarness, evaluate_request, response_json, result_request,
    upload_documents,
};
use evalbox::ledger::JobStatus;

async fn submit(harness: &TestHarness, key: Option<&str>) -> String {
    let (cv_id, project_id) = upload_documents(&harness.app).await;
    let response = harness
        .app
        .clone()
        .oneshot(evaluate_request(
            &json!({"cv_id": cv_id, "project_id": project_id}),
            key,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "queued");
    body["id"].as_str().unwrap().to_string()
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|part| !part.trim().is_empty())
        .count()
}

#[tokio::test]
async fn happy_path_produces_bounded_scores_and_feedback() {
    let harness = TestHarness::new().await;
    let job_id = submit(&harness, None).await;

    assert_eq!(
        harness.wait_for_terminal(&job_id).await,
        JobStatus::Completed
    );

    let response = harness
        .app
        .clone()
        .oneshot(result_request(&job_id, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(body["status"], "completed");
    let result = &body["result"];
    let cv_match_rate = result["cv_match_rate"].as_f64().unwrap();
    let project_score = result["project_score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&cv_match_rate));
    assert!((1.0..=10.0).contains(&project_score));

    let summary = result["overall_summary"].as_str().unwrap();
    assert!((3..=5).contains(&sentence_count(summary)));
    for field in ["cv_feedback", "project_feedback"] {
        let feedback = result[field].as_str().unwrap();
        assert!((1..=3).contains(&sentence_count(feedback)));
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn idempotent_double_submit_runs_exactly_one_evaluation() {
    let harness = TestHarness::new().await;
    let (cv_id, project_id) = upload_documents(&harness.app).await;
    let body = json!({"cv_id": cv_id, "project_id": project_id});

    let first = response_json(
        harness
            .app
            .clone()
            .oneshot(evaluate_request(&body, Some("abc-1")))
            .await
            .unwrap(),
    )
    .await;
    let second = response_json(
        harness
            .app
            .clone()
            .oneshot(evaluate_request(&body, Some("abc-1")))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(harness.queue.current_seq(), 1);

    let job_id = first["id"].as_str().unwrap();
    assert_eq!(
        harness.wait_for_terminal(job_id).await,
        JobStatus::Completed
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn schema_invalid_llm_output_surfaces_schema_invalid_code() {
    let harness = TestHarness::with_options(HarnessOptions {
        llm_mode: MockLlmMode::CvSchemaInvalid,
        ..HarnessOptions::default()
    })
    .await;
    let job_id = submit(&harness, None).await;

    assert_eq!(harness.wait_for_terminal(&job_id).await, JobStatus::Failed);

    let body = response_json(
        harness
            .app
            .clone()
            .oneshot(result_request(&job_id, None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["code"], "SCHEMA_INVALID");

    harness.shutdown().await;
}

#[tokio::test]
async fn upstream_rate_limit_exhaustion_surfaces_rate_limit_code() {
    let harness = TestHarness::with_options(HarnessOptions {
        llm_mode: MockLlmMode::AlwaysRateLimited,
        max_retries: 2,
        ..HarnessOptions::default()
    })
    .await;
    let job_id = submit(&harness, None).await;

    assert_eq!(harness.wait_for_terminal(&job_id).await, JobStatus::Failed);

    let body = response_json(
        harness
            .app
            .clone()
            .oneshot(result_request(&job_id, None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["error"]["code"], "UPSTREAM_RATE_LIMIT");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("rate limit")
    );

    // The message was parked on the dead-letter queue.
    assert_eq!(harness.queue.list_dlq(10).unwrap().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn sweeper_recovers_job_abandoned_by_dead_worker() {
    // No workers: the claim below simulates a worker that died mid-job.
    let harness = TestHarness::with_options(HarnessOptions {
        start_workers: false,
        ..HarnessOptions::default()
    })
    .await;
    let job_id = submit(&harness, None).await;

    harness
        .ledger
        .update_status(&job_id, JobStatus::Processing, None)
        .unwrap();

    // The harness sweeper treats any processing job as past max age.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert_eq!(harness.sweep(), 1);

    let body = response_json(
        harness
            .app
            .clone()
            .oneshot(result_request(&job_id, None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["code"], "UPSTREAM_TIMEOUT");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("maximum age")
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn conditional_fetch_round_trips_etag() {
    let harness = TestHarness::new().await;
    let job_id = submit(&harness, None).await;
    assert_eq!(
        harness.wait_for_terminal(&job_id).await,
        JobStatus::Completed
    );

    let first = harness
        .app
        .clone()
        .oneshot(result_request(&job_id, None))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first
        .headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let second = harness
        .app
        .clone()
        .oneshot(result_request(&job_id, Some(&etag)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    let bytes = axum::body::to_bytes(second.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());

    // A different validator still gets the full body.
    let third = harness
        .app
        .clone()
        .oneshot(result_request(&job_id, Some("\"someone-elses-etag\"")))
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::OK);

    harness.shutdown().await;
}

#[tokio::test]
async fn completed_and_failed_bodies_hash_to_different_etags() {
    let harness = TestHarness::new().await;
    let completed_job = submit(&harness, None).await;
    assert_eq!(
        harness.wait_for_terminal(&completed_job).await,
        JobStatus::Completed
    );

    let failed_harness = TestHarness::with_options(HarnessOptions {
        llm_mode: MockLlmMode::CvSchemaInvalid,
        ..HarnessOptions::default()
    })
    .await;
    let failed_job = submit(&failed_harness, None).await;
    assert_eq!(
        failed_harness.wait_for_terminal(&failed_job).await,
        JobStatus::Failed
    );

    let etag_of = |response: &axum::response::Response| {
        response
            .headers()
            .get("etag")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    };

    let completed = harness
        .app
        .clone()
        .oneshot(result_request(&completed_job, None))
        .await
        .unwrap();
    let failed = failed_harness
        .app
        .clone()
        .oneshot(result_request(&failed_job, None))
        .await
        .unwrap();
    assert_ne!(etag_of(&completed), etag_of(&failed));

    harness.shutdown().await;
    failed_harness.shutdown().await;
}
