//! Exports of a finished job, to files and in both modes

use crate::support::{seed_proxies, test_engine, test_store, ScriptedRenderer, Step};
use std::sync::Arc;
use sumi_relay::crawler::JobSubmission;
use sumi_relay::output::ExportMode;
use sumi_relay::JobStatus;

const PRODUCT_PAGE: &str = r#"<html><head><title>Widget</title><meta name="description" content="A widget"></head>
<body><h1>Widget</h1><a href="/buy">Buy</a><table><tr><td>S</td><td>$5</td></tr></table></body></html>"#;

async fn finished_job(count: usize) -> (sumi_relay::RelayEngine, i64) {
    let store = test_store();
    seed_proxies(&store, &["US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let urls: Vec<String> = (0..count)
        .map(|i| format!("https://shop.test/item/{}", i))
        .collect();
    for url in &urls {
        renderer.script(url, vec![Step::Page(PRODUCT_PAGE.replace("Widget", url))]);
    }

    let engine = test_engine(renderer, &store);
    let mut submission = JobSubmission::new(urls);
    submission.worker_count = 4;
    let job_id = engine.submit_job(submission).unwrap();
    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );
    (engine, job_id)
}

#[tokio::test(start_paused = true)]
async fn test_structured_export_to_file() {
    let (engine, job_id) = finished_job(3).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");

    let written = engine
        .export(
            job_id,
            ExportMode::Structured,
            std::fs::File::create(&path).unwrap(),
        )
        .unwrap();
    assert_eq!(written, 3);

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries {
        let url = entry["url"].as_str().unwrap();
        assert_eq!(entry["title"], url);
        assert_eq!(entry["metaTags"]["description"], "A widget");
        assert_eq!(entry["links"][0]["href"], "https://shop.test/buy");
        assert_eq!(entry["tables"][0][0][1], "$5");
    }
}

#[tokio::test(start_paused = true)]
async fn test_large_job_streams_raw_export() {
    let (engine, job_id) = finished_job(60).await;

    let mut out = Vec::new();
    let written = engine.export(job_id, ExportMode::Raw, &mut out).unwrap();
    assert_eq!(written, 60);

    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 60);
    assert!(entries.iter().all(|e| e["statusCode"] == 200));
    assert!(entries.iter().all(|e| e["contentHash"].is_string()));

    let progress = engine.export_progress(job_id, ExportMode::Raw).unwrap();
    assert_eq!(progress.total, 60);
    assert_eq!(progress.processed, 60);
    assert_eq!(progress.progress_percent, 100.0);
}
