//! End-to-end runs of the engine against a scripted renderer
//!
//! Most tests run on a paused tokio clock, so pacing sleeps, timeouts and
//! cooloffs complete instantly while keeping their order. The multi-thread
//! runs use real time with a short cooloff.

use crate::support::{
    add_proxy, seed_proxies, test_config, test_engine, test_store, urls, ScriptedRenderer, Step,
};
use std::sync::Arc;
use std::time::Duration;
use sumi_relay::crawler::{fingerprint, JobSubmission};
use sumi_relay::storage::{lock_store, JobStore, SharedStore, UrlRecord, UrlUpdate};
use sumi_relay::{JobStatus, RelayEngine, RetryStatus};

const BLOCK_PAGE: &str = "<html><body>Checking your browser...</body></html>";

fn job_urls(store: &SharedStore, job_id: i64) -> Vec<UrlRecord> {
    lock_store(store).unwrap().list_urls(job_id, 0, 100).unwrap()
}

fn url_by_address(store: &SharedStore, job_id: i64, address: &str) -> UrlRecord {
    job_urls(store, job_id)
        .into_iter()
        .find(|u| u.url == address)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_single_worker_all_succeed() {
    let store = test_store();
    seed_proxies(&store, &["US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&[
            "https://shop.test/1",
            "https://shop.test/2",
            "https://shop.test/3",
        ])))
        .unwrap();
    let status = engine.start(job_id).unwrap().wait().await.unwrap();

    assert_eq!(status, JobStatus::Completed);
    let report = engine.status(job_id).unwrap();
    assert_eq!(report.status, "completed");
    assert_eq!(report.urls_processed, 3);
    assert_eq!(report.progress_percent, 100.0);
    assert_eq!(report.successful_requests, 3);
    assert_eq!(report.failed_requests, 0);

    let recorded = job_urls(&store, job_id);
    for url in &recorded {
        assert_eq!(url.retry_status, RetryStatus::Success);
        assert!(url.content.is_some());
        assert!(url.structured_content.is_some());
        assert_eq!(url.status_code, Some(200));
    }

    // Ascending ID order, one fresh proxy per attempt
    let calls = renderer.calls();
    let order: Vec<&str> = calls.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        order,
        vec!["https://shop.test/1", "https://shop.test/2", "https://shop.test/3"]
    );
    assert_ne!(calls[0].proxy, calls[1].proxy);
    assert!(calls.iter().all(|c| c.timeout == Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retried_with_extended_window() {
    let store = test_store();
    seed_proxies(&store, &["US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    renderer.script(
        "https://slow.test/",
        vec![
            Step::Timeout,
            Step::Slow(Duration::from_secs(10), "<p>finally</p>".to_string()),
        ],
    );
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&["https://slow.test/"])))
        .unwrap();
    let handle = engine.start(job_id).unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    let url = url_by_address(&store, job_id, "https://slow.test/");
    assert_eq!(url.retry_status, RetryStatus::Pending);

    tokio::time::sleep(Duration::from_secs(15)).await;
    let url = url_by_address(&store, job_id, "https://slow.test/");
    assert_eq!(url.retry_status, RetryStatus::RetryPending);
    assert_eq!(url.retry_count, 1);

    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);

    let url = url_by_address(&store, job_id, "https://slow.test/");
    assert_eq!(url.retry_status, RetryStatus::Success);
    assert_eq!(url.content.as_deref(), Some("<p>finally</p>"));

    let timeouts: Vec<Duration> = renderer
        .calls_for("https://slow.test/")
        .iter()
        .map(|c| c.timeout)
        .collect();
    assert_eq!(
        timeouts,
        vec![Duration::from_secs(30), Duration::from_secs(120)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_fingerprint_blocks_proxy() {
    let store = test_store();
    seed_proxies(&store, &["US", "US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    renderer.script(
        "https://guarded.test/",
        vec![
            Step::Page(BLOCK_PAGE.to_string()),
            Step::Page(BLOCK_PAGE.to_string()),
            Step::Page(BLOCK_PAGE.to_string()),
        ],
    );
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&["https://guarded.test/"])))
        .unwrap();

    // An earlier attempt already saw the challenge page
    {
        let mut guard = lock_store(&store).unwrap();
        let url = guard.list_pending_urls(job_id).unwrap().remove(0);
        guard
            .update_url(
                url.id,
                &UrlUpdate {
                    content_hash: Some(fingerprint(BLOCK_PAGE)),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );

    let calls = renderer.calls();
    assert_eq!(calls.len(), 4);

    let proxies = engine.proxy_pool().list().unwrap();
    let blocked: Vec<_> = proxies.iter().filter(|p| p.is_blocked).collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].server_url(), calls[2].proxy);
    assert!(blocked[0].blocked_at.is_some());

    let job = lock_store(&store).unwrap().get_job(job_id).unwrap();
    assert_eq!(job.rate_limit_hits, 1);
    assert!((job.current_rate - 0.5).abs() < 1e-9);

    let report = engine.status(job_id).unwrap();
    assert_eq!(report.blocked_proxies_count, 1);
    assert_eq!(report.failed_requests, 3);
    assert_eq!(report.successful_requests, 1);

    let url = url_by_address(&store, job_id, "https://guarded.test/");
    assert_eq!(url.retry_status, RetryStatus::Success);
    assert_eq!(url.retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_proxy_for_country_cools_off() {
    let store = test_store();
    seed_proxies(&store, &["US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let engine = test_engine(renderer.clone(), &store);

    let mut submission = JobSubmission::new(urls(&["https://paris.test/"]));
    submission.proxy_countries = vec!["fr".to_string()];
    let job_id = engine.submit_job(submission).unwrap();
    let handle = engine.start(job_id).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = engine.status(job_id).unwrap();
    assert_eq!(report.status, "cooloff");
    assert!(report.cooloff_remaining_seconds > 280);
    assert!(report.cooloff_remaining_seconds <= 300);
    assert!(renderer.calls().is_empty());

    // The URL is untouched by the exhausted attempt
    let url = url_by_address(&store, job_id, "https://paris.test/");
    assert_eq!(url.retry_status, RetryStatus::Pending);
    assert_eq!(url.retry_count, 0);

    add_proxy(&store, "10.9.9.9", "FR");
    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);

    let calls = renderer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].proxy, "http://10.9.9.9:8080");

    let job = lock_store(&store).unwrap().get_job(job_id).unwrap();
    assert!(job.cooloff_until.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_kill_during_cooloff_stops_job() {
    let store = test_store();
    seed_proxies(&store, &["US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let engine = test_engine(renderer.clone(), &store);

    let mut submission = JobSubmission::new(urls(&["https://lyon.test/"]));
    submission.proxy_countries = vec!["FR".to_string()];
    let job_id = engine.submit_job(submission).unwrap();
    let handle = engine.start(job_id).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.status(job_id).unwrap().status, "cooloff");
    engine.kill(job_id).unwrap();

    // Noticed at the next poll, long before the cooloff would end
    let killed_at = tokio::time::Instant::now();
    assert_eq!(handle.wait().await.unwrap(), JobStatus::Killed);
    assert!(killed_at.elapsed() <= Duration::from_secs(1));

    assert!(renderer.calls().is_empty());
    let url = url_by_address(&store, job_id, "https://lyon.test/");
    assert_eq!(url.retry_status, RetryStatus::Pending);
    assert_eq!(engine.status(job_id).unwrap().status, "killed");
}

#[tokio::test(start_paused = true)]
async fn test_kill_lets_in_flight_fetch_finish() {
    let store = test_store();
    seed_proxies(&store, &["US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    renderer.script(
        "https://long.test/1",
        vec![Step::Slow(Duration::from_secs(5), "<p>one</p>".to_string())],
    );
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&[
            "https://long.test/1",
            "https://long.test/2",
            "https://long.test/3",
        ])))
        .unwrap();
    let handle = engine.start(job_id).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.kill(job_id).unwrap();

    assert_eq!(handle.wait().await.unwrap(), JobStatus::Killed);
    assert_eq!(engine.status(job_id).unwrap().status, "killed");

    assert_eq!(renderer.calls().len(), 1);
    let first = url_by_address(&store, job_id, "https://long.test/1");
    assert_eq!(first.retry_status, RetryStatus::Success);
    assert_eq!(first.content.as_deref(), Some("<p>one</p>"));
    for address in ["https://long.test/2", "https://long.test/3"] {
        let url = url_by_address(&store, job_id, address);
        assert_eq!(url.retry_status, RetryStatus::Pending);
        assert!(url.content.is_none());
    }

    // A killed job cannot be killed again, but it can be resumed
    assert!(engine.kill(job_id).is_err());
    assert_eq!(
        engine.resume(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );
    assert_eq!(renderer.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_kill_during_pacing_wait_starts_no_fetch() {
    let store = test_store();
    seed_proxies(&store, &["US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&[
            "https://paced.test/1",
            "https://paced.test/2",
            "https://paced.test/3",
        ])))
        .unwrap();
    let handle = engine.start(job_id).unwrap();

    // The second fetch is due at 1s; the kill lands while it waits for that slot
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(renderer.calls().len(), 1);
    engine.kill(job_id).unwrap();

    assert_eq!(handle.wait().await.unwrap(), JobStatus::Killed);
    assert_eq!(renderer.calls().len(), 1);
    for address in ["https://paced.test/2", "https://paced.test/3"] {
        let url = url_by_address(&store, job_id, address);
        assert_eq!(url.retry_status, RetryStatus::Pending);
    }
}

#[tokio::test(start_paused = true)]
async fn test_kill_during_pacing_wait_stops_every_worker() {
    let store = test_store();
    seed_proxies(&store, &["US", "US", "DE", "DE"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let engine = test_engine(renderer.clone(), &store);

    let addresses: Vec<String> = (1..=5).map(|i| format!("https://paced.test/{}", i)).collect();
    let mut submission = JobSubmission::new(addresses);
    submission.worker_count = 4;
    let job_id = engine.submit_job(submission).unwrap();
    let handle = engine.start(job_id).unwrap();

    // Start slots are spread one second apart across the workers
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(renderer.calls().len(), 1);
    engine.kill(job_id).unwrap();

    assert_eq!(handle.wait().await.unwrap(), JobStatus::Killed);
    assert_eq!(renderer.calls().len(), 1);

    let report = engine.status(job_id).unwrap();
    assert_eq!(report.status, "killed");
    assert_eq!(report.urls_processed, 1);

    // Claims released by the stopped workers are picked up after a resume
    assert_eq!(
        engine.resume(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );
    assert_eq!(renderer.calls().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_connection_reset_keeps_rate() {
    let store = test_store();
    seed_proxies(&store, &["US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    renderer.script(
        "https://flaky.test/",
        vec![
            Step::Fail("net::ERR_CONNECTION_RESET".to_string()),
            Step::Page("<p>up again</p>".to_string()),
        ],
    );
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&["https://flaky.test/"])))
        .unwrap();
    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );

    assert_eq!(renderer.calls().len(), 2);
    let job = lock_store(&store).unwrap().get_job(job_id).unwrap();
    assert!((job.current_rate - 1.0).abs() < 1e-9);
    assert_eq!(job.rate_limit_hits, 0);

    assert_eq!(engine.status(job_id).unwrap().failed_requests, 1);
    let url = url_by_address(&store, job_id, "https://flaky.test/");
    assert_eq!(url.retry_status, RetryStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_fails_url_and_job() {
    let store = test_store();
    seed_proxies(&store, &["US", "US", "US", "US", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    renderer.script(
        "https://down.test/",
        (0..5)
            .map(|_| Step::Fail("net::ERR_CONNECTION_RESET".to_string()))
            .collect(),
    );
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&["https://down.test/"])))
        .unwrap();
    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Failed
    );

    let url = url_by_address(&store, job_id, "https://down.test/");
    assert_eq!(url.retry_status, RetryStatus::Failed);
    assert_eq!(url.retry_count, 5);
    assert!(url.content.is_none());

    let job = lock_store(&store).unwrap().get_job(job_id).unwrap();
    assert_eq!(job.urls_processed, 0);
    assert_eq!(job.rate_limit_hits, 3);
    assert!((job.current_rate - 0.2).abs() < 1e-9);
    assert!(job.error_message.is_some());

    let blocked = engine
        .proxy_pool()
        .list()
        .unwrap()
        .into_iter()
        .filter(|p| p.is_blocked)
        .count();
    assert_eq!(blocked, 3);
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_processes_every_url() {
    let store = test_store();
    seed_proxies(&store, &["US", "DE", "US", "DE"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    renderer.script("https://many.test/4", vec![Step::Timeout]);
    let engine = test_engine(renderer.clone(), &store);

    let addresses: Vec<String> = (1..=8).map(|i| format!("https://many.test/{}", i)).collect();
    let mut submission = JobSubmission::new(addresses.clone());
    submission.worker_count = 3;
    submission.reshuffle_proxies = true;
    let job_id = engine.submit_job(submission).unwrap();

    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );

    let recorded = job_urls(&store, job_id);
    assert!(recorded
        .iter()
        .all(|u| u.retry_status == RetryStatus::Success));

    // Every URL fetched once, except the timed-out one which was retried once
    for address in &addresses {
        let expected = if address.ends_with("/4") { 2 } else { 1 };
        assert_eq!(renderer.calls_for(address).len(), expected, "{}", address);
    }
    let retried = renderer.calls_for("https://many.test/4");
    assert_eq!(retried[1].timeout, Duration::from_secs(120));

    let report = engine.status(job_id).unwrap();
    assert_eq!(report.urls_processed, 8);
    assert_eq!(report.worker_count, 3);
    assert!(!report.active_proxies.is_empty());
    assert!(report.active_proxies.len() <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_reset_allows_clean_rerun() {
    let store = test_store();
    seed_proxies(&store, &["US"]);
    let renderer = Arc::new(ScriptedRenderer::new());
    let engine = test_engine(renderer.clone(), &store);

    let job_id = engine
        .submit_job(JobSubmission::new(urls(&["https://again.test/"])))
        .unwrap();
    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );
    assert!(engine.start(job_id).is_err());

    engine.reset(job_id).unwrap();
    let report = engine.status(job_id).unwrap();
    assert_eq!(report.status, "pending");
    assert_eq!(report.urls_processed, 0);
    assert_eq!(report.successful_requests, 0);

    let url = url_by_address(&store, job_id, "https://again.test/");
    assert_eq!(url.retry_status, RetryStatus::Pending);
    assert!(url.content.is_none());
    assert!(url.content_hash.is_none());

    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );
    assert_eq!(renderer.calls().len(), 2);
}

#[tokio::test]
async fn test_debug_mode_saves_screenshots() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store();
    seed_proxies(&store, &["US"]);
    let renderer = Arc::new(ScriptedRenderer::with_screenshots());

    let mut config = test_config();
    config.renderer.screenshot_dir = dir.path().to_string_lossy().into_owned();
    let engine = RelayEngine::new(config, store.clone(), renderer);

    let mut submission = JobSubmission::new(urls(&["https://shot.test/"]));
    submission.debug_mode = true;
    let job_id = engine.submit_job(submission).unwrap();
    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );

    let url = url_by_address(&store, job_id, "https://shot.test/");
    let path = url.screenshot_path.expect("screenshot path recorded");
    assert!(path.contains(&format!("screenshot_{}_", url.id)));
    assert!(std::path::Path::new(&path).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_on_multi_thread_runtime() {
    let store = test_store();
    seed_proxies(&store, &["US", "DE", "US"]);
    let renderer = Arc::new(ScriptedRenderer::new());

    let mut config = test_config();
    config.engine.initial_rate = 5.0;
    let engine = RelayEngine::new(config, store.clone(), renderer.clone());

    let addresses: Vec<String> = (1..=6).map(|i| format!("https://threads.test/{}", i)).collect();
    let mut submission = JobSubmission::new(addresses.clone());
    submission.worker_count = 3;
    let job_id = engine.submit_job(submission).unwrap();

    assert_eq!(
        engine.start(job_id).unwrap().wait().await.unwrap(),
        JobStatus::Completed
    );
    for address in &addresses {
        assert_eq!(renderer.calls_for(address).len(), 1, "{}", address);
    }
    assert_eq!(engine.status(job_id).unwrap().urls_processed, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cooloff_waits_full_window() {
    let store = test_store();
    seed_proxies(&store, &["US"]);
    let renderer = Arc::new(ScriptedRenderer::new());

    let mut config = test_config();
    config.engine.initial_rate = 5.0;
    config.engine.cooloff_secs = 1;
    let engine = RelayEngine::new(config, store.clone(), renderer.clone());

    let mut submission = JobSubmission::new(urls(&[
        "https://nice.test/1",
        "https://nice.test/2",
        "https://nice.test/3",
    ]));
    submission.worker_count = 3;
    submission.proxy_countries = vec!["FR".to_string()];
    let job_id = engine.submit_job(submission).unwrap();

    let started = std::time::Instant::now();
    let handle = engine.start(job_id).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(renderer.calls().is_empty());
    add_proxy(&store, "10.9.9.9", "FR");

    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);
    // No worker may cut the cooloff short
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(renderer.calls().len(), 3);
}
