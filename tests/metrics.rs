mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use tokio::sync::watch;

use pennant::application::banners::CreateBannerCommand;
use pennant::application::jobs::{DeleteWorkerConfig, DeleteWorkerContext, delete_with_retry};
use pennant::application::repos::RepoError;
use pennant::cache::{CacheConfig, KvCache, MemoryCache};
use pennant::infra::telemetry;

use common::{FlakyDeleter, Harness, json_content};

#[tokio::test]
async fn banner_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Cache miss, populate, then hit.
    let harness = Harness::with_cache();
    let id = harness
        .service
        .create_banner(CreateBannerCommand {
            tag_ids: vec![1],
            feature_id: 1,
            content: Some(json_content(1)),
            is_active: true,
        })
        .await
        .expect("create");
    harness.service.get_banner(1, 1, false, true).await.expect("miss");
    harness.wait_cached(1, 1).await;
    harness.service.get_banner(1, 1, false, true).await.expect("hit");

    // Capacity eviction.
    let tiny = MemoryCache::new(&CacheConfig {
        capacity: 1,
        ..Default::default()
    });
    tiny.push("a", "1".into(), Duration::from_secs(60))
        .await
        .expect("push");
    tiny.push("b", "2".into(), Duration::from_secs(60))
        .await
        .expect("push");

    // One retry, then a completed delete.
    let flaky = Arc::new(FlakyDeleter::new(
        harness.store.clone(),
        vec![RepoError::Timeout],
    ));
    let (_stop_tx, stop) = watch::channel(false);
    let ctx = DeleteWorkerContext {
        repo: flaky.clone(),
        config: DeleteWorkerConfig {
            retry_interval: Duration::from_millis(1),
            max_retries: 1,
            ..Default::default()
        },
        stop,
    };
    harness.service.delete_banner(id).await.expect("queue delete");
    let task = harness.next_task().await;
    delete_with_retry(&ctx, task).await;

    // An exhausted delete.
    let doomed = harness
        .service
        .create_banner(CreateBannerCommand {
            tag_ids: vec![2],
            feature_id: 1,
            content: Some(json_content(2)),
            is_active: true,
        })
        .await
        .expect("create");
    let failing = Arc::new(FlakyDeleter::failing_forever(harness.store.clone()));
    let failing_ctx = DeleteWorkerContext {
        repo: failing,
        ..ctx.clone()
    };
    harness.service.delete_banner(doomed).await.expect("queue delete");
    let task = harness.next_task().await;
    delete_with_retry(&failing_ctx, task).await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "pennant_cache_hit_total",
        "pennant_cache_miss_total",
        "pennant_cache_evict_total",
        "pennant_cache_populate_queue_len",
        "pennant_delete_completed_total",
        "pennant_delete_retry_total",
        "pennant_delete_failed_total",
        "pennant_delete_task_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
