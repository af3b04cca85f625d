//! Store and delete-queue tests against the Postgres named by `DATABASE_URL`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;

use pennant::application::repos::{
    BannerListFilter, BannersRepo, BannersWriteRepo, CreateBannerParams, RepoError,
    UpdateBannerParams,
};
use pennant::application::jobs::{DeleteWorkerConfig, DeleteWorkers};
use pennant::domain::banners::{DeleteTask, HistoryPolicy};
use pennant::infra::db::{MAX_DELIVERIES, PostgresRepositories, PostgresTasks};
use pennant::queue::{TaskBackend, banner::BannerQueue};

fn params(tags: &[i64], feature_id: i64, content: serde_json::Value) -> CreateBannerParams {
    CreateBannerParams {
        tag_ids: tags.to_vec(),
        feature_id,
        content,
        is_active: true,
    }
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count")
}

#[sqlx::test(migrations = "./migrations")]
async fn create_and_get_round_trip(pool: PgPool) {
    let repo = PostgresRepositories::new(pool);
    let id = repo
        .create_banner(params(&[3, 1], 10, json!({"title": "hello"})))
        .await
        .expect("create");

    let banner = repo.get_banner(3, 10, true).await.expect("banner");
    assert_eq!(banner.id, id);
    assert_eq!(banner.content, json!({"title": "hello"}));
    assert_eq!(banner.tag_ids, vec![1, 3]);
    assert_eq!(banner.feature_id, 10);

    assert_eq!(repo.get_banner_by_id(id).await.expect("by id").id, id);
    assert!(matches!(
        repo.get_banner(2, 10, false).await,
        Err(RepoError::NotFound)
    ));
}

#[sqlx::test(migrations = "./migrations")]
async fn conflicting_create_rolls_back(pool: PgPool) {
    let repo = PostgresRepositories::new(pool.clone());
    repo.create_banner(params(&[1], 10, json!({})))
        .await
        .expect("first");

    let err = repo
        .create_banner(params(&[2, 1], 10, json!({})))
        .await
        .expect_err("duplicate");
    assert!(err.is_conflict());
    assert_eq!(count(&pool, "banners").await, 1);
    assert_eq!(count(&pool, "banner_mappings").await, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn activity_update_touches_every_mapping(pool: PgPool) {
    let repo = PostgresRepositories::new(pool);
    let id = repo
        .create_banner(params(&[1, 2, 3], 10, json!({"a": 1})))
        .await
        .expect("create");

    repo.update_banner(UpdateBannerParams {
        id,
        is_active: Some(false),
        ..Default::default()
    })
    .await
    .expect("update");

    for tag in [1, 2, 3] {
        assert!(matches!(
            repo.get_banner(tag, 10, true).await,
            Err(RepoError::NotFound)
        ));
        let banner = repo.get_banner(tag, 10, false).await.expect("banner");
        assert_eq!(banner.content, json!({"a": 1}));
        assert_eq!(banner.tag_ids, vec![1, 2, 3]);
    }
    assert!(repo.list_banner_versions(id).await.expect("versions").is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn tag_replacement_keeps_feature_and_activity(pool: PgPool) {
    let repo = PostgresRepositories::new(pool);
    let id = repo
        .create_banner(params(&[1, 2], 10, json!({})))
        .await
        .expect("create");

    repo.update_banner(UpdateBannerParams {
        id,
        tag_ids: vec![7, 8],
        ..Default::default()
    })
    .await
    .expect("update");

    let banner = repo.get_banner(7, 10, true).await.expect("banner");
    assert_eq!(banner.tag_ids, vec![7, 8]);
    assert!(banner.is_active);
    assert!(matches!(
        repo.get_banner(1, 10, false).await,
        Err(RepoError::NotFound)
    ));
}

#[sqlx::test(migrations = "./migrations")]
async fn conflicting_tag_replacement_keeps_old_state(pool: PgPool) {
    let repo = PostgresRepositories::new(pool.clone());
    let id = repo
        .create_banner(params(&[1, 2], 10, json!({"a": 1})))
        .await
        .expect("create");
    repo.create_banner(params(&[3], 10, json!({"b": 1})))
        .await
        .expect("neighbour");

    let err = repo
        .update_banner(UpdateBannerParams {
            id,
            tag_ids: vec![3, 4],
            content: Some(json!({"a": 2})),
            ..Default::default()
        })
        .await
        .expect_err("tag 3 is taken for feature 10");
    assert!(err.is_conflict());

    let banner = repo.get_banner_by_id(id).await.expect("banner");
    assert_eq!(banner.tag_ids, vec![1, 2]);
    assert_eq!(banner.content, json!({"a": 1}));
    assert_eq!(repo.get_banner(1, 10, true).await.expect("tag 1").id, id);
    assert!(matches!(
        repo.get_banner(4, 10, false).await,
        Err(RepoError::NotFound)
    ));
    assert_eq!(count(&pool, "banners_history").await, 0);
    assert_eq!(count(&pool, "banner_mappings").await, 3);
}

#[sqlx::test(migrations = "./migrations")]
async fn content_updates_and_restore(pool: PgPool) {
    let repo = PostgresRepositories::new(pool);
    let id = repo
        .create_banner(params(&[2001], 1001, json!({"a": 1})))
        .await
        .expect("create");
    let created = repo.get_banner_by_id(id).await.expect("banner");

    for value in [2, 3] {
        repo.update_banner(UpdateBannerParams {
            id,
            content: Some(json!({"a": value})),
            ..Default::default()
        })
        .await
        .expect("update");
    }

    let live = repo.get_banner_by_id(id).await.expect("banner");
    assert!(live.updated_at > created.updated_at);

    let versions = repo.list_banner_versions(id).await.expect("versions");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].content, json!({"a": 3}));
    assert_eq!(versions[1].content, json!({"a": 2}));

    repo.restore_version(id, versions[1].updated_at)
        .await
        .expect("restore");
    assert_eq!(
        repo.get_banner_by_id(id).await.expect("banner").content,
        json!({"a": 2})
    );
    assert!(matches!(
        repo.restore_version(id, versions[1].updated_at).await,
        Err(RepoError::NotFound)
    ));
}

#[sqlx::test(migrations = "./migrations")]
async fn record_previous_keeps_undo_points(pool: PgPool) {
    let repo = PostgresRepositories::new(pool).with_history_policy(HistoryPolicy::RecordPrevious);
    let id = repo
        .create_banner(params(&[1], 1, json!({"a": 1})))
        .await
        .expect("create");

    repo.update_banner(UpdateBannerParams {
        id,
        content: Some(json!({"a": 2})),
        ..Default::default()
    })
    .await
    .expect("update");

    let versions = repo.list_banner_versions(id).await.expect("versions");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].content, json!({"a": 1}));
}

#[sqlx::test(migrations = "./migrations")]
async fn switching_to_record_previous_reuses_the_recorded_snapshot(pool: PgPool) {
    let record_new = PostgresRepositories::new(pool.clone());
    let id = record_new
        .create_banner(params(&[1], 1, json!({"a": 1})))
        .await
        .expect("create");
    record_new
        .update_banner(UpdateBannerParams {
            id,
            content: Some(json!({"a": 2})),
            ..Default::default()
        })
        .await
        .expect("update under record_new");

    let record_previous =
        PostgresRepositories::new(pool).with_history_policy(HistoryPolicy::RecordPrevious);
    record_previous
        .update_banner(UpdateBannerParams {
            id,
            content: Some(json!({"a": 3})),
            ..Default::default()
        })
        .await
        .expect("update under record_previous");

    let versions = record_previous.list_banner_versions(id).await.expect("versions");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].content, json!({"a": 2}));
    assert_eq!(
        record_previous.get_banner_by_id(id).await.expect("banner").content,
        json!({"a": 3})
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn list_and_delete(pool: PgPool) {
    let repo = PostgresRepositories::new(pool.clone());
    let first = repo
        .create_banner(params(&[1], 1003, json!({})))
        .await
        .expect("first");
    let second = repo
        .create_banner(params(&[2], 1003, json!({})))
        .await
        .expect("second");
    repo.create_banner(params(&[1], 1004, json!({})))
        .await
        .expect("other feature");

    let listed = repo
        .list_banners(BannerListFilter {
            feature_id: Some(1003),
            ..Default::default()
        })
        .await
        .expect("list");
    let ids: Vec<_> = listed.iter().map(|banner| banner.id).collect();
    assert_eq!(ids, vec![first, second]);

    let by_tag = repo
        .list_banners(BannerListFilter {
            tag_id: Some(1),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .expect("list by tag");
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].id, first);

    repo.delete_banner(first).await.expect("delete");
    assert!(matches!(
        repo.get_banner_by_id(first).await,
        Err(RepoError::NotFound)
    ));
    assert!(matches!(
        repo.delete_banner(first).await,
        Err(RepoError::NotFound)
    ));
    assert_eq!(count(&pool, "banners").await, 2);
}

#[sqlx::test(migrations = false)]
async fn migrations_apply_job_schema_and_rerun_cleanly(pool: PgPool) {
    PostgresRepositories::run_migrations(&pool).await.expect("first run");
    PostgresRepositories::run_migrations(&pool).await.expect("second run");

    assert_eq!(count(&pool, "banners").await, 0);
    assert_eq!(count(&pool, "apalis.jobs").await, 0);
}

#[sqlx::test(migrations = false)]
async fn pushed_task_is_a_pending_apalis_job(pool: PgPool) {
    PostgresRepositories::run_migrations(&pool).await.expect("migrations");
    let tasks = PostgresTasks::new(pool.clone(), Duration::from_millis(20), Duration::from_secs(30));

    let job_id = tasks
        .push("banner_delete", DeleteTask { banner_id: 41 })
        .await
        .expect("push");

    let (job_type, status, banner_id, max_attempts): (String, String, String, i32) =
        sqlx::query_as(
            "SELECT job_type, status, job->>'banner_id', max_attempts FROM apalis.jobs WHERE id = $1",
        )
        .bind(&job_id)
        .fetch_one(&pool)
        .await
        .expect("job row");
    assert_eq!(job_type, "banner_delete");
    assert_eq!(status, "Pending");
    assert_eq!(banner_id, "41");
    assert_eq!(max_attempts, MAX_DELIVERIES);
}

#[sqlx::test(migrations = false)]
async fn workers_delete_banners_queued_in_postgres(pool: PgPool) {
    PostgresRepositories::run_migrations(&pool).await.expect("migrations");
    let repo = Arc::new(PostgresRepositories::new(pool.clone()));
    let id = repo
        .create_banner(params(&[1], 10, json!({})))
        .await
        .expect("create");

    let tasks = PostgresTasks::new(pool.clone(), Duration::from_millis(20), Duration::from_secs(30));
    let queue = BannerQueue::new(TaskBackend::Postgres(tasks), "banner_delete");
    let workers = DeleteWorkers::spawn(
        repo.clone(),
        DeleteWorkerConfig {
            retry_interval: Duration::from_millis(10),
            ..Default::default()
        },
        &queue,
    );

    queue.publish(DeleteTask { banner_id: id }).await.expect("publish");

    let mut deleted = false;
    for _ in 0..250 {
        if matches!(repo.get_banner_by_id(id).await, Err(RepoError::NotFound)) {
            deleted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(deleted, "banner {id} was never deleted");

    queue.close();
    tokio::time::timeout(Duration::from_secs(10), workers.shutdown())
        .await
        .expect("workers stop");
    assert_eq!(count(&pool, "banner_mappings").await, 0);
}
