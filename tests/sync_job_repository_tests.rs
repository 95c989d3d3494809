//! Job store behaviour that the engine relies on for serialization.

mod test_utils;

use chrono::{Duration, Utc};
use sync_engine::{
    models::{ConflictResolution, JobStatus, SyncType, sync_job::Model},
    repositories::{JobFilter, SyncJobRepository},
};
use test_utils::setup_test_db;
use uuid::Uuid;

fn job(name: &str, minutes_ago: i64) -> Model {
    let id = Uuid::new_v4();
    let start = (Utc::now() - Duration::minutes(minutes_ago)).fixed_offset();
    Model {
        id,
        integration_id: format!("int-{name}"),
        integration_name: name.to_string(),
        status: JobStatus::InProgress,
        sync_type: SyncType::Full,
        triggered_by: "scheduler".to_string(),
        start_time: start,
        end_time: None,
        records_processed: 0,
        records_total: 10,
        records_skipped: 0,
        error_count: 0,
        error_message: None,
        data_size: 0,
        throughput: 0.0,
        conflicts: 0,
        conflict_resolution: ConflictResolution::Auto,
        retry_of: None,
        lineage_root: id,
        retry_depth: 0,
        version: 0,
        created_at: start,
        updated_at: start,
    }
}

#[tokio::test]
async fn stale_version_write_is_refused() {
    let repo = SyncJobRepository::new(setup_test_db().await.unwrap());
    let stored = repo.insert(job("github", 1)).await.unwrap();

    let mut first = stored.clone();
    first.records_processed = 4;
    let saved = repo
        .update_if_version(first, stored.version)
        .await
        .unwrap()
        .expect("first writer wins");
    assert_eq!(saved.version, 1);
    assert_eq!(saved.records_processed, 4);
    assert_eq!(saved.created_at, stored.created_at);

    let mut stale = stored.clone();
    stale.records_processed = 9;
    assert!(
        repo.update_if_version(stale, stored.version)
            .await
            .unwrap()
            .is_none()
    );

    let current = repo.find(stored.id).await.unwrap().unwrap();
    assert_eq!(current, saved);
}

#[tokio::test]
async fn lineage_slot_can_only_be_claimed_once() {
    let repo = SyncJobRepository::new(setup_test_db().await.unwrap());
    let mut root = job("gitlab", 10);
    root.status = JobStatus::Failed;
    let root = repo.insert(root).await.unwrap();

    let retry = |depth: i32| {
        let mut next = job("gitlab", 0);
        next.status = JobStatus::Pending;
        next.retry_of = Some(root.id);
        next.lineage_root = root.id;
        next.retry_depth = depth;
        next
    };

    repo.insert(retry(1)).await.unwrap();
    assert!(repo.insert(retry(1)).await.is_err());
    repo.insert(retry(2)).await.unwrap();

    assert_eq!(repo.count_retries(root.id).await.unwrap(), 2);
    let chain = repo.lineage(root.id).await.unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].id, root.id);
}

#[tokio::test]
async fn scan_page_walks_in_id_order() {
    let repo = SyncJobRepository::new(setup_test_db().await.unwrap());
    for minutes in 0..5 {
        repo.insert(job("linear", minutes)).await.unwrap();
    }

    let first = repo.scan_page(None, None, 3).await.unwrap();
    assert_eq!(first.len(), 3);
    let rest = repo
        .scan_page(first.last().map(|j| j.id), None, 3)
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);

    let ids: Vec<_> = first.iter().chain(&rest).map(|j| j.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    assert!(
        repo.scan_page(None, Some(JobStatus::Success), 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn in_memory_filter_agrees_with_listing_query() {
    let repo = SyncJobRepository::new(setup_test_db().await.unwrap());
    let mut inserted = Vec::new();
    for (minutes, name, status, sync_type, trigger) in [
        (1, "GitHub", JobStatus::Success, SyncType::Full, "scheduler"),
        (2, "GitLab", JobStatus::Failed, SyncType::Incremental, "webhook"),
        (3, "Jira Cloud", JobStatus::InProgress, SyncType::Full, "alice@ops"),
        (4, "100% Uptime", JobStatus::Pending, SyncType::Incremental, "scheduler"),
        (5, "Notion", JobStatus::Cancelled, SyncType::Full, "GitHub action"),
    ] {
        let mut next = job(name, minutes);
        next.status = status;
        next.sync_type = sync_type;
        next.triggered_by = trigger.to_string();
        inserted.push(repo.insert(next).await.unwrap());
    }

    let filters = [
        JobFilter::default(),
        JobFilter {
            search: Some("  GIT ".to_string()),
            ..Default::default()
        },
        JobFilter {
            search: Some("%".to_string()),
            ..Default::default()
        },
        JobFilter {
            search: Some("sched".to_string()),
            sync_type: Some(SyncType::Incremental),
            ..Default::default()
        },
        JobFilter {
            status: Some(JobStatus::Failed),
            ..Default::default()
        },
        JobFilter {
            status: Some(JobStatus::Success),
            sync_type: Some(SyncType::Incremental),
            ..Default::default()
        },
    ];

    for filter in filters {
        let mut listed: Vec<_> = repo
            .list(&filter, None, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        let mut expected: Vec<_> = inserted
            .iter()
            .filter(|j| filter.matches(j))
            .map(|j| j.id)
            .collect();
        listed.sort();
        expected.sort();
        assert_eq!(listed, expected, "filter {filter:?}");
    }
}
