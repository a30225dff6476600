//! Stage pool scenarios: cold start, on-demand creation, rollback, release,
//! capacity enforcement, and coherence under concurrent allocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use substream_core::config::PoolConfig;
use substream_core::models::{ChildId, StreamId, UserId};
use substream_core::service::{CredentialIssuer, StagePool};
use substream_core::upstream::{InMemoryStageControl, StageControl};
use substream_core::Error;

fn build_pool(config: PoolConfig) -> (Arc<StagePool>, InMemoryStageControl) {
    let upstream = InMemoryStageControl::new();
    let shared: Arc<dyn StageControl> = Arc::new(upstream.clone());
    let issuer = Arc::new(CredentialIssuer::new(
        Arc::clone(&shared),
        "us-east-1".to_string(),
        "https://global.whip.live-video.net".to_string(),
    ));
    (StagePool::new(config, shared, issuer), upstream)
}

fn small_pool_config(target: usize, max: usize) -> PoolConfig {
    PoolConfig {
        target_pool_size: target,
        max_pool_size: max,
        ..PoolConfig::default()
    }
}

/// Cold start: the background loop pre-warms the pool with paced creates,
/// and the first allocation binds a warmed stage.
#[tokio::test(start_paused = true)]
async fn cold_start_prewarms_and_allocates() {
    let (pool, upstream) = build_pool(small_pool_config(2, 2));

    pool.initialize().await.unwrap();
    // First replenish tick fires immediately; the second create waits out
    // the 250 ms spacing.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let status = pool.status();
    assert_eq!(status.total, 2);
    assert_eq!(status.available, 2);
    assert_eq!(upstream.created_count(), 2);

    let allocation = pool
        .allocate(
            StreamId::from("S1"),
            &UserId::from("U1"),
            &ChildId::from("C1"),
        )
        .await
        .unwrap();

    assert_eq!(allocation.whip_url, "https://global.whip.live-video.net");
    assert_eq!(allocation.region, "us-east-1");
    assert!(!allocation.publish_token.is_empty());
    assert!(!allocation.participant_id.is_empty());

    let entry = pool.find_by_stream_id(&StreamId::from("S1")).unwrap();
    assert!(entry.in_use);
    assert_eq!(entry.stream_id.as_ref().unwrap().as_str(), "S1");

    // Publisher tokens carry the 60-minute TTL
    let ttl = allocation.expires_at - chrono::Utc::now();
    assert!(ttl <= chrono::Duration::minutes(60));
    assert!(ttl > chrono::Duration::minutes(55));
}

/// Empty pool: allocation creates a stage on demand.
#[tokio::test]
async fn on_demand_create_when_pool_empty() {
    let (pool, upstream) = build_pool(small_pool_config(0, 200));
    pool.initialize().await.unwrap();

    pool.allocate(
        StreamId::from("S2"),
        &UserId::from("U1"),
        &ChildId::from("C1"),
    )
    .await
    .unwrap();

    assert_eq!(upstream.created_count(), 1);
    let status = pool.status();
    assert_eq!(status.available, 0);
    assert_eq!(status.in_use, 1);
    assert_eq!(status.total, 1);
}

/// Token mint failure rolls the entry back to idle without deleting the
/// stage; the next allocation reuses it.
#[tokio::test]
async fn token_mint_failure_rolls_back_allocation() {
    let (pool, upstream) = build_pool(small_pool_config(0, 200));
    let seeded_arn = upstream.seed_stage("kid-stream-seeded", None);
    pool.initialize().await.unwrap();
    assert_eq!(pool.status().available, 1);

    upstream.fail_next_tokens(1);
    let err = pool
        .allocate(
            StreamId::from("S5"),
            &UserId::from("U1"),
            &ChildId::from("C1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));

    // Entry is observable as idle again, stage not deleted
    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.total, 1);
    assert!(pool.find_by_stream_id(&StreamId::from("S5")).is_none());
    assert!(upstream.stage_exists(&seeded_arn));
    assert_eq!(upstream.deleted_count(), 0);

    // Subsequent allocation succeeds using the same stage
    let allocation = pool
        .allocate(
            StreamId::from("S5b"),
            &UserId::from("U1"),
            &ChildId::from("C1"),
        )
        .await
        .unwrap();
    assert_eq!(allocation.stage_arn, seeded_arn);
}

/// Release prefers deleting the stage; a failed delete keeps the entry as
/// idle for a later cleanup pass.
#[tokio::test]
async fn release_with_delete_failure_retains_idle_entry() {
    let (pool, upstream) = build_pool(small_pool_config(0, 200));
    pool.initialize().await.unwrap();

    let allocation = pool
        .allocate(
            StreamId::from("S6"),
            &UserId::from("U1"),
            &ChildId::from("C1"),
        )
        .await
        .unwrap();

    upstream.fail_next_deletes(1);
    pool.release(&allocation.stage_arn).await;

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.available, 1);
    assert!(pool.find_by_stream_id(&StreamId::from("S6")).is_none());
    assert!(upstream.stage_exists(&allocation.stage_arn));
}

/// Successful release removes the entry and deletes the stage upstream.
#[tokio::test]
async fn release_deletes_stage() {
    let (pool, upstream) = build_pool(small_pool_config(0, 200));
    pool.initialize().await.unwrap();

    let allocation = pool
        .allocate(
            StreamId::from("S7"),
            &UserId::from("U1"),
            &ChildId::from("C1"),
        )
        .await
        .unwrap();

    pool.release(&allocation.stage_arn).await;

    assert_eq!(pool.status().total, 0);
    assert!(!upstream.stage_exists(&allocation.stage_arn));
    assert_eq!(upstream.deleted_count(), 1);
}

/// The pool never owns more than `max_pool_size` stages, even under
/// concurrent on-demand pressure.
#[tokio::test]
async fn capacity_ceiling_holds_under_concurrent_allocation() {
    let (pool, upstream) = build_pool(small_pool_config(0, 3));
    pool.initialize().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.allocate(
                StreamId::from(format!("S-{i}").as_str()),
                &UserId::from("U1"),
                &ChildId::from("C1"),
            )
            .await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(Error::ResourceExhausted(_))))
        .count();
    assert_eq!(successes, 3);
    assert_eq!(successes + exhausted, 8);
    assert!(upstream.created_count() <= 3);
    assert_eq!(pool.status().total, 3);
}

/// Every in-use entry holds a distinct stream id, and idle entries hold
/// none (coherence of the allocation fields).
#[tokio::test]
async fn stream_id_bindings_stay_coherent_under_concurrency() {
    let (pool, _upstream) = build_pool(small_pool_config(0, 50));
    pool.initialize().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let stream_id = StreamId::from(format!("stream-{i}").as_str());
            let allocation = pool
                .allocate(stream_id.clone(), &UserId::from("U1"), &ChildId::from("C1"))
                .await
                .unwrap();
            // Release half of them concurrently
            if i % 2 == 0 {
                pool.release(&allocation.stage_arn).await;
            }
            (i, allocation.stage_arn)
        }));
    }
    let results: Vec<(usize, String)> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let mut seen_arns = std::collections::HashSet::new();
    for (i, arn) in &results {
        if i % 2 == 1 {
            // Still allocated: the binding must be observable and unique
            let entry = pool
                .find_by_stream_id(&StreamId::from(format!("stream-{i}").as_str()))
                .unwrap();
            assert!(entry.in_use);
            assert!(entry.allocated_at.is_some());
            assert_eq!(&entry.arn, arn);
            assert!(seen_arns.insert(entry.arn.clone()));
        }
    }

    let status = pool.status();
    assert_eq!(status.in_use, 10);
}

/// A create failure stops the replenish batch; the next tick retries.
#[tokio::test(start_paused = true)]
async fn replenish_backs_off_on_create_failure() {
    let (pool, upstream) = build_pool(PoolConfig {
        target_pool_size: 4,
        max_pool_size: 10,
        replenish_interval_secs: 30,
        ..PoolConfig::default()
    });
    upstream.fail_next_creates(1);

    pool.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    // First tick hit the injected failure and stopped its batch
    assert_eq!(upstream.created_count(), 0);

    // Next tick succeeds and fills up to the batch limit
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(upstream.created_count(), 4);
    assert_eq!(pool.status().available, 4);
}

/// Aged-out idle stages are deleted by the cleanup pass, bounded per tick.
#[tokio::test(start_paused = true)]
async fn cleanup_deletes_aged_idle_stages() {
    let (pool, upstream) = build_pool(PoolConfig {
        target_pool_size: 0,
        cleanup_batch_limit: 2,
        ..PoolConfig::default()
    });

    // Recoverable pool stages created two hours ago
    let old = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    for i in 0..3 {
        let mut tags = HashMap::new();
        tags.insert("pool".to_string(), "true".to_string());
        tags.insert("createdAt".to_string(), old.clone());
        upstream
            .create_stage(&format!("kid-stream-old-{i}"), tags)
            .await
            .unwrap();
    }

    pool.initialize().await.unwrap();
    assert_eq!(pool.status().total, 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    // First pass deleted at most cleanup_batch_limit
    assert_eq!(pool.status().total, 1);
    assert_eq!(upstream.deleted_count(), 2);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(pool.status().total, 0);
    assert_eq!(upstream.deleted_count(), 3);
}

/// Shutdown stops the loop without touching in-use stages.
#[tokio::test(start_paused = true)]
async fn shutdown_stops_replenishment() {
    let (pool, upstream) = build_pool(small_pool_config(2, 10));
    pool.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pool.status().total, 2);

    let allocation = pool
        .allocate(
            StreamId::from("S8"),
            &UserId::from("U1"),
            &ChildId::from("C1"),
        )
        .await
        .unwrap();

    pool.shutdown();
    let created_before = upstream.created_count();
    tokio::time::sleep(Duration::from_secs(120)).await;

    // No further replenishment ticks ran
    assert_eq!(upstream.created_count(), created_before);
    // The in-use stage was not deleted
    assert!(upstream.stage_exists(&allocation.stage_arn));
}
