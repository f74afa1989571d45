use chrono::Utc;
use relay_core::model::ResultStatus;
use relay_worker::outbound_cache::{CachedResult, OutboundCache};

fn entry(task_id: i64, cached_at: chrono::DateTime<Utc>) -> CachedResult {
    CachedResult {
        task_id,
        worker_id: "worker-1".to_string(),
        status: ResultStatus::Completed,
        result_body: serde_json::json!({"primes_count": 25}),
        computation_time_ms: Some(12),
        cached_at,
    }
}

#[tokio::test]
async fn put_and_list_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = OutboundCache::new(dir.path()).await?;

    cache.put(&entry(1, Utc::now())).await?;
    cache.put(&entry(2, Utc::now())).await?;

    let entries = cache.list_replayable(3600).await?;
    assert_eq!(entries.len(), 2);
    Ok(())
}

#[tokio::test]
async fn remove_drops_a_replayed_entry() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = OutboundCache::new(dir.path()).await?;

    cache.put(&entry(1, Utc::now())).await?;
    cache.remove(1).await?;

    let entries = cache.list_replayable(3600).await?;
    assert!(entries.is_empty());
    Ok(())
}

#[tokio::test]
async fn expired_entries_are_dropped_instead_of_replayed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = OutboundCache::new(dir.path()).await?;

    let stale = Utc::now() - chrono::Duration::seconds(7200);
    cache.put(&entry(1, stale)).await?;

    let entries = cache.list_replayable(60).await?;
    assert!(entries.is_empty(), "entries older than the TTL must not be replayed");
    Ok(())
}

#[tokio::test]
async fn removing_a_missing_entry_is_not_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = OutboundCache::new(dir.path()).await?;
    cache.remove(999).await?;
    Ok(())
}
