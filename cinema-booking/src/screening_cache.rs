use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use cinema_core::error::StoreResult;
use cinema_core::models::Screening;
use cinema_core::repository::ScreeningRepository;
use cinema_core::store::CacheStore;
use cinema_store::keys;

/// Cache-aside reads of screening metadata.
#[derive(Clone)]
pub struct ScreeningCache {
    cache: Arc<dyn CacheStore>,
    repo: Arc<dyn ScreeningRepository>,
    ttl: Duration,
}

impl ScreeningCache {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        repo: Arc<dyn ScreeningRepository>,
        ttl: Duration,
    ) -> Self {
        Self { cache, repo, ttl }
    }

    /// The repository behind the cache, for queries the cache does not serve.
    pub fn repository(&self) -> &dyn ScreeningRepository {
        self.repo.as_ref()
    }

    /// Cache failures fall through to the repository; only repository
    /// failures are returned.
    pub async fn get(&self, screening_id: i64) -> StoreResult<Option<Screening>> {
        let key = keys::screening(screening_id);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Screening>(&raw) {
                Ok(screening) => return Ok(Some(screening)),
                Err(e) => {
                    warn!(screening_id, error = %e, "Discarding undecodable cached screening")
                }
            },
            Ok(None) => {}
            Err(e) => warn!(screening_id, error = %e, "Screening cache read failed"),
        }

        let screening = self.repo.find_by_id(screening_id).await?;

        if let Some(screening) = &screening {
            match serde_json::to_string(screening) {
                Ok(raw) => {
                    if let Err(e) = self.cache.set_ex(&key, &raw, self.ttl).await {
                        warn!(screening_id, error = %e, "Failed to populate screening cache");
                    }
                }
                Err(e) => warn!(screening_id, error = %e, "Failed to encode screening"),
            }
        }

        Ok(screening)
    }

    pub async fn invalidate(&self, screening_id: i64) -> StoreResult<()> {
        self.cache.delete(&keys::screening(screening_id)).await
    }
}
