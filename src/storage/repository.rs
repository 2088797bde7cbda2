use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::Storage;
use crate::error::{SearchError, SearchResult};
use crate::tree::ThoughtTree;

/// Maps tree ids to trees, caching loaded trees in front of durable storage.
///
/// Mutations update the cache first and then persist, so a failed write
/// leaves the cache at most one operation ahead of the durable record.
pub struct TreeRepository {
    storage: Arc<dyn Storage>,
    cache: RwLock<HashMap<String, ThoughtTree>>,
}

impl TreeRepository {
    /// Create a repository over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a tree from the cache, loading it from storage on a miss.
    pub async fn get(&self, tree_id: &str) -> SearchResult<ThoughtTree> {
        if let Some(tree) = self.cache.read().await.get(tree_id) {
            return Ok(tree.clone());
        }

        let tree = self
            .storage
            .load_tree(tree_id)
            .await
            .map_err(|e| {
                error!(tree_id = %tree_id, error = %e, "Failed to load tree record");
                SearchError::Persistence(e)
            })?
            .ok_or_else(|| SearchError::TreeNotFound {
                tree_id: tree_id.to_string(),
            })?;

        debug!(tree_id = %tree_id, "Tree loaded into cache");
        self.cache
            .write()
            .await
            .insert(tree.id.clone(), tree.clone());
        Ok(tree)
    }

    /// Stamp, cache and persist a tree.
    pub async fn save(&self, tree: &mut ThoughtTree) -> SearchResult<()> {
        tree.updated_at = Utc::now();
        self.cache
            .write()
            .await
            .insert(tree.id.clone(), tree.clone());

        self.storage.save_tree(tree).await.map_err(|e| {
            error!(tree_id = %tree.id, error = %e, "Failed to persist tree");
            SearchError::Persistence(e)
        })
    }

    /// Remove a tree from the cache and from storage.
    pub async fn delete(&self, tree_id: &str) -> SearchResult<()> {
        let cached = self.cache.write().await.remove(tree_id);
        let removed = self.storage.delete_tree(tree_id).await?;

        if cached.is_none() && !removed {
            return Err(SearchError::TreeNotFound {
                tree_id: tree_id.to_string(),
            });
        }
        Ok(())
    }

    /// Every stored tree; unreadable records are logged and skipped.
    ///
    /// Cached trees are served from the cache, the rest are read from
    /// storage without being cached.
    pub async fn list(&self) -> SearchResult<Vec<ThoughtTree>> {
        let ids = self.storage.list_tree_ids().await?;

        let mut trees = Vec::with_capacity(ids.len());
        for id in ids {
            let cached = self.cache.read().await.get(&id).cloned();
            if let Some(tree) = cached {
                trees.push(tree);
                continue;
            }
            match self.storage.load_tree(&id).await {
                Ok(Some(tree)) => trees.push(tree),
                Ok(None) => debug!(tree_id = %id, "Tree record vanished while listing"),
                Err(e) => warn!(tree_id = %id, error = %e, "Skipping unreadable tree record"),
            }
        }
        Ok(trees)
    }

    /// Where the record for `tree_id` lives.
    pub fn location(&self, tree_id: &str) -> String {
        self.storage.location(tree_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MockStorage;
    use crate::tree::Strategy;

    fn sample_tree() -> ThoughtTree {
        ThoughtTree::new("p", vec!["risk".to_string()], Strategy::Greedy, 3, 0.3)
    }

    #[tokio::test]
    async fn test_get_loads_once_then_hits_cache() {
        let tree = sample_tree();
        let returned = tree.clone();

        let mut storage = MockStorage::new();
        storage
            .expect_load_tree()
            .times(1)
            .returning(move |_| Ok(Some(returned.clone())));

        let repo = TreeRepository::new(Arc::new(storage));
        assert_eq!(repo.get(&tree.id).await.unwrap().id, tree.id);
        assert_eq!(repo.get(&tree.id).await.unwrap().id, tree.id);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let mut storage = MockStorage::new();
        storage.expect_load_tree().returning(|_| Ok(None));

        let repo = TreeRepository::new(Arc::new(storage));
        let err = repo.get("ghost").await.unwrap_err();
        assert!(matches!(err, SearchError::TreeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_save_failure_surfaces_and_cache_keeps_mutation() {
        let mut storage = MockStorage::new();
        storage.expect_save_tree().returning(|_| {
            Err(StorageError::Io {
                path: "/readonly/t.json".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        });

        let repo = TreeRepository::new(Arc::new(storage));
        let mut tree = sample_tree();
        tree.best_score_seen = 4.0;

        let err = repo.save(&mut tree).await.unwrap_err();
        assert!(matches!(err, SearchError::Persistence(_)));

        let cached = repo.get(&tree.id).await.unwrap();
        assert_eq!(cached.best_score_seen, 4.0);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let mut storage = MockStorage::new();
        storage.expect_delete_tree().returning(|_| Ok(false));

        let repo = TreeRepository::new(Arc::new(storage));
        assert!(repo.delete("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_records() {
        let good = sample_tree();
        let good_id = good.id.clone();

        let mut storage = MockStorage::new();
        let ids = vec![good_id.clone(), "broken".to_string()];
        storage
            .expect_list_tree_ids()
            .returning(move || Ok(ids.clone()));
        storage.expect_load_tree().returning(move |id| {
            if id == good.id {
                Ok(Some(good.clone()))
            } else {
                Err(StorageError::Corrupt {
                    key: id.to_string(),
                    reason: "truncated".to_string(),
                })
            }
        });

        let repo = TreeRepository::new(Arc::new(storage));
        let trees = repo.list().await.unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].id, good_id);
    }

    #[tokio::test]
    async fn test_list_does_not_fill_cache() {
        let tree = sample_tree();
        let tree_id = tree.id.clone();

        let mut storage = MockStorage::new();
        let ids = vec![tree_id.clone()];
        storage
            .expect_list_tree_ids()
            .returning(move || Ok(ids.clone()));
        storage
            .expect_load_tree()
            .times(2)
            .returning(move |_| Ok(Some(tree.clone())));

        let repo = TreeRepository::new(Arc::new(storage));
        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert!(repo.cache.read().await.is_empty());

        // A real lookup still goes to storage and caches.
        repo.get(&tree_id).await.unwrap();
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
