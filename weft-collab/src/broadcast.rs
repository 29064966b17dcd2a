//! Document registry: maps document ids to live actors.
//!
//! Actors are created on first join and survive until explicitly removed or
//! the process exits; losing the last subscriber does not reap a document.
//! A crashed actor is replaced with a fresh seed-state actor on the next
//! lookup, so joins after a crash see the restart rather than an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::document::{DocumentActor, DocumentHandle};

/// Registry statistics. Counters are atomics so lookups never take a write
/// lock just to count.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub documents_created: u64,
    pub documents_restarted: u64,
}

struct AtomicRegistryStats {
    documents_created: AtomicU64,
    documents_restarted: AtomicU64,
}

pub struct DocumentRegistry {
    documents: RwLock<HashMap<String, DocumentHandle>>,
    commit_capacity: usize,
    stats: Arc<AtomicRegistryStats>,
}

impl DocumentRegistry {
    /// `commit_capacity` bounds how many commits a slow subscriber may lag
    /// behind before it starts missing broadcasts.
    pub fn new(commit_capacity: usize) -> Self {
        DocumentRegistry {
            documents: RwLock::new(HashMap::new()),
            commit_capacity,
            stats: Arc::new(AtomicRegistryStats {
                documents_created: AtomicU64::new(0),
                documents_restarted: AtomicU64::new(0),
            }),
        }
    }

    /// Get the live actor for `id`, spawning one at the seed state if none
    /// exists (or the previous one died).
    pub async fn get_or_create(&self, id: &str) -> DocumentHandle {
        // Fast path: read lock.
        {
            let documents = self.documents.read().await;
            if let Some(handle) = documents.get(id) {
                if handle.is_alive() {
                    return handle.clone();
                }
            }
        }

        // Slow path: write lock, re-check after acquiring.
        let mut documents = self.documents.write().await;
        if let Some(handle) = documents.get(id) {
            if handle.is_alive() {
                return handle.clone();
            }
            self.stats
                .documents_restarted
                .fetch_add(1, Ordering::Relaxed);
            log::warn!("document actor {id} died; restarting from seed");
        } else {
            self.stats.documents_created.fetch_add(1, Ordering::Relaxed);
        }
        let handle = DocumentActor::spawn(id.to_owned(), self.commit_capacity);
        documents.insert(id.to_owned(), handle.clone());
        handle
    }

    /// Explicitly close a document, dropping the registry's handle. The
    /// actor stops once outstanding handles are gone; its history is lost.
    pub async fn remove(&self, id: &str) -> bool {
        self.documents.write().await.remove(id).is_some()
    }

    /// Remove `id` only if nobody is subscribed to its commits.
    pub async fn remove_if_idle(&self, id: &str) -> bool {
        let mut documents = self.documents.write().await;
        if let Some(handle) = documents.get(id) {
            if handle.subscriber_count() == 0 {
                documents.remove(id);
                return true;
            }
        }
        false
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn document_ids(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            documents_created: self.stats.documents_created.load(Ordering::Relaxed),
            documents_restarted: self.stats.documents_restarted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use weft_delta::Delta;

    #[tokio::test]
    async fn test_get_or_create_returns_same_actor() {
        let registry = DocumentRegistry::new(16);
        let first = registry.get_or_create("doc").await;
        first
            .update(0, Delta::new().insert("x"), Uuid::new_v4())
            .await
            .unwrap();

        let second = registry.get_or_create("doc").await;
        let (version, _) = second.get_contents().await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(registry.document_count().await, 1);
        assert_eq!(registry.stats().documents_created, 1);
    }

    #[tokio::test]
    async fn test_documents_are_independent() {
        let registry = DocumentRegistry::new(16);
        let a = registry.get_or_create("a").await;
        let _b = registry.get_or_create("b").await;

        a.update(0, Delta::new().insert("x"), Uuid::new_v4())
            .await
            .unwrap();

        let (version_b, _) = registry.get_or_create("b").await.get_contents().await.unwrap();
        assert_eq!(version_b, 0);
        assert_eq!(registry.document_count().await, 2);

        let mut ids = registry.document_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_if_idle_respects_subscribers() {
        let registry = DocumentRegistry::new(16);
        let handle = registry.get_or_create("doc").await;
        let _commits = handle.subscribe();

        assert!(!registry.remove_if_idle("doc").await);
        drop(_commits);
        assert!(registry.remove_if_idle("doc").await);
        assert_eq!(registry.document_count().await, 0);
    }

    #[tokio::test]
    async fn test_removed_document_restarts_at_seed() {
        let registry = DocumentRegistry::new(16);
        let handle = registry.get_or_create("doc").await;
        handle
            .update(0, Delta::new().insert("x"), Uuid::new_v4())
            .await
            .unwrap();

        registry.remove("doc").await;
        drop(handle);

        let reborn = registry.get_or_create("doc").await;
        let (version, _) = reborn.get_contents().await.unwrap();
        assert_eq!(version, 0);
    }
}
