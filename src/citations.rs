//! Concurrent citation attachment for a whole checklist.

use futures::stream::{self, StreamExt};
use std::time::Duration;

use compliance_kb_core::citation::{CitationAttacher, CitationScope};
use compliance_kb_core::models::ChecklistItem;

/// Attach citations to every item, at most `concurrency` lookups at a time.
///
/// Output order matches input order. A lookup that exceeds `timeout` leaves
/// that item with no citations.
pub async fn attach_all(
    attacher: &CitationAttacher,
    scope: &CitationScope,
    items: Vec<ChecklistItem>,
    concurrency: usize,
    timeout: Duration,
) -> Vec<ChecklistItem> {
    if !attacher.is_enabled() {
        return items
            .into_iter()
            .map(|mut item| {
                item.citations.clear();
                item
            })
            .collect();
    }

    stream::iter(items)
        .map(|mut item| async move {
            let lookup = tokio::time::timeout(timeout, attacher.citations_for(scope, &item)).await;
            match lookup {
                Ok(citations) => item.citations = citations,
                Err(_) => {
                    tracing::warn!(item = %item.key, timeout_ms = timeout.as_millis() as u64, "citation lookup timed out");
                    item.citations.clear();
                }
            }
            item
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use compliance_kb_core::citation::CitationOptions;
    use compliance_kb_core::embedding::EmbeddingProvider;
    use compliance_kb_core::models::{CheckStatus, Chunk, Criticality, Source};
    use compliance_kb_core::search::Retriever;
    use compliance_kb_core::store::memory::InMemoryStore;
    use compliance_kb_core::store::VectorStore;
    use compliance_kb_core::KbError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed vector; sleeps for texts containing "slow".
    struct ScriptedProvider {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, KbError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = if text.contains("slow") { 10_000 } else { 20 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }
    }

    fn item(key: &str, title: &str) -> ChecklistItem {
        ChecklistItem::new(key, title, "", CheckStatus::Pass, Criticality::try_from(3).unwrap())
    }

    async fn attacher(provider: Arc<ScriptedProvider>) -> CitationAttacher {
        let store = Arc::new(InMemoryStore::new());
        let source = Source {
            id: "s1".into(),
            title: "Labor Law".into(),
            url: "https://example.gov/ll".into(),
            reg_code: "LL-2005".into(),
            published_at: None,
            pack_id: "labor".into(),
            version: "v1".into(),
        };
        let chunk = Chunk {
            text: "Wages are paid monthly.".into(),
            section: None,
            article: Some("12".into()),
            token_count: 6,
        };
        store.replace_source(&source, &[chunk], &[vec![1.0, 0.0]]).await.unwrap();
        CitationAttacher::new(Retriever::new(store, provider), CitationOptions::default())
    }

    fn provider() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_all_preserves_order_and_bounds_concurrency() {
        let p = provider();
        let attacher = attacher(p.clone()).await;
        let scope = CitationScope::new("labor", "v1");
        let items: Vec<ChecklistItem> = (0..8).map(|i| item(&format!("k{i}"), "wages")).collect();

        let out = attach_all(&attacher, &scope, items, 3, Duration::from_secs(5)).await;
        let keys: Vec<&str> = out.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"]);
        assert!(out.iter().all(|i| i.citations.len() == 1));
        assert!(p.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_item_gets_no_citations() {
        let attacher = attacher(provider()).await;
        let scope = CitationScope::new("labor", "v1");
        let items = vec![item("fast", "wages"), item("slow", "slow lookup")];

        let out = attach_all(&attacher, &scope, items, 2, Duration::from_secs(1)).await;
        assert_eq!(out[0].citations.len(), 1);
        assert!(out[1].citations.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_attacher_clears_citations() {
        let attacher = CitationAttacher::disabled(CitationOptions::default());
        let scope = CitationScope::new("labor", "v1");
        let out = attach_all(&attacher, &scope, vec![item("a", "wages")], 4, Duration::from_secs(1)).await;
        assert!(out[0].citations.is_empty());
    }
}
