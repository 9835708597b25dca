//! Two-key deduplication of streamed articles
//!
//! Upstream batches may reassign identifiers between retries while the
//! origin URL stays stable, and mirrored content carries the same URL under
//! different identifiers. Deduplicating on either key alone under-catches
//! duplicates, so admission requires BOTH keys to be unseen.

use crate::types::{Article, ArticleId};
use std::collections::HashSet;

/// Session-scoped identity filter over incoming article batches
///
/// Maintains two independent key sets: one over the natural identifier and
/// one over the content key (origin URL). A record is admitted only if both
/// keys are absent; admission inserts both. The sets are discarded on
/// [`reset`](Deduplicator::reset), which every new session (including each
/// retry attempt) performs before processing its first message.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen_ids: HashSet<ArticleId>,
    seen_urls: HashSet<String>,
}

impl Deduplicator {
    /// Create an empty deduplicator
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter a batch down to articles not previously admitted this session
    ///
    /// Returns only the novel subset, in batch order. Duplicates within the
    /// batch itself are also collapsed: the first occurrence wins.
    pub fn admit(&mut self, batch: Vec<Article>) -> Vec<Article> {
        let mut novel = Vec::with_capacity(batch.len());
        for article in batch {
            if self.seen_ids.contains(&article.id) || self.seen_urls.contains(&article.url) {
                tracing::debug!(
                    article_id = %article.id,
                    url = %article.url,
                    "duplicate article filtered"
                );
                continue;
            }
            self.seen_ids.insert(article.id.clone());
            self.seen_urls.insert(article.url.clone());
            novel.push(article);
        }
        novel
    }

    /// Number of articles admitted this session
    pub fn admitted_count(&self) -> usize {
        self.seen_ids.len()
    }

    /// Discard both key sets
    pub fn reset(&mut self) {
        self.seen_ids.clear();
        self.seen_urls.clear();
    }
}
