//! Batched duplicate suppression against the store.

use crate::error::StoreError;
use crate::models::CandidateLink;
use crate::storage::ArticleStore;
use tracing::debug;

/// Links from `links` whose URL is not stored yet, in their original order,
/// plus how many were dropped. Costs one store query, or none for an empty list.
pub fn filter_new<S: ArticleStore>(
    store: &S,
    links: Vec<CandidateLink>,
) -> Result<(Vec<CandidateLink>, usize), StoreError> {
    if links.is_empty() {
        return Ok((links, 0));
    }
    let urls = links.iter().map(|l| l.url.clone()).collect::<Vec<_>>();
    let existing = store.existing_urls(&urls)?;
    let total = links.len();
    let fresh = links
        .into_iter()
        .filter(|l| !existing.contains(&l.url))
        .collect::<Vec<_>>();
    let skipped = total - fresh.len();
    debug!(total, fresh = fresh.len(), skipped, "filtered stored links");
    Ok((fresh, skipped))
}
