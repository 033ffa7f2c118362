//! Resource retrieval engine
//!
//! Documents are split into page-like chunks, embedded once, and queried by
//! cosine distance. Context assembly is relevance-in, page-order-out: the
//! distance ranking decides which pages make the token budget, but the
//! final prompt presents survivors in original page order for readability.

use async_trait::async_trait;

use crate::error::{PolychatError, Result};
use crate::providers::{ProviderClient, ProviderKind};
use crate::store::{ChatStore, PageRecord};
use crate::tokens::estimate_tokens;

/// Embedding seam, so retrieval can be exercised without a live provider
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// [`Embedder`] backed by a provider adapter
pub struct ProviderEmbedder {
    pub client: ProviderClient,
    pub kind: ProviderKind,
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client.embed(self.kind, texts).await
    }
}

/// A page with its distance to the query
#[derive(Debug, Clone)]
pub struct RankedPage {
    pub page: PageRecord,
    /// Cosine distance; smaller is more similar
    pub distance: f32,
}

/// Cosine similarity of two vectors; 0 when lengths differ or a norm is 0
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Cosine distance: 0 identical, 2 opposite
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Split text into chunks of at least `min_tokens` tokens
///
/// A greedy accumulator that respects sentence boundaries: sentences are
/// appended to the current chunk until it reaches the threshold, then a new
/// chunk starts.
#[must_use]
pub fn split_pages(text: &str, min_tokens: u32) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        current.push_str(sentence);
        if estimate_tokens(&current) >= min_tokens {
            chunks.push(std::mem::take(&mut current));
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split on sentence-final punctuation (ASCII and CJK), keeping delimiters
fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut out = Vec::new();
    let mut start = 0;

    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '。' | '！' | '？' | '\n') {
            let end = i + ch.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out.into_iter()
}

/// Embed a resource's text into page rows
///
/// Idempotent: if pages already exist they are returned as-is unless
/// `reset` is set, which deletes prior pages before re-embedding.
pub async fn embed_resource(
    store: &dyn ChatStore,
    embedder: &dyn Embedder,
    resource_id: i64,
    text: &str,
    min_tokens: u32,
    reset: bool,
) -> Result<Vec<PageRecord>> {
    let existing = store.find_resource_pages(resource_id).await?;
    if !existing.is_empty() {
        if !reset {
            return Ok(existing);
        }
        store.delete_resource_pages(resource_id).await?;
    }

    let chunks = split_pages(text, min_tokens);
    if chunks.is_empty() {
        return Err(PolychatError::Parameter(format!(
            "resource {resource_id} has no text to embed"
        )));
    }

    tracing::info!(resource_id, pages = chunks.len(), "embedding resource");
    let vectors = embedder.embed(&chunks).await?;
    if vectors.len() != chunks.len() {
        return Err(PolychatError::Protocol(format!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }

    let pages: Vec<PageRecord> = chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (content, embedding))| PageRecord {
            resource_id,
            page_number: u32::try_from(i).unwrap_or(u32::MAX) + 1,
            token_count: estimate_tokens(&content),
            content,
            embedding,
        })
        .collect();

    store.bulk_create_pages(resource_id, &pages).await?;
    Ok(pages)
}

/// Rank a resource's pages against a query by ascending cosine distance
pub async fn query_resource(
    store: &dyn ChatStore,
    embedder: &dyn Embedder,
    query: &str,
    resource_id: i64,
    limit: usize,
    max_distance: Option<f32>,
) -> Result<Vec<RankedPage>> {
    let pages = store.find_resource_pages(resource_id).await?;
    if pages.is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embedder
        .embed(std::slice::from_ref(&query.to_string()))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PolychatError::Protocol("embedder returned no query vector".into()))?;

    let mut ranked: Vec<RankedPage> = pages
        .into_iter()
        .map(|page| RankedPage {
            distance: cosine_distance(&query_vec, &page.embedding),
            page,
        })
        .filter(|r| max_distance.is_none_or(|max| r.distance <= max))
        .collect();

    // Stable sort: equal distances keep store order
    ranked.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    Ok(ranked)
}

/// Fit ranked pages into a token budget, then restore page order
///
/// Least-similar pages are dropped from the tail of the distance-sorted
/// list until the total fits; the survivors are then re-sorted by page
/// number. Inclusion is decided by relevance, presentation by position.
#[must_use]
pub fn budget_pages(mut ranked: Vec<RankedPage>, token_budget: u32) -> Vec<PageRecord> {
    let mut total: u32 = ranked.iter().map(|r| r.page.token_count).sum();
    while ranked.len() > 1 && total > token_budget {
        if let Some(dropped) = ranked.pop() {
            total -= dropped.page.token_count;
        }
    }

    let mut pages: Vec<PageRecord> = ranked.into_iter().map(|r| r.page).collect();
    pages.sort_by_key(|p| p.page_number);
    pages
}

/// Concatenate budgeted pages into one context block
#[must_use]
pub fn build_context(pages: &[PageRecord]) -> String {
    pages
        .iter()
        .map(|p| p.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}
