use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::context::RequestContext;
use crate::domain::PostId;
use crate::error::{FeedError, FeedResult};
use crate::metrics::POST_ID_COLLISIONS_TOTAL;
use crate::store::PostStore;

/// Source of post id candidates.
pub trait CandidateSource: Send + Sync {
    fn candidate(&self, operation_id: &str) -> PostId;
}

/// Short numeric ids: the first 8 hex chars of
/// `sha256(operation_id ,;, unix_nanos ,;, random)` rendered in decimal.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashCandidates;

impl HashCandidates {
    pub fn derive(operation_id: &str, nanos: i64, salt: u64) -> PostId {
        let seed = [operation_id.to_string(), nanos.to_string(), salt.to_string()].join(",;,");
        let digest = Sha256::digest(seed.as_bytes());
        // first 8 hex chars == first 4 bytes, big-endian
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        prefix.to_string()
    }
}

impl CandidateSource for HashCandidates {
    fn candidate(&self, operation_id: &str) -> PostId {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let salt: u64 = rand::thread_rng().gen();
        Self::derive(operation_id, nanos, salt)
    }
}

#[derive(Clone)]
pub struct PostIdGenerator {
    source: Arc<dyn CandidateSource>,
    attempts: u32,
}

impl PostIdGenerator {
    pub fn new(source: Arc<dyn CandidateSource>, attempts: u32) -> Self {
        Self { source, attempts }
    }

    /// Validate a caller-supplied id, or draw candidates until an unused one
    /// turns up. The unique index on `post_id` still guards the insert.
    pub async fn assign(
        &self,
        ctx: &RequestContext,
        store: &PostStore,
        requested: Option<&str>,
    ) -> FeedResult<PostId> {
        if let Some(post_id) = requested.filter(|id| !id.is_empty()) {
            if store.exists(ctx, post_id).await? {
                return Err(FeedError::Conflict(format!("post id {} exists", post_id)));
            }
            return Ok(post_id.to_string());
        }
        self.generate(ctx, store).await
    }

    pub async fn generate(&self, ctx: &RequestContext, store: &PostStore) -> FeedResult<PostId> {
        for attempt in 1..=self.attempts {
            let candidate = self.source.candidate(ctx.operation_id());
            if !store.exists(ctx, &candidate).await? {
                return Ok(candidate);
            }
            POST_ID_COLLISIONS_TOTAL.inc();
            warn!(
                post_id = %candidate,
                attempt,
                operation_id = %ctx.operation_id(),
                "post id candidate already taken"
            );
        }
        Err(FeedError::IdExhausted(self.attempts))
    }
}
