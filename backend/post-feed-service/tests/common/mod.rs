#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use post_feed_service::domain::{Attribute, Post};
use post_feed_service::repository::{MemoryStore, PostRepository};
use post_feed_service::services::CandidateSource;
use post_feed_service::{FeedConfig, PostService, PostStore, RequestContext};

pub struct Harness {
    pub backend: Arc<MemoryStore>,
    pub service: PostService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FeedConfig::default())
    }

    pub fn with_config(config: FeedConfig) -> Self {
        let backend = Arc::new(MemoryStore::new());
        let store = PostStore::with_backend(backend.clone(), config);
        Self {
            backend,
            service: PostService::new(store),
        }
    }

    pub fn with_candidates(mut self, candidates: ScriptedCandidates) -> Self {
        self.service = self.service.with_candidate_source(Arc::new(candidates));
        self
    }

    /// Insert posts directly, bypassing publish validation.
    pub async fn seed(&self, posts: Vec<Post>) {
        self.backend
            .insert_many(&posts)
            .await
            .expect("seed posts");
    }

    pub async fn seed_user(&self, user_id: &str, account: &str) {
        self.backend.put_attribute(attribute(user_id, account)).await;
    }
}

pub fn ctx(user_id: &str) -> RequestContext {
    RequestContext::for_user(user_id)
}

pub fn post_at(post_id: &str, user_id: &str, millis: i64) -> Post {
    let mut post = Post::new(post_id, user_id);
    post.content = format!("post {}", post_id);
    post.create_time = Utc.timestamp_millis_opt(millis).single();
    post.update_time = post.create_time;
    post
}

pub fn attribute(user_id: &str, account: &str) -> Attribute {
    Attribute {
        user_id: user_id.to_string(),
        account: account.to_string(),
        nickname: format!("nick-{}", user_id),
        ..Attribute::default()
    }
}

/// Hands out scripted candidates in order, then unique fresh ones.
pub struct ScriptedCandidates {
    queue: Mutex<VecDeque<String>>,
    fresh: Mutex<u64>,
}

impl ScriptedCandidates {
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(candidates.into_iter().map(Into::into).collect()),
            fresh: Mutex::new(9_000_000_000),
        }
    }

    /// `n` copies of `taken` before falling back to fresh ids.
    pub fn colliding(taken: &str, n: usize) -> Self {
        Self::new(std::iter::repeat(taken.to_string()).take(n))
    }
}

impl CandidateSource for ScriptedCandidates {
    fn candidate(&self, _operation_id: &str) -> String {
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            return next;
        }
        let mut fresh = self.fresh.lock().unwrap();
        *fresh += 1;
        fresh.to_string()
    }
}
