use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AttributeDirectory, PostFilter, PostRepository, RelationRepository, SortKey, SortOrder};
use crate::domain::{Attribute, Post, PostId, PostUpdate, RelationFlag, UserId, UserPostRelation};
use crate::error::{FeedError, FeedResult};

/// In-process document store implementing every repository trait.
///
/// Keeps a unique index on `post_id` and counts read queries so callers can
/// check that aggregation stays batched.
#[derive(Default)]
pub struct MemoryStore {
    posts: RwLock<HashMap<PostId, Post>>,
    relations: RwLock<HashMap<(UserId, PostId), UserPostRelation>>,
    attributes: RwLock<HashMap<UserId, Attribute>>,
    reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the attribute directory.
    pub async fn put_attribute(&self, attribute: Attribute) {
        self.attributes
            .write()
            .await
            .insert(attribute.user_id.clone(), attribute);
    }

    /// Number of read queries served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> FeedResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FeedError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> FeedResult<()> {
        self.ensure_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sorted(posts: impl Iterator<Item = Post>, order: SortOrder) -> Vec<(SortKey, Post)> {
        let mut keyed: Vec<(SortKey, Post)> =
            posts.map(|p| (SortKey::of(&p, order), p)).collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
        keyed
    }
}

#[async_trait]
impl PostRepository for MemoryStore {
    async fn insert_many(&self, posts: &[Post]) -> FeedResult<()> {
        self.ensure_available()?;
        let mut guard = self.posts.write().await;

        let mut seen = std::collections::HashSet::new();
        for post in posts {
            if guard.contains_key(&post.post_id) || !seen.insert(post.post_id.as_str()) {
                return Err(FeedError::Conflict(format!(
                    "post_id {} already exists",
                    post.post_id
                )));
            }
        }
        for post in posts {
            guard.insert(post.post_id.clone(), post.clone());
        }
        Ok(())
    }

    async fn insert_with_relations(
        &self,
        post: &Post,
        marks: &[(PostId, RelationFlag)],
    ) -> FeedResult<()> {
        self.ensure_available()?;
        // posts before relations, the only order both locks are ever taken in
        let mut posts = self.posts.write().await;
        let mut relations = self.relations.write().await;

        if posts.contains_key(&post.post_id) {
            return Err(FeedError::Conflict(format!(
                "post_id {} already exists",
                post.post_id
            )));
        }
        posts.insert(post.post_id.clone(), post.clone());
        for (target, flag) in marks {
            relations
                .entry((post.user_id.clone(), target.clone()))
                .or_insert_with(|| UserPostRelation::new(post.user_id.as_str(), target.as_str()))
                .set_flag(*flag, true);
        }
        Ok(())
    }

    async fn find_by_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<Post>> {
        self.read()?;
        let guard = self.posts.read().await;
        Ok(post_ids
            .iter()
            .filter_map(|id| guard.get(id).cloned())
            .collect())
    }

    async fn exists(&self, post_id: &str) -> FeedResult<bool> {
        self.read()?;
        Ok(self.posts.read().await.contains_key(post_id))
    }

    async fn update(
        &self,
        post_id: &str,
        update: &PostUpdate,
        now: DateTime<Utc>,
    ) -> FeedResult<bool> {
        self.ensure_available()?;
        let mut guard = self.posts.write().await;
        match guard.get_mut(post_id) {
            Some(post) => {
                update.apply(post, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, post_ids: &[PostId]) -> FeedResult<u64> {
        self.ensure_available()?;
        let mut guard = self.posts.write().await;
        Ok(post_ids
            .iter()
            .filter(|id| guard.remove(id.as_str()).is_some())
            .count() as u64)
    }

    async fn find_window(
        &self,
        filter: &PostFilter,
        order: SortOrder,
        after: Option<&SortKey>,
        limit: i64,
    ) -> FeedResult<Vec<Post>> {
        self.read()?;
        let guard = self.posts.read().await;
        let matching = guard.values().filter(|p| filter.matches(p)).cloned();
        Ok(Self::sorted(matching, order)
            .into_iter()
            .filter(|(key, _)| after.map(|a| key < a).unwrap_or(true))
            .take(limit.max(0) as usize)
            .map(|(_, post)| post)
            .collect())
    }

    async fn count(&self, filter: &PostFilter) -> FeedResult<i64> {
        self.read()?;
        let guard = self.posts.read().await;
        Ok(guard.values().filter(|p| filter.matches(p)).count() as i64)
    }

    async fn find_skip(
        &self,
        filter: &PostFilter,
        order: SortOrder,
        skip: i64,
        limit: i64,
    ) -> FeedResult<Vec<Post>> {
        self.read()?;
        let guard = self.posts.read().await;
        let matching = guard.values().filter(|p| filter.matches(p)).cloned();
        Ok(Self::sorted(matching, order)
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|(_, post)| post)
            .collect())
    }

    async fn find_pinned(&self, user_id: &str) -> FeedResult<Option<Post>> {
        self.read()?;
        let guard = self.posts.read().await;
        Ok(guard
            .values()
            .find(|p| p.user_id == user_id && p.is_pinned)
            .cloned())
    }

    async fn find_by_forward(
        &self,
        user_id: &str,
        forward_post_id: &str,
    ) -> FeedResult<Option<Post>> {
        self.read()?;
        let guard = self.posts.read().await;
        Ok(guard
            .values()
            .find(|p| p.user_id == user_id && p.forward_target() == Some(forward_post_id))
            .cloned())
    }

    async fn find_comment_post_ids_by_user(&self, user_id: &str) -> FeedResult<Vec<PostId>> {
        self.read()?;
        let guard = self.posts.read().await;
        let mut ids: Vec<PostId> = guard
            .values()
            .filter(|p| p.user_id == user_id && p.is_comment())
            .map(|p| p.post_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl RelationRepository for MemoryStore {
    async fn find_by_post_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<UserPostRelation>> {
        self.read()?;
        let guard = self.relations.read().await;
        Ok(guard
            .values()
            .filter(|r| post_ids.contains(&r.post_id))
            .cloned()
            .collect())
    }

    async fn get(&self, user_id: &str, post_id: &str) -> FeedResult<Option<UserPostRelation>> {
        self.read()?;
        let guard = self.relations.read().await;
        Ok(guard
            .get(&(user_id.to_string(), post_id.to_string()))
            .cloned())
    }

    async fn toggle(&self, user_id: &str, post_id: &str, flag: RelationFlag) -> FeedResult<bool> {
        self.ensure_available()?;
        let mut guard = self.relations.write().await;
        let relation = guard
            .entry((user_id.to_string(), post_id.to_string()))
            .or_insert_with(|| UserPostRelation::new(user_id, post_id));
        let value = !relation.flag(flag);
        relation.set_flag(flag, value);
        Ok(value)
    }
}

#[async_trait]
impl AttributeDirectory for MemoryStore {
    async fn find_by_user_ids(&self, user_ids: &[UserId]) -> FeedResult<Vec<Attribute>> {
        self.read()?;
        let guard = self.attributes.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| guard.get(id).cloned())
            .collect())
    }

    async fn find_by_accounts(&self, accounts: &[String]) -> FeedResult<Vec<Attribute>> {
        self.read()?;
        let guard = self.attributes.read().await;
        Ok(guard
            .values()
            .filter(|a| accounts.contains(&a.account))
            .cloned()
            .collect())
    }
}
