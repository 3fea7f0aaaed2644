//! Raw collection access: posts, user/post relations and the read-only
//! attribute directory.
//!
//! Two backends implement these traits: [`memory::MemoryStore`] (tests and
//! database-less runs) and [`postgres::PgStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Attribute, Post, PostId, PostUpdate, RelationFlag, UserId, UserPostRelation};
use crate::error::FeedResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Base filter of a post query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostFilter {
    ById(PostId),
    ByIds(Vec<PostId>),
    ByAuthor(UserId),
    /// Follow feed: posts by any of the authors that are not comments
    ByAuthorsExcludingComments(Vec<UserId>),
    /// Comments whose parent is the given post
    ByCommentParent(PostId),
    All,
}

impl PostFilter {
    pub fn matches(&self, post: &Post) -> bool {
        match self {
            PostFilter::ById(id) => &post.post_id == id,
            PostFilter::ByIds(ids) => ids.iter().any(|id| id == &post.post_id),
            PostFilter::ByAuthor(user_id) => &post.user_id == user_id,
            PostFilter::ByAuthorsExcludingComments(user_ids) => {
                !post.is_comment() && user_ids.iter().any(|u| u == &post.user_id)
            }
            PostFilter::ByCommentParent(parent) => {
                !parent.is_empty() && post.comment_target() == Some(parent.as_str())
            }
            PostFilter::All => true,
        }
    }
}

/// Sort order of a post query; every order is descending and total
/// (ties on `create_time` fall back to `post_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    CreateTimeDesc,
    /// Pinned posts first, then by `create_time`
    PinnedThenCreateTimeDesc,
}

/// Position of a post within a [`SortOrder`]; ascending `Ord` on the tuple
/// (pinned, create_time, post_id), so "later in the feed" means "smaller".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub pinned: bool,
    pub create_millis: i64,
    pub post_id: PostId,
}

impl SortKey {
    pub fn of(post: &Post, order: SortOrder) -> Self {
        Self {
            pinned: order == SortOrder::PinnedThenCreateTimeDesc && post.is_pinned,
            create_millis: post.create_millis(),
            post_id: post.post_id.clone(),
        }
    }
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert all posts or none; `Conflict` when an id is taken.
    async fn insert_many(&self, posts: &[Post]) -> FeedResult<()>;

    /// Insert `post` and set each `(target, flag)` relation of its author in
    /// one atomic write; on error neither the post nor any relation persists.
    async fn insert_with_relations(
        &self,
        post: &Post,
        marks: &[(PostId, RelationFlag)],
    ) -> FeedResult<()>;

    async fn find_by_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<Post>>;

    async fn find_one(&self, post_id: &str) -> FeedResult<Option<Post>> {
        let mut posts = self.find_by_ids(&[post_id.to_string()]).await?;
        Ok(posts.pop())
    }

    async fn exists(&self, post_id: &str) -> FeedResult<bool>;

    /// Apply a sparse update; returns whether a post matched.
    async fn update(&self, post_id: &str, update: &PostUpdate, now: DateTime<Utc>)
        -> FeedResult<bool>;

    /// Hard delete; returns the number of removed posts.
    async fn delete_many(&self, post_ids: &[PostId]) -> FeedResult<u64>;

    /// Up to `limit` posts matching `filter` strictly after `after` in `order`.
    async fn find_window(
        &self,
        filter: &PostFilter,
        order: SortOrder,
        after: Option<&SortKey>,
        limit: i64,
    ) -> FeedResult<Vec<Post>>;

    async fn count(&self, filter: &PostFilter) -> FeedResult<i64>;

    async fn find_skip(
        &self,
        filter: &PostFilter,
        order: SortOrder,
        skip: i64,
        limit: i64,
    ) -> FeedResult<Vec<Post>>;

    async fn find_pinned(&self, user_id: &str) -> FeedResult<Option<Post>>;

    async fn find_by_forward(&self, user_id: &str, forward_post_id: &str)
        -> FeedResult<Option<Post>>;

    async fn find_comment_post_ids_by_user(&self, user_id: &str) -> FeedResult<Vec<PostId>>;
}

#[async_trait]
pub trait RelationRepository: Send + Sync {
    async fn find_by_post_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<UserPostRelation>>;

    async fn get(&self, user_id: &str, post_id: &str) -> FeedResult<Option<UserPostRelation>>;

    /// Create-or-flip one flag in a single atomic step; returns the new value.
    async fn toggle(&self, user_id: &str, post_id: &str, flag: RelationFlag) -> FeedResult<bool>;
}

/// Attribute lookups served by the account subsystem
#[async_trait]
pub trait AttributeDirectory: Send + Sync {
    async fn find_by_user_ids(&self, user_ids: &[UserId]) -> FeedResult<Vec<Attribute>>;

    async fn find_by_accounts(&self, accounts: &[String]) -> FeedResult<Vec<Attribute>>;
}
