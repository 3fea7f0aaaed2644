//! Post store: collection access plus aggregation.
//!
//! [`PostStore`] owns the repository handles and the plan executor. Raw
//! lookups return [`Post`]s; every read that leaves the crate goes through
//! [`build_plan`] and comes back as [`PostView`]s, whatever its shape (one
//! post, a cursor window or a numbered page).

use std::sync::Arc;

use chrono::Utc;

use crate::config::FeedConfig;
use crate::context::RequestContext;
use crate::domain::{Attribute, Post, PostId, PostUpdate, PostView, RelationFlag};
use crate::error::{FeedError, FeedResult};
use crate::metrics::PLAN_EXECUTION_SECONDS;
use crate::pagination::{CursorCodec, CursorPage, CursorRequest, Page, Pagination};
use crate::plan::{build_plan, Plan, PlanExecutor};
use crate::repository::{
    AttributeDirectory, PostFilter, PostRepository, RelationRepository, SortKey, SortOrder,
};

#[derive(Clone)]
pub struct PostStore {
    posts: Arc<dyn PostRepository>,
    relations: Arc<dyn RelationRepository>,
    attributes: Arc<dyn AttributeDirectory>,
    executor: PlanExecutor,
    config: FeedConfig,
}

impl PostStore {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        relations: Arc<dyn RelationRepository>,
        attributes: Arc<dyn AttributeDirectory>,
        config: FeedConfig,
    ) -> Self {
        let executor = PlanExecutor::new(posts.clone(), relations.clone(), attributes.clone());
        Self {
            posts,
            relations,
            attributes,
            executor,
            config,
        }
    }

    /// Store backed by one value serving all three collections.
    pub fn with_backend<B>(backend: Arc<B>, config: FeedConfig) -> Self
    where
        B: PostRepository + RelationRepository + AttributeDirectory + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend, config)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    fn plan_for(&self, ctx: &RequestContext) -> Plan {
        build_plan(ctx.viewer(), self.config.max_depth)
    }

    async fn aggregate(
        &self,
        ctx: &RequestContext,
        posts: Vec<Post>,
        shape: &str,
    ) -> FeedResult<Vec<PostView>> {
        let plan = self.plan_for(ctx);
        let _timer = PLAN_EXECUTION_SECONDS
            .with_label_values(&[shape])
            .start_timer();
        self.executor.execute(ctx, posts, &plan).await
    }

    // ---- writes ----

    /// Insert `posts` as one batch, stamping missing timestamps.
    pub async fn create(&self, ctx: &RequestContext, mut posts: Vec<Post>) -> FeedResult<Vec<Post>> {
        if posts.is_empty() {
            return Ok(posts);
        }
        let now = Utc::now();
        for post in &mut posts {
            post.stamp(now);
        }
        ctx.guard(self.posts.insert_many(&posts)).await?;
        Ok(posts)
    }

    /// Insert one post together with its author's relation marks, atomically.
    pub async fn create_with_relations(
        &self,
        ctx: &RequestContext,
        mut post: Post,
        marks: &[(PostId, RelationFlag)],
    ) -> FeedResult<Post> {
        post.stamp(Utc::now());
        ctx.guard(self.posts.insert_with_relations(&post, marks))
            .await?;
        Ok(post)
    }

    /// Apply a sparse update; `false` when no post matched or nothing was set.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        post_id: &str,
        update: &PostUpdate,
    ) -> FeedResult<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        ctx.guard(self.posts.update(post_id, update, Utc::now()))
            .await
    }

    pub async fn delete(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<u64> {
        self.delete_many(ctx, &[post_id.to_string()]).await
    }

    pub async fn delete_many(&self, ctx: &RequestContext, post_ids: &[PostId]) -> FeedResult<u64> {
        if post_ids.is_empty() {
            return Ok(0);
        }
        ctx.guard(self.posts.delete_many(post_ids)).await
    }

    pub async fn toggle_relation(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        post_id: &str,
        flag: RelationFlag,
    ) -> FeedResult<bool> {
        ctx.guard(self.relations.toggle(user_id, post_id, flag))
            .await
    }

    // ---- raw reads ----

    pub async fn find_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<Option<Post>> {
        if post_id.is_empty() {
            return Ok(None);
        }
        ctx.guard(self.posts.find_one(post_id)).await
    }

    /// Like [`find_post`](Self::find_post) but absence is `NotFound`.
    pub async fn get_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<Post> {
        self.find_post(ctx, post_id)
            .await?
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))
    }

    pub async fn exists(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<bool> {
        ctx.guard(self.posts.exists(post_id)).await
    }

    pub async fn get_pinned_post_by_user_id(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> FeedResult<Option<Post>> {
        ctx.guard(self.posts.find_pinned(user_id)).await
    }

    pub async fn get_post_by_forward_post_id(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        forward_post_id: &str,
    ) -> FeedResult<Option<Post>> {
        if forward_post_id.is_empty() {
            return Ok(None);
        }
        ctx.guard(self.posts.find_by_forward(user_id, forward_post_id))
            .await
    }

    pub async fn get_comment_post_ids_by_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> FeedResult<Vec<PostId>> {
        ctx.guard(self.posts.find_comment_post_ids_by_user(user_id))
            .await
    }

    pub async fn find_attribute_by_account(
        &self,
        ctx: &RequestContext,
        account: &str,
    ) -> FeedResult<Option<Attribute>> {
        let mut found = ctx
            .guard(self.attributes.find_by_accounts(&[account.to_string()]))
            .await?;
        Ok(found.pop())
    }

    // ---- aggregated reads ----

    /// Fully aggregated view of one post, or `NotFound`.
    pub async fn take(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<PostView> {
        let post = self.get_post(ctx, post_id).await?;
        let mut views = self.aggregate(ctx, vec![post], "single").await?;
        views
            .pop()
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))
    }

    /// Aggregate already loaded posts, preserving their order.
    pub async fn take_many(&self, ctx: &RequestContext, posts: Vec<Post>) -> FeedResult<Vec<PostView>> {
        self.aggregate(ctx, posts, "batch").await
    }

    /// One keyset window of `filter` in `order`.
    pub async fn page_by_cursor(
        &self,
        ctx: &RequestContext,
        filter: &PostFilter,
        order: SortOrder,
        request: &CursorRequest,
    ) -> FeedResult<CursorPage<PostView>> {
        let limit = request.limit(self.config.max_page_size)?;
        let after = CursorCodec::decode(&request.cursor)?;

        let posts = ctx
            .guard(self.posts.find_window(filter, order, after.as_ref(), limit))
            .await?;

        let next_cursor = match posts.last() {
            Some(last) if posts.len() as i64 == limit => {
                CursorCodec::encode(&SortKey::of(last, order))
            }
            _ => String::new(),
        };

        let items = self.aggregate(ctx, posts, "cursor").await?;
        Ok(CursorPage { items, next_cursor })
    }

    /// One numbered page of `filter` in `order`, with the collection total.
    pub async fn page_by_number(
        &self,
        ctx: &RequestContext,
        filter: &PostFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> FeedResult<Page<PostView>> {
        pagination.validate()?;

        let total = ctx.guard(self.posts.count(filter)).await?;
        let (skip, limit) = match pagination.window(total) {
            Some(window) => window,
            None => {
                return Ok(Page {
                    total,
                    items: Vec::new(),
                })
            }
        };

        let posts = ctx
            .guard(self.posts.find_skip(filter, order, skip, limit))
            .await?;
        let items = self.aggregate(ctx, posts, "page").await?;
        Ok(Page { total, items })
    }
}
