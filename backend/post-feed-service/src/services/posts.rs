use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::id_gen::{CandidateSource, HashCandidates, PostIdGenerator};
use crate::context::RequestContext;
use crate::domain::models::normalize_ref;
use crate::domain::{Post, PostField, PostId, PostMedia, PostUpdate, PostView, RelationFlag, UserId};
use crate::error::{FeedError, FeedResult};
use crate::metrics;
use crate::pagination::{CursorPage, CursorRequest, Page, Pagination};
use crate::repository::{PostFilter, SortOrder};
use crate::store::PostStore;

/// Publish request; the author is always the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishPost {
    /// Caller-chosen id; generated when absent or empty.
    #[serde(default)]
    pub post_id: Option<PostId>,
    #[serde(default)]
    pub forward_post_id: Option<PostId>,
    #[serde(default)]
    pub comment_post_id: Option<PostId>,
    #[serde(default)]
    pub ref_post_id: Option<PostId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media_msgs: Vec<PostMedia>,
    #[serde(default)]
    pub at_user_ids: Vec<UserId>,
    pub allow_comment: bool,
    pub allow_forward: bool,
}

impl PublishPost {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            post_id: None,
            forward_post_id: None,
            comment_post_id: None,
            ref_post_id: None,
            content: content.into(),
            media_msgs: Vec::new(),
            at_user_ids: Vec::new(),
            allow_comment: true,
            allow_forward: true,
        }
    }

    pub fn with_id(mut self, post_id: impl Into<PostId>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn forwarding(mut self, post_id: impl Into<PostId>) -> Self {
        self.forward_post_id = Some(post_id.into());
        self
    }

    pub fn commenting_on(mut self, post_id: impl Into<PostId>) -> Self {
        self.comment_post_id = Some(post_id.into());
        self
    }

    pub fn referencing(mut self, post_id: impl Into<PostId>) -> Self {
        self.ref_post_id = Some(post_id.into());
        self
    }

    pub fn mentioning<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        self.at_user_ids = user_ids.into_iter().map(Into::into).collect();
        self
    }

    fn into_post(self, post_id: PostId, user_id: &str) -> Post {
        let clean = |id: Option<String>| normalize_ref(id.as_deref()).map(str::to_string);
        Post {
            post_id,
            user_id: user_id.to_string(),
            forward_post_id: clean(self.forward_post_id),
            comment_post_id: clean(self.comment_post_id),
            ref_post_id: clean(self.ref_post_id),
            content: self.content,
            media_msgs: self.media_msgs,
            at_user_ids: self.at_user_ids,
            allow_comment: self.allow_comment,
            allow_forward: self.allow_forward,
            is_pinned: false,
            create_time: None,
            update_time: None,
        }
    }
}

/// Post feed operations on behalf of the caller in the request context.
#[derive(Clone)]
pub struct PostService {
    store: PostStore,
    ids: PostIdGenerator,
}

/// Count the call under `operation` once it settles.
async fn observed<T, F>(operation: &str, fut: F) -> FeedResult<T>
where
    F: Future<Output = FeedResult<T>>,
{
    let result = fut.await;
    metrics::record_outcome(operation, &result);
    result
}

impl PostService {
    pub fn new(store: PostStore) -> Self {
        let attempts = store.config().id_attempts;
        Self {
            store,
            ids: PostIdGenerator::new(Arc::new(HashCandidates), attempts),
        }
    }

    pub fn with_candidate_source(mut self, source: Arc<dyn CandidateSource>) -> Self {
        self.ids = PostIdGenerator::new(source, self.store.config().id_attempts);
        self
    }

    pub fn store(&self) -> &PostStore {
        &self.store
    }

    /// Fresh context for `user_id` bounded by the configured request timeout.
    pub fn request_context(&self, user_id: impl Into<UserId>) -> RequestContext {
        let timeout = Duration::from_millis(self.store.config().request_timeout_ms);
        RequestContext::for_user(user_id).with_timeout(timeout)
    }

    // ========== Mutations ==========

    pub async fn publish(&self, ctx: &RequestContext, req: PublishPost) -> FeedResult<PostId> {
        observed("publish", async {
            let user_id = ctx.require_viewer()?;

            if let Some(target) = normalize_ref(req.forward_post_id.as_deref()) {
                let post = self.referenced(ctx, "forward", target).await?;
                if !post.allow_forward {
                    return Err(FeedError::PermissionDenied(format!(
                        "post {} does not allow forwarding",
                        target
                    )));
                }
            }
            if let Some(target) = normalize_ref(req.comment_post_id.as_deref()) {
                let post = self.referenced(ctx, "comment", target).await?;
                if !post.allow_comment {
                    return Err(FeedError::PermissionDenied(format!(
                        "post {} does not allow comments",
                        target
                    )));
                }
            }
            if let Some(target) = normalize_ref(req.ref_post_id.as_deref()) {
                self.referenced(ctx, "ref", target).await?;
            }

            let post_id = self
                .ids
                .assign(ctx, &self.store, req.post_id.as_deref())
                .await?;
            let post = req.into_post(post_id.clone(), user_id);
            let mut marks = Vec::new();
            if let Some(target) = post.forward_target() {
                marks.push((target.to_string(), RelationFlag::Forwarded));
            }
            if let Some(target) = post.comment_target() {
                marks.push((target.to_string(), RelationFlag::Commented));
            }
            let post = self
                .store
                .create_with_relations(ctx, post, &marks)
                .await?;

            info!(
                post_id = %post_id,
                user_id = %user_id,
                forward_post_id = post.forward_target().unwrap_or_default(),
                comment_post_id = post.comment_target().unwrap_or_default(),
                "post published"
            );
            Ok(post_id)
        })
        .await
    }

    pub async fn toggle_like(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<bool> {
        observed("toggle_like", self.toggle(ctx, post_id, RelationFlag::Liked)).await
    }

    pub async fn toggle_collect(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<bool> {
        observed(
            "toggle_collect",
            self.toggle(ctx, post_id, RelationFlag::Collected),
        )
        .await
    }

    pub async fn change_allow_comment(
        &self,
        ctx: &RequestContext,
        post_id: &str,
    ) -> FeedResult<bool> {
        observed("change_allow_comment", async {
            let post = self.owned_post(ctx, post_id).await?;
            let allow = !post.allow_comment;
            self.apply(ctx, post_id, PostField::AllowComment(allow))
                .await?;
            info!(post_id, user_id = %post.user_id, allow_comment = allow, "allow_comment changed");
            Ok(allow)
        })
        .await
    }

    pub async fn change_allow_forward(
        &self,
        ctx: &RequestContext,
        post_id: &str,
    ) -> FeedResult<bool> {
        observed("change_allow_forward", async {
            let post = self.owned_post(ctx, post_id).await?;
            let allow = !post.allow_forward;
            self.apply(ctx, post_id, PostField::AllowForward(allow))
                .await?;
            info!(post_id, user_id = %post.user_id, allow_forward = allow, "allow_forward changed");
            Ok(allow)
        })
        .await
    }

    pub async fn delete_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<()> {
        observed("delete_post", async {
            let post = self.owned_post(ctx, post_id).await?;
            self.store.delete(ctx, post_id).await?;
            info!(post_id, user_id = %post.user_id, "post deleted");
            Ok(())
        })
        .await
    }

    /// Pin `post_id` on its author's feed, unpinning the previous one.
    pub async fn pin_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<()> {
        observed("pin_post", async {
            let post = self.owned_post(ctx, post_id).await?;
            if post.is_pinned {
                return Ok(());
            }

            if let Some(previous) = self
                .store
                .get_pinned_post_by_user_id(ctx, &post.user_id)
                .await?
            {
                self.apply(ctx, &previous.post_id, PostField::Pinned(false))
                    .await?;
            }
            self.apply(ctx, post_id, PostField::Pinned(true)).await?;

            info!(post_id, user_id = %post.user_id, "post pinned");
            Ok(())
        })
        .await
    }

    pub async fn unpin_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<()> {
        observed("unpin_post", async {
            let post = self.owned_post(ctx, post_id).await?;
            if !post.is_pinned {
                return Ok(());
            }
            self.apply(ctx, post_id, PostField::Pinned(false)).await?;
            info!(post_id, user_id = %post.user_id, "post unpinned");
            Ok(())
        })
        .await
    }

    // ========== Reads ==========

    pub async fn get_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<PostView> {
        observed("get_post", self.store.take(ctx, post_id)).await
    }

    /// Author feed, pinned post first.
    pub async fn get_posts_by_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        request: &CursorRequest,
    ) -> FeedResult<CursorPage<PostView>> {
        observed(
            "get_posts_by_user",
            self.store.page_by_cursor(
                ctx,
                &PostFilter::ByAuthor(user_id.to_string()),
                SortOrder::PinnedThenCreateTimeDesc,
                request,
            ),
        )
        .await
    }

    /// Author feed addressed by account name instead of user id.
    pub async fn get_posts_by_account(
        &self,
        ctx: &RequestContext,
        account: &str,
        request: &CursorRequest,
    ) -> FeedResult<CursorPage<PostView>> {
        observed("get_posts_by_account", async {
            let attribute = self
                .store
                .find_attribute_by_account(ctx, account)
                .await?
                .ok_or_else(|| FeedError::NotFound(format!("account {}", account)))?;
            self.store
                .page_by_cursor(
                    ctx,
                    &PostFilter::ByAuthor(attribute.user_id),
                    SortOrder::PinnedThenCreateTimeDesc,
                    request,
                )
                .await
        })
        .await
    }

    pub async fn get_posts_by_ids(
        &self,
        ctx: &RequestContext,
        post_ids: &[PostId],
        request: &CursorRequest,
    ) -> FeedResult<CursorPage<PostView>> {
        observed(
            "get_posts_by_ids",
            self.store.page_by_cursor(
                ctx,
                &PostFilter::ByIds(post_ids.to_vec()),
                SortOrder::CreateTimeDesc,
                request,
            ),
        )
        .await
    }

    /// Posts by any of `user_ids`, comments excluded.
    pub async fn get_follow_feed(
        &self,
        ctx: &RequestContext,
        user_ids: &[UserId],
        request: &CursorRequest,
    ) -> FeedResult<CursorPage<PostView>> {
        observed(
            "get_follow_feed",
            self.store.page_by_cursor(
                ctx,
                &PostFilter::ByAuthorsExcludingComments(user_ids.to_vec()),
                SortOrder::CreateTimeDesc,
                request,
            ),
        )
        .await
    }

    /// Comments under `post_id`, newest first.
    pub async fn get_comment_posts(
        &self,
        ctx: &RequestContext,
        post_id: &str,
        request: &CursorRequest,
    ) -> FeedResult<CursorPage<PostView>> {
        observed(
            "get_comment_posts",
            self.store.page_by_cursor(
                ctx,
                &PostFilter::ByCommentParent(post_id.to_string()),
                SortOrder::CreateTimeDesc,
                request,
            ),
        )
        .await
    }

    pub async fn get_user_posts_page(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        pagination: Pagination,
    ) -> FeedResult<Page<PostView>> {
        observed(
            "get_user_posts_page",
            self.store.page_by_number(
                ctx,
                &PostFilter::ByAuthor(user_id.to_string()),
                SortOrder::PinnedThenCreateTimeDesc,
                pagination,
            ),
        )
        .await
    }

    pub async fn get_posts_page_by_ids(
        &self,
        ctx: &RequestContext,
        post_ids: &[PostId],
        pagination: Pagination,
    ) -> FeedResult<Page<PostView>> {
        observed(
            "get_posts_page_by_ids",
            self.store.page_by_number(
                ctx,
                &PostFilter::ByIds(post_ids.to_vec()),
                SortOrder::CreateTimeDesc,
                pagination,
            ),
        )
        .await
    }

    /// Global listing over every post.
    pub async fn get_posts_page(
        &self,
        ctx: &RequestContext,
        pagination: Pagination,
    ) -> FeedResult<Page<PostView>> {
        observed(
            "get_posts_page",
            self.store.page_by_number(
                ctx,
                &PostFilter::All,
                SortOrder::CreateTimeDesc,
                pagination,
            ),
        )
        .await
    }

    pub async fn get_pinned_post(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> FeedResult<Option<PostView>> {
        observed("get_pinned_post", async {
            match self.store.get_pinned_post_by_user_id(ctx, user_id).await? {
                Some(post) => Ok(self.store.take_many(ctx, vec![post]).await?.pop()),
                None => Ok(None),
            }
        })
        .await
    }

    /// The caller's forward of `forward_post_id`, if they made one.
    pub async fn get_forward_of(
        &self,
        ctx: &RequestContext,
        forward_post_id: &str,
    ) -> FeedResult<Option<PostView>> {
        observed("get_forward_of", async {
            let user_id = ctx.require_viewer()?;
            match self
                .store
                .get_post_by_forward_post_id(ctx, user_id, forward_post_id)
                .await?
            {
                Some(post) => Ok(self.store.take_many(ctx, vec![post]).await?.pop()),
                None => Ok(None),
            }
        })
        .await
    }

    /// Ids of the comment posts written by `user_id`.
    pub async fn get_comment_post_ids_by_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> FeedResult<Vec<PostId>> {
        observed(
            "get_comment_post_ids_by_user",
            self.store.get_comment_post_ids_by_user(ctx, user_id),
        )
        .await
    }

    // ========== Helpers ==========

    async fn toggle(
        &self,
        ctx: &RequestContext,
        post_id: &str,
        flag: RelationFlag,
    ) -> FeedResult<bool> {
        let user_id = ctx.require_viewer()?;
        let post = self.store.get_post(ctx, post_id).await?;
        let value = self
            .store
            .toggle_relation(ctx, user_id, &post.post_id, flag)
            .await?;
        info!(
            post_id,
            user_id = %user_id,
            flag = flag.column(),
            value,
            "relation toggled"
        );
        Ok(value)
    }

    async fn referenced(&self, ctx: &RequestContext, kind: &str, post_id: &str) -> FeedResult<Post> {
        self.store
            .find_post(ctx, post_id)
            .await?
            .ok_or_else(|| FeedError::NotFound(format!("{} target post {}", kind, post_id)))
    }

    /// Load `post_id` and check the caller wrote it.
    async fn owned_post(&self, ctx: &RequestContext, post_id: &str) -> FeedResult<Post> {
        let user_id = ctx.require_viewer()?;
        let post = self.store.get_post(ctx, post_id).await?;
        if post.user_id != user_id {
            return Err(FeedError::PermissionDenied(format!(
                "post {} belongs to another user",
                post_id
            )));
        }
        Ok(post)
    }

    async fn apply(&self, ctx: &RequestContext, post_id: &str, field: PostField) -> FeedResult<()> {
        let update = PostUpdate::new().set(field);
        if !self.store.update(ctx, post_id, &update).await? {
            return Err(FeedError::NotFound(format!("post {}", post_id)));
        }
        Ok(())
    }
}
