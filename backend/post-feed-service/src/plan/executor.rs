use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use tracing::debug;

use super::{Plan, Stage};
use crate::context::RequestContext;
use crate::domain::{Attribute, Post, PostId, PostView, RefKind, UserId, UserPostRelation};
use crate::error::FeedResult;
use crate::repository::{AttributeDirectory, PostRepository, RelationRepository};

/// Viewer flags and aggregate counts derived from one post's relation rows
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelationSummary {
    pub is_liked: bool,
    pub is_collected: bool,
    pub is_forwarded: bool,
    pub like_count: i64,
    pub collect_count: i64,
    pub forward_count: i64,
    pub comment_count: i64,
}

impl RelationSummary {
    pub fn compute(relations: &[UserPostRelation], viewer: Option<&str>) -> Self {
        let mut summary = Self::default();
        for rel in relations {
            summary.like_count += i64::from(rel.is_liked);
            summary.collect_count += i64::from(rel.is_collected);
            summary.forward_count += i64::from(rel.is_forwarded);
            summary.comment_count += i64::from(rel.is_commented);

            if viewer == Some(rel.user_id.as_str()) {
                summary.is_liked |= rel.is_liked;
                summary.is_collected |= rel.is_collected;
                summary.is_forwarded |= rel.is_forwarded;
            }
        }
        summary
    }
}

/// Evaluates [`Plan`]s level by level.
///
/// Each level costs one relation query, one attribute query and one post
/// query per distinct sub-plan, however many posts the level holds.
#[derive(Clone)]
pub struct PlanExecutor {
    posts: Arc<dyn PostRepository>,
    relations: Arc<dyn RelationRepository>,
    attributes: Arc<dyn AttributeDirectory>,
}

/// Reference ids to resolve with one shared sub-plan
struct RefGroup<'p> {
    plan: &'p Arc<Plan>,
    ids: Vec<PostId>,
    seen: HashSet<PostId>,
}

impl PlanExecutor {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        relations: Arc<dyn RelationRepository>,
        attributes: Arc<dyn AttributeDirectory>,
    ) -> Self {
        Self {
            posts,
            relations,
            attributes,
        }
    }

    /// Resolve `posts` into views, preserving input order.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a RequestContext,
        posts: Vec<Post>,
        plan: &'a Plan,
    ) -> BoxFuture<'a, FeedResult<Vec<PostView>>> {
        Box::pin(self.execute_level(ctx, posts, plan))
    }

    async fn execute_level<'a>(
        &'a self,
        ctx: &'a RequestContext,
        posts: Vec<Post>,
        plan: &'a Plan,
    ) -> FeedResult<Vec<PostView>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        ctx.check()?;

        let post_ids: Vec<PostId> = posts.iter().map(|p| p.post_id.clone()).collect();

        let mut join_author = false;
        let mut join_mentions = false;
        let mut compute: Option<Option<&str>> = None;
        let mut relations: HashMap<PostId, Vec<UserPostRelation>> = HashMap::new();
        let mut groups: Vec<RefGroup<'a>> = Vec::new();
        let mut slots: Vec<(RefKind, Option<usize>)> = Vec::new();

        for stage in &plan.stages {
            match stage {
                Stage::JoinAuthor => join_author = true,
                Stage::JoinMentions => join_mentions = true,
                Stage::ComputeFields { viewer } => compute = Some(viewer.as_deref()),
                Stage::JoinRelations => {
                    let rows = ctx
                        .guard(self.relations.find_by_post_ids(&post_ids))
                        .await?;
                    for row in rows {
                        relations.entry(row.post_id.clone()).or_default().push(row);
                    }
                }
                Stage::Reference { kind, sub: None } => slots.push((*kind, None)),
                Stage::Reference {
                    kind,
                    sub: Some(sub),
                } => {
                    let sub: &'a Arc<Plan> = sub;
                    let idx = match groups.iter().position(|g| Arc::ptr_eq(g.plan, sub)) {
                        Some(idx) => idx,
                        None => {
                            groups.push(RefGroup {
                                plan: sub,
                                ids: Vec::new(),
                                seen: HashSet::new(),
                            });
                            groups.len() - 1
                        }
                    };
                    let group = &mut groups[idx];
                    // empty references short-circuit: no lookup at all
                    for target in posts.iter().filter_map(|p| p.reference(*kind)) {
                        if group.seen.insert(target.to_string()) {
                            group.ids.push(target.to_string());
                        }
                    }
                    slots.push((*kind, Some(idx)));
                }
            }
        }

        let attributes = self
            .load_attributes(ctx, &posts, join_author, join_mentions)
            .await?;
        let resolved = self.resolve_groups(ctx, &groups).await?;

        debug!(
            depth = plan.depth,
            posts = posts.len(),
            relation_rows = relations.values().map(Vec::len).sum::<usize>(),
            reference_batches = groups.len(),
            "plan level resolved"
        );

        let views: Vec<PostView> = posts
            .into_iter()
            .map(|post| {
                let summary = match compute {
                    Some(viewer) => RelationSummary::compute(
                        relations
                            .get(&post.post_id)
                            .map(Vec::as_slice)
                            .unwrap_or(&[]),
                        viewer,
                    ),
                    None => RelationSummary::default(),
                };

                let user_info = if join_author {
                    attributes.get(&post.user_id).cloned()
                } else {
                    None
                };

                let at_user_info_list = if join_mentions {
                    let mut seen = HashSet::new();
                    post.at_user_ids
                        .iter()
                        .filter(|id| seen.insert(id.as_str()))
                        .filter_map(|id| attributes.get(id).cloned())
                        .collect()
                } else {
                    Vec::new()
                };

                let mut forward_post = None;
                let mut comment_post = None;
                let mut ref_post = None;
                for (kind, slot) in &slots {
                    let view = slot.and_then(|idx| {
                        post.reference(*kind)
                            .and_then(|target| resolved[idx].get(target))
                            .map(|v| Box::new(v.clone()))
                    });
                    match kind {
                        RefKind::Forward => forward_post = view,
                        RefKind::Comment => comment_post = view,
                        RefKind::Ref => ref_post = view,
                    }
                }

                PostView {
                    post,
                    is_liked: summary.is_liked,
                    is_collected: summary.is_collected,
                    is_forwarded: summary.is_forwarded,
                    like_count: summary.like_count,
                    collect_count: summary.collect_count,
                    forward_count: summary.forward_count,
                    comment_count: summary.comment_count,
                    user_info,
                    at_user_info_list,
                    forward_post,
                    comment_post,
                    ref_post,
                }
            })
            .collect();

        Ok(views)
    }

    async fn load_attributes(
        &self,
        ctx: &RequestContext,
        posts: &[Post],
        join_author: bool,
        join_mentions: bool,
    ) -> FeedResult<HashMap<UserId, Attribute>> {
        let mut seen = HashSet::new();
        let mut user_ids: Vec<UserId> = Vec::new();
        for post in posts {
            if join_author && seen.insert(post.user_id.as_str()) {
                user_ids.push(post.user_id.clone());
            }
            if join_mentions {
                for id in &post.at_user_ids {
                    if !id.is_empty() && seen.insert(id.as_str()) {
                        user_ids.push(id.clone());
                    }
                }
            }
        }
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let found = ctx
            .guard(self.attributes.find_by_user_ids(&user_ids))
            .await?;
        Ok(found
            .into_iter()
            .map(|attr| (attr.user_id.clone(), attr))
            .collect())
    }

    async fn resolve_groups(
        &self,
        ctx: &RequestContext,
        groups: &[RefGroup<'_>],
    ) -> FeedResult<Vec<HashMap<PostId, PostView>>> {
        let batches = groups.iter().map(|group| async move {
            if group.ids.is_empty() {
                return Ok(HashMap::new());
            }
            let referenced = ctx.guard(self.posts.find_by_ids(&group.ids)).await?;
            let views = self.execute(ctx, referenced, group.plan).await?;
            Ok::<_, crate::error::FeedError>(
                views
                    .into_iter()
                    .map(|view| (view.post.post_id.clone(), view))
                    .collect(),
            )
        });
        try_join_all(batches).await
    }
}
