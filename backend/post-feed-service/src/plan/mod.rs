//! Aggregation plan: the recipe that turns stored posts into denormalized,
//! viewer-relative [`PostView`](crate::domain::PostView)s.
//!
//! A plan is a plain tree value. Each referenced post (forward, comment,
//! ref) is resolved with the same plan one level shallower; at depth 0 the
//! reference collapses to an explicit empty value. The same plan serves a
//! single post, a page of posts and every nested reference, so "get one" and
//! "get many" never diverge.
//!
//! The three references of a level share one `Arc`'d sub-plan, so a plan of
//! depth `d` holds `d + 1` levels rather than a tree of `3^d` copies.

pub mod executor;

use std::sync::Arc;

use crate::domain::{RefKind, UserId};

pub use executor::PlanExecutor;

/// Depth used when the configuration does not override it.
pub const DEFAULT_MAX_DEPTH: u8 = 3;

/// Deepest plan ever built; larger requests are clamped.
pub const MAX_DEPTH_LIMIT: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Author attribute by `user_id`; a missing attribute leaves the field empty.
    JoinAuthor,
    /// Every relation row of the post.
    JoinRelations,
    /// Referenced post resolved with `sub`, or explicitly empty when `None`.
    Reference { kind: RefKind, sub: Option<Arc<Plan>> },
    /// Attributes of every at-mentioned user.
    JoinMentions,
    /// Viewer flags and aggregate counts over the joined relations.
    ComputeFields { viewer: Option<UserId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub depth: u8,
    pub stages: Vec<Stage>,
}

/// Build the plan for `viewer` resolving up to `depth` levels of references,
/// never more than [`MAX_DEPTH_LIMIT`].
pub fn build_plan(viewer: Option<&str>, depth: u8) -> Plan {
    let viewer = viewer.filter(|v| !v.is_empty()).map(str::to_string);
    let depth = depth.min(MAX_DEPTH_LIMIT);

    // bottom-up: the depth-0 level first, each level wrapping the previous one
    let mut sub: Option<Arc<Plan>> = None;
    for level in 0..depth {
        sub = Some(Arc::new(level_plan(&viewer, level, sub)));
    }
    level_plan(&viewer, depth, sub)
}

fn level_plan(viewer: &Option<UserId>, depth: u8, sub: Option<Arc<Plan>>) -> Plan {
    let mut stages = vec![Stage::JoinAuthor, Stage::JoinRelations];
    for kind in RefKind::ALL {
        stages.push(Stage::Reference {
            kind,
            sub: sub.clone(),
        });
    }
    stages.push(Stage::JoinMentions);
    stages.push(Stage::ComputeFields {
        viewer: viewer.clone(),
    });

    Plan { depth, stages }
}

impl Plan {
    pub fn viewer(&self) -> Option<&str> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::ComputeFields { viewer } => viewer.as_deref(),
            _ => None,
        })
    }

    pub fn sub_plan(&self, kind: RefKind) -> Option<&Plan> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Reference { kind: k, sub } if *k == kind => sub.as_deref(),
            _ => None,
        })
    }

    /// Distinct sub-plans of this level, in stage order.
    pub fn distinct_sub_plans(&self) -> Vec<&Arc<Plan>> {
        let mut subs: Vec<&Arc<Plan>> = Vec::new();
        for stage in &self.stages {
            if let Stage::Reference { sub: Some(sub), .. } = stage {
                if !subs.iter().any(|seen| Arc::ptr_eq(seen, sub)) {
                    subs.push(sub);
                }
            }
        }
        subs
    }

    /// Number of nested levels below this plan.
    pub fn nesting(&self) -> usize {
        self.distinct_sub_plans()
            .into_iter()
            .map(|sub| 1 + sub.nesting())
            .max()
            .unwrap_or(0)
    }
}
