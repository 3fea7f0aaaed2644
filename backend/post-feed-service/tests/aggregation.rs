mod common;

use std::time::Duration;

use common::{ctx, post_at, Harness};
use post_feed_service::domain::{PostView, RefKind};
use post_feed_service::pagination::CursorRequest;
use post_feed_service::plan::MAX_DEPTH_LIMIT;
use post_feed_service::{FeedConfig, FeedError, RequestContext};

fn nested_depth(view: &PostView, kind: RefKind) -> usize {
    let mut depth = 0;
    let mut current = view;
    while let Some(next) = current.referenced(kind) {
        depth += 1;
        current = next;
    }
    depth
}

#[tokio::test]
async fn forward_chain_collapses_at_max_depth() {
    let h = Harness::new();
    // p0 <- p1 <- p2 <- p3 <- p4, each forwarding the previous one
    let mut posts = vec![post_at("p0", "u1", 1_000)];
    for i in 1..5 {
        let mut post = post_at(&format!("p{}", i), "u1", 1_000 + i);
        post.forward_post_id = Some(format!("p{}", i - 1));
        posts.push(post);
    }
    h.seed(posts).await;

    let view = h.service.get_post(&ctx("u1"), "p4").await.unwrap();
    assert_eq!(nested_depth(&view, RefKind::Forward), 3);

    let deepest = view
        .forward_post
        .as_ref()
        .and_then(|v| v.forward_post.as_ref())
        .and_then(|v| v.forward_post.as_ref())
        .unwrap();
    assert_eq!(deepest.post_id(), "p1");
    // the raw reference survives even though it is not expanded
    assert_eq!(deepest.post.forward_post_id.as_deref(), Some("p0"));
    assert!(deepest.forward_post.is_none());
}

#[tokio::test]
async fn configured_depth_is_honoured() {
    let h = Harness::with_config(FeedConfig {
        max_depth: 1,
        ..FeedConfig::default()
    });
    let mut child = post_at("c", "u1", 2_000);
    child.comment_post_id = Some("b".into());
    let mut middle = post_at("b", "u1", 1_500);
    middle.comment_post_id = Some("a".into());
    h.seed(vec![post_at("a", "u1", 1_000), middle, child]).await;

    let view = h.service.get_post(&ctx("u1"), "c").await.unwrap();
    assert_eq!(nested_depth(&view, RefKind::Comment), 1);
}

#[tokio::test]
async fn deepest_allowed_depth_resolves_one_chain_per_level() {
    let h = Harness::with_config(FeedConfig {
        max_depth: MAX_DEPTH_LIMIT,
        ..FeedConfig::default()
    });
    let mut posts = vec![post_at("d00", "u1", 1_000)];
    for i in 1..12 {
        let mut post = post_at(&format!("d{:02}", i), "u1", 1_000 + i);
        post.forward_post_id = Some(format!("d{:02}", i - 1));
        post.ref_post_id = Some(format!("d{:02}", i - 1));
        posts.push(post);
    }
    h.seed(posts).await;

    let before = h.backend.read_count();
    let view = h.service.get_post(&ctx("u1"), "d11").await.unwrap();
    let reads = h.backend.read_count() - before;

    assert_eq!(nested_depth(&view, RefKind::Forward), MAX_DEPTH_LIMIT as usize);
    assert_eq!(nested_depth(&view, RefKind::Ref), MAX_DEPTH_LIMIT as usize);
    // lookup + (relations, attributes, posts) per expanded level
    // + (relations, attributes) at the leaf
    assert_eq!(reads, 1 + 3 * MAX_DEPTH_LIMIT as usize + 2);
}

#[tokio::test]
async fn viewer_flags_are_isolated_but_counts_are_shared() {
    let h = Harness::new();
    h.seed(vec![post_at("p", "author", 1_000)]).await;

    assert!(h.service.toggle_like(&ctx("u2"), "p").await.unwrap());
    assert!(h.service.toggle_collect(&ctx("u3"), "p").await.unwrap());

    let as_u2 = h.service.get_post(&ctx("u2"), "p").await.unwrap();
    let as_u3 = h.service.get_post(&ctx("u3"), "p").await.unwrap();
    let anon = h
        .service
        .get_post(&RequestContext::anonymous(), "p")
        .await
        .unwrap();

    assert!(as_u2.is_liked && !as_u2.is_collected);
    assert!(!as_u3.is_liked && as_u3.is_collected);
    assert!(!anon.is_liked && !anon.is_collected && !anon.is_forwarded);

    for view in [&as_u2, &as_u3, &anon] {
        assert_eq!(view.like_count, 1);
        assert_eq!(view.collect_count, 1);
        assert_eq!(view.forward_count, 0);
        assert_eq!(view.comment_count, 0);
    }
}

#[tokio::test]
async fn nested_posts_are_viewer_relative_too() {
    let h = Harness::new();
    let mut forward = post_at("f", "u2", 2_000);
    forward.forward_post_id = Some("orig".into());
    h.seed(vec![post_at("orig", "u1", 1_000), forward]).await;
    h.service.toggle_like(&ctx("u3"), "orig").await.unwrap();

    let as_u3 = h.service.get_post(&ctx("u3"), "f").await.unwrap();
    let nested = as_u3.forward_post.unwrap();
    assert!(nested.is_liked);
    assert_eq!(nested.like_count, 1);

    let as_u1 = h.service.get_post(&ctx("u1"), "f").await.unwrap();
    assert!(!as_u1.forward_post.unwrap().is_liked);
}

#[tokio::test]
async fn author_and_mentions_are_joined() {
    let h = Harness::new();
    h.seed_user("u1", "alice").await;
    h.seed_user("m1", "bob").await;

    let mut post = post_at("p", "u1", 1_000);
    post.at_user_ids = vec!["m1".into(), "m1".into(), "ghost".into()];
    h.seed(vec![post, post_at("q", "nobody", 1_000)]).await;

    let view = h.service.get_post(&ctx("u1"), "p").await.unwrap();
    assert_eq!(view.user_info.as_ref().unwrap().account, "alice");
    assert_eq!(view.at_user_info_list.len(), 1);
    assert_eq!(view.at_user_info_list[0].user_id, "m1");

    let orphan = h.service.get_post(&ctx("u1"), "q").await.unwrap();
    assert!(orphan.user_info.is_none());
    assert!(orphan.at_user_info_list.is_empty());
}

#[tokio::test]
async fn missing_reference_target_resolves_to_empty() {
    let h = Harness::new();
    let mut post = post_at("p", "u1", 1_000);
    post.ref_post_id = Some("deleted".into());
    h.seed(vec![post]).await;

    let view = h.service.get_post(&ctx("u1"), "p").await.unwrap();
    assert!(view.ref_post.is_none());
    assert_eq!(view.post.ref_post_id.as_deref(), Some("deleted"));
}

#[tokio::test]
async fn empty_and_absent_comment_fields_are_equivalent() {
    let h = Harness::new();
    let absent = post_at("a", "u1", 1_000);
    let mut empty = post_at("b", "u1", 2_000);
    empty.comment_post_id = Some(String::new());
    let mut comment = post_at("c", "u1", 3_000);
    comment.comment_post_id = Some("a".into());
    h.seed(vec![absent, empty, comment]).await;

    let feed = h
        .service
        .get_follow_feed(&ctx("u2"), &["u1".to_string()], &CursorRequest::first(10))
        .await
        .unwrap();
    let ids: Vec<_> = feed.items.iter().map(|v| v.post_id().to_string()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert!(feed.items[0].comment_post.is_none());

    let comments = h
        .service
        .get_comment_posts(&ctx("u2"), "a", &CursorRequest::first(10))
        .await
        .unwrap();
    assert_eq!(comments.items.len(), 1);
    assert_eq!(comments.items[0].post_id(), "c");
    assert_eq!(comments.items[0].comment_post.as_ref().unwrap().post_id(), "a");

    let by_user = h
        .service
        .get_comment_post_ids_by_user(&ctx("u2"), "u1")
        .await
        .unwrap();
    assert_eq!(by_user, vec!["c".to_string()]);
}

#[tokio::test]
async fn query_count_does_not_grow_with_page_size() {
    let h = Harness::new();
    let mut posts = Vec::new();
    for i in 0..20 {
        posts.push(post_at(&format!("t{:02}", i), "other", 500 + i));
        let mut post = post_at(&format!("f{:02}", i), "u1", 1_000 + i);
        post.forward_post_id = Some(format!("t{:02}", i));
        post.at_user_ids = vec![format!("m{}", i)];
        posts.push(post);
    }
    h.seed(posts).await;
    let authors = vec!["u1".to_string()];

    let before = h.backend.read_count();
    let small = h
        .service
        .get_follow_feed(&ctx("v"), &authors, &CursorRequest::first(2))
        .await
        .unwrap();
    let small_reads = h.backend.read_count() - before;

    let before = h.backend.read_count();
    let large = h
        .service
        .get_follow_feed(&ctx("v"), &authors, &CursorRequest::first(20))
        .await
        .unwrap();
    let large_reads = h.backend.read_count() - before;

    assert_eq!(small.items.len(), 2);
    assert_eq!(large.items.len(), 20);
    assert!(large.items.iter().all(|v| v.forward_post.is_some()));
    // window + (relations, attributes, posts) at level 0 + (relations, attributes) at level 1
    assert_eq!(small_reads, 6);
    assert_eq!(large_reads, small_reads);
}

#[tokio::test]
async fn cancelled_request_surfaces_canceled() {
    let h = Harness::new();
    h.seed(vec![post_at("p", "u1", 1_000)]).await;

    let (ctx, handle) = ctx("u1").cancellable();
    handle.cancel();
    let err = h.service.get_post(&ctx, "p").await.unwrap_err();
    assert!(matches!(err, FeedError::Canceled));
}

#[tokio::test]
async fn expired_deadline_surfaces_deadline_exceeded() {
    let h = Harness::new();
    h.seed(vec![post_at("p", "u1", 1_000)]).await;

    let ctx = ctx("u1").with_timeout(Duration::ZERO);
    let err = h
        .service
        .get_posts_by_user(&ctx, "u1", &CursorRequest::first(10))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::DeadlineExceeded));
}

#[tokio::test]
async fn store_outage_is_not_swallowed() {
    let h = Harness::new();
    h.seed(vec![post_at("p", "u1", 1_000)]).await;
    h.backend.set_unavailable(true);

    let err = h.service.get_post(&ctx("u1"), "p").await.unwrap_err();
    assert!(matches!(err, FeedError::Unavailable(_)));
}
