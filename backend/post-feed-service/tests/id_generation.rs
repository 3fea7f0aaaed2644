mod common;

use common::{ctx, post_at, Harness, ScriptedCandidates};
use post_feed_service::repository::{PostFilter, PostRepository};
use post_feed_service::{FeedError, PublishPost};

#[tokio::test]
async fn nine_collisions_then_success() {
    let h = Harness::new().with_candidates(ScriptedCandidates::colliding("42", 9));
    h.seed(vec![post_at("42", "u0", 1_000)]).await;

    let post_id = h
        .service
        .publish(&ctx("u1"), PublishPost::new("third time lucky"))
        .await
        .unwrap();

    // nine scripted collisions, then the first fresh candidate
    assert_eq!(post_id, "9000000001");
    assert_eq!(h.backend.count(&PostFilter::All).await.unwrap(), 2);
}

#[tokio::test]
async fn ten_collisions_exhaust_and_create_nothing() {
    let h = Harness::new().with_candidates(ScriptedCandidates::colliding("42", 10));
    h.seed(vec![post_at("42", "u0", 1_000)]).await;

    let err = h
        .service
        .publish(&ctx("u1"), PublishPost::new("unlucky"))
        .await
        .unwrap_err();

    assert!(matches!(err, FeedError::IdExhausted(10)));
    assert_eq!(h.backend.count(&PostFilter::All).await.unwrap(), 1);
    assert!(h
        .backend
        .find_comment_post_ids_by_user("u1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn caller_supplied_id_must_be_unused() {
    let h = Harness::new();
    h.seed(vec![post_at("7", "u0", 1_000)]).await;

    let err = h
        .service
        .publish(&ctx("u1"), PublishPost::new("dup").with_id("7"))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::Conflict(_)));

    let post_id = h
        .service
        .publish(&ctx("u1"), PublishPost::new("mine").with_id("8"))
        .await
        .unwrap();
    assert_eq!(post_id, "8");
}

#[tokio::test]
async fn empty_supplied_id_falls_back_to_generation() {
    let h = Harness::new().with_candidates(ScriptedCandidates::new(["1001"]));

    let post_id = h
        .service
        .publish(&ctx("u1"), PublishPost::new("auto").with_id(""))
        .await
        .unwrap();
    assert_eq!(post_id, "1001");
}
