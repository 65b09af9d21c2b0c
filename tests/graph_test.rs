mod common;

use common::{test_config, FlakyStore, Harness};
use feed_engine::error::AppError;
use feed_engine::infrastructure::memory_store::MemoryDocumentStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_follow_unfollow_symmetry() {
    let h = Harness::memory();
    let uids = ["a", "b", "c"];
    for uid in uids {
        h.register(uid).await;
    }

    for follower in uids {
        for followee in uids {
            if follower == followee {
                continue;
            }
            let before_follower = h.profile(follower).await;
            let before_followee = h.profile(followee).await;

            h.api.follow(follower, followee).await.unwrap();
            assert!(h.api.is_following(follower, followee).await.unwrap());
            assert_eq!(
                h.profile(follower).await.following_count,
                before_follower.following_count + 1
            );
            assert_eq!(
                h.profile(followee).await.followers_count,
                before_followee.followers_count + 1
            );

            h.api.unfollow(follower, followee).await.unwrap();
            assert!(!h.api.is_following(follower, followee).await.unwrap());
            assert_eq!(
                h.profile(follower).await.following_count,
                before_follower.following_count
            );
            assert_eq!(
                h.profile(followee).await.followers_count,
                before_followee.followers_count
            );
        }
    }
}

#[tokio::test]
async fn test_unfollow_when_not_following_is_noop() {
    let h = Harness::memory();
    h.register("a").await;
    h.register("b").await;
    h.api.follow("b", "a").await.unwrap();

    h.api.unfollow("a", "b").await.unwrap();
    h.api.unfollow("a", "b").await.unwrap();

    let a = h.profile("a").await;
    let b = h.profile("b").await;
    assert_eq!(a.following_count, 0);
    assert_eq!(a.followers_count, 1);
    assert_eq!(b.following_count, 1);
    assert_eq!(b.followers_count, 0);
}

#[tokio::test]
async fn test_follow_errors() {
    let h = Harness::memory();
    h.register("a").await;

    assert!(matches!(
        h.api.follow("a", "a").await,
        Err(AppError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.api.unfollow("a", " ").await,
        Err(AppError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.api.follow("ghost", "a").await,
        Err(AppError::ProfileNotFound(id)) if id == "ghost"
    ));
    assert!(matches!(
        h.api.unfollow("a", "ghost").await,
        Err(AppError::ProfileNotFound(_))
    ));
    assert_eq!(h.profile("a").await.following_count, 0);
}

#[tokio::test]
async fn test_concurrent_follows_count_once() {
    // Both calls pass the membership check before either batch commits
    let slow = FlakyStore::new(Arc::new(MemoryDocumentStore::new()))
        .with_read_delay(Duration::from_millis(10));
    let h = Harness::over(Arc::new(slow), test_config());
    h.register("a").await;
    h.register("b").await;

    let (first, second) = tokio::join!(h.api.follow("a", "b"), h.api.follow("a", "b"));
    first.unwrap();
    second.unwrap();

    assert_eq!(h.profile("a").await.following_count, 1);
    assert_eq!(h.profile("b").await.followers_count, 1);
    assert_eq!(h.api.graph.follower_ids("b").await.unwrap(), vec!["a"]);
}

#[tokio::test]
async fn test_follow_on_sqlite() {
    let h = Harness::sqlite().await;
    for uid in ["a", "b", "c"] {
        h.register(uid).await;
    }
    h.api.follow("a", "b").await.unwrap();
    h.api.follow("a", "c").await.unwrap();
    h.api.follow("c", "b").await.unwrap();

    assert_eq!(h.api.graph.following_ids("a").await.unwrap(), vec!["b", "c"]);
    assert_eq!(h.api.graph.follower_ids("b").await.unwrap(), vec!["a", "c"]);
    assert_eq!(h.profile("b").await.followers_count, 2);

    h.api.unfollow("a", "b").await.unwrap();
    assert_eq!(h.profile("b").await.followers_count, 1);
    assert_eq!(h.profile("a").await.following_count, 1);

    let followers = h.api.graph.list_followers("b").await.unwrap();
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].uid, "c");
}
