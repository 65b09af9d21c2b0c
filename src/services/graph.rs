// GraphService - follow edges stored as paired pointer records plus denormalized counters.
// Every mutation is one atomic batch: both pointers and both counter changes land together.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{AppError, AppResult};
use crate::infrastructure::chunking::RetryPolicy;
use crate::infrastructure::document_store::{
    Document, DocumentRef, DocumentStore, Query, WriteBatch,
};
use crate::models::profile::fields;
use crate::models::{followers_collection, following_collection, UserProfile};
use crate::services::profiles::{profile_ref, require_id, ProfileService};

#[derive(Clone)]
pub struct GraphService {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileService,
    retry: RetryPolicy,
}

impl GraphService {
    pub fn new(store: Arc<dyn DocumentStore>, profiles: ProfileService, retry: RetryPolicy) -> Self {
        Self {
            store,
            profiles,
            retry,
        }
    }

    fn validate_pair<'a>(follower_id: &'a str, followee_id: &'a str) -> AppResult<(&'a str, &'a str)> {
        let follower = require_id(follower_id, "follower id")?;
        let followee = require_id(followee_id, "followee id")?;
        if follower == followee {
            return Err(AppError::InvalidArgument(format!(
                "user {} cannot follow themselves",
                follower
            )));
        }
        Ok((follower, followee))
    }

    async fn require_profiles(&self, follower: &str, followee: &str) -> AppResult<()> {
        let (follower_profile, followee_profile) =
            tokio::try_join!(self.profiles.find(follower), self.profiles.find(followee))?;
        if follower_profile.is_none() {
            return Err(AppError::ProfileNotFound(follower.to_string()));
        }
        if followee_profile.is_none() {
            return Err(AppError::ProfileNotFound(followee.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        let (follower, followee) = Self::validate_pair(follower_id, followee_id)?;
        self.require_profiles(follower, followee).await?;

        let following_ptr = DocumentRef::new(following_collection(follower), followee);
        let follower_ptr = DocumentRef::new(followers_collection(followee), follower);
        let (following_doc, follower_doc) =
            tokio::try_join!(self.store.get(&following_ptr), self.store.get(&follower_ptr))?;

        if following_doc.is_some() && follower_doc.is_some() {
            debug!("{} already follows {}", follower, followee);
            return Ok(());
        }

        // Only the missing side of a half edge is created and counted
        let mut batch = WriteBatch::new();
        if following_doc.is_none() {
            batch
                .create_stamped(following_ptr, Document::new(), fields::CREATED_AT)
                .increment(profile_ref(follower), fields::FOLLOWING_COUNT, 1);
        }
        if follower_doc.is_none() {
            batch
                .create_stamped(follower_ptr, Document::new(), fields::CREATED_AT)
                .increment(profile_ref(followee), fields::FOLLOWERS_COUNT, 1);
        }

        match self.store.commit(batch).await {
            Ok(_) => {
                info!("{} followed {}", follower, followee);
                Ok(())
            }
            // A concurrent follow of the same pair committed first
            Err(AppError::AlreadyExists(_)) => {
                debug!("Concurrent follow of {} by {} already applied", followee, follower);
                Ok(())
            }
            Err(AppError::NotFound(_)) => Err(AppError::ProfileNotFound(format!(
                "{} or {}",
                follower, followee
            ))),
            Err(e) => Err(e),
        }
    }

    /// Deletes whichever pointers exist and decrements only the matching counters.
    /// Not following is a no-op.
    #[instrument(skip(self))]
    pub async fn unfollow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        let (follower, followee) = Self::validate_pair(follower_id, followee_id)?;
        self.require_profiles(follower, followee).await?;

        let following_ptr = DocumentRef::new(following_collection(follower), followee);
        let follower_ptr = DocumentRef::new(followers_collection(followee), follower);
        let (following_doc, follower_doc) =
            tokio::try_join!(self.store.get(&following_ptr), self.store.get(&follower_ptr))?;

        if following_doc.is_none() && follower_doc.is_none() {
            debug!("{} does not follow {}, nothing to undo", follower, followee);
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        if following_doc.is_some() {
            batch
                .delete_existing(following_ptr)
                .increment(profile_ref(follower), fields::FOLLOWING_COUNT, -1);
        }
        if follower_doc.is_some() {
            batch
                .delete_existing(follower_ptr)
                .increment(profile_ref(followee), fields::FOLLOWERS_COUNT, -1);
        }

        match self.store.commit(batch).await {
            Ok(_) => {
                info!("{} unfollowed {}", follower, followee);
                Ok(())
            }
            // A concurrent unfollow removed the pointers first
            Err(AppError::PreconditionFailed(_)) => {
                debug!("Concurrent unfollow of {} by {} already applied", followee, follower);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn is_following(&self, follower_id: &str, followee_id: &str) -> AppResult<bool> {
        let follower = require_id(follower_id, "follower id")?;
        let followee = require_id(followee_id, "followee id")?;
        let pointer = DocumentRef::new(following_collection(follower), followee);
        Ok(self.store.get(&pointer).await?.is_some())
    }

    /// Ids of the accounts `uid` follows
    pub async fn following_ids(&self, uid: &str) -> AppResult<Vec<String>> {
        let uid = require_id(uid, "uid")?;
        self.pointer_ids(following_collection(uid)).await
    }

    /// Ids of the accounts following `uid`
    pub async fn follower_ids(&self, uid: &str) -> AppResult<Vec<String>> {
        let uid = require_id(uid, "uid")?;
        self.pointer_ids(followers_collection(uid)).await
    }

    async fn pointer_ids(&self, collection: String) -> AppResult<Vec<String>> {
        let query = Query::collection(collection);
        let snapshots = self.retry.run(|| self.store.query(&query)).await?;
        Ok(snapshots.into_iter().map(|snapshot| snapshot.id).collect())
    }

    pub async fn list_followers(&self, uid: &str) -> AppResult<Vec<UserProfile>> {
        let ids = self.follower_ids(uid).await?;
        self.profiles.get_many(&ids).await.into_result()
    }

    pub async fn list_following(&self, uid: &str) -> AppResult<Vec<UserProfile>> {
        let ids = self.following_ids(uid).await?;
        self.profiles.get_many(&ids).await.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryDocumentStore;
    use crate::models::NewProfile;

    async fn setup(uids: &[&str]) -> GraphService {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let profiles = ProfileService::new(store.clone(), RetryPolicy::none());
        for uid in uids {
            profiles
                .register(NewProfile {
                    uid: uid.to_string(),
                    handle: uid.to_string(),
                    display_name: uid.to_uppercase(),
                    email: String::new(),
                    avatar_url: None,
                })
                .await
                .unwrap();
        }
        GraphService::new(store, profiles, RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_follow_writes_both_pointers_and_counters() {
        let graph = setup(&["a", "b"]).await;
        graph.follow("a", "b").await.unwrap();

        assert!(graph.is_following("a", "b").await.unwrap());
        assert!(!graph.is_following("b", "a").await.unwrap());
        assert_eq!(graph.following_ids("a").await.unwrap(), vec!["b"]);
        assert_eq!(graph.follower_ids("b").await.unwrap(), vec!["a"]);

        let a = graph.profiles.get("a").await.unwrap();
        let b = graph.profiles.get("b").await.unwrap();
        assert_eq!(a.following_count, 1);
        assert_eq!(b.followers_count, 1);
    }

    #[tokio::test]
    async fn test_follow_twice_counts_once() {
        let graph = setup(&["a", "b"]).await;
        graph.follow("a", "b").await.unwrap();
        graph.follow("a", "b").await.unwrap();
        assert_eq!(graph.profiles.get("b").await.unwrap().followers_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_follows() {
        let graph = setup(&["a"]).await;
        assert!(matches!(
            graph.follow("a", "a").await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            graph.follow("", "a").await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            graph.follow("a", "ghost").await,
            Err(AppError::ProfileNotFound(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_unfollow_repairs_half_edge() {
        let graph = setup(&["a", "b"]).await;
        graph.follow("a", "b").await.unwrap();

        // Lose the followers-side pointer outside of the service
        let mut batch = WriteBatch::new();
        batch.delete(DocumentRef::new(followers_collection("b"), "a"));
        graph.store.commit(batch).await.unwrap();

        graph.unfollow("a", "b").await.unwrap();
        let a = graph.profiles.get("a").await.unwrap();
        let b = graph.profiles.get("b").await.unwrap();
        assert_eq!(a.following_count, 0);
        // Only the counter whose pointer existed was decremented
        assert_eq!(b.followers_count, 1);
    }

    #[tokio::test]
    async fn test_follow_completes_half_edge() {
        let graph = setup(&["a", "b"]).await;

        // Only the followers-side pointer exists
        let mut batch = WriteBatch::new();
        batch
            .create(DocumentRef::new(followers_collection("b"), "a"), Document::new())
            .increment(profile_ref("b"), fields::FOLLOWERS_COUNT, 1);
        graph.store.commit(batch).await.unwrap();
        assert!(!graph.is_following("a", "b").await.unwrap());

        graph.follow("a", "b").await.unwrap();
        assert!(graph.is_following("a", "b").await.unwrap());
        assert_eq!(graph.following_ids("a").await.unwrap(), vec!["b"]);
        assert_eq!(graph.follower_ids("b").await.unwrap(), vec!["a"]);

        let a = graph.profiles.get("a").await.unwrap();
        let b = graph.profiles.get("b").await.unwrap();
        assert_eq!(a.following_count, 1);
        assert_eq!(b.followers_count, 1);
    }

    #[tokio::test]
    async fn test_list_followers_resolves_profiles() {
        let graph = setup(&["a", "b", "c"]).await;
        graph.follow("a", "c").await.unwrap();
        graph.follow("b", "c").await.unwrap();

        let mut handles: Vec<String> = graph
            .list_followers("c")
            .await
            .unwrap()
            .into_iter()
            .map(|profile| profile.handle)
            .collect();
        handles.sort();
        assert_eq!(handles, vec!["a", "b"]);
        assert_eq!(graph.list_following("a").await.unwrap().len(), 1);
    }
}
