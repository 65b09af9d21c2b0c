// RepostToggle - flips a user's repost of a post between Reposted and NotReposted.
// Repost ids are derived from (original, user); of two racing creates only one Create lands.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{DocumentStore, WriteBatch};
use crate::models::post::fields;
use crate::models::profile::fields as profile_fields;
use crate::models::{repost_id, AuthorSnapshot, Post, PostKind, RepostRef};
use crate::services::posts::{post_ref, PostService};
use crate::services::profiles::{profile_ref, require_id, ProfileService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepostAction {
    Created,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub action: RepostAction,
    pub repost_id: String,
}

#[derive(Clone)]
pub struct RepostToggle {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileService,
    posts: PostService,
}

impl RepostToggle {
    pub fn new(store: Arc<dyn DocumentStore>, profiles: ProfileService, posts: PostService) -> Self {
        Self {
            store,
            profiles,
            posts,
        }
    }

    #[instrument(skip(self))]
    pub async fn toggle(&self, original_post_id: &str, acting_user_id: &str) -> AppResult<ToggleOutcome> {
        let original_id = require_id(original_post_id, "original post id")?;
        let user_id = require_id(acting_user_id, "user id")?;
        let user = self.profiles.get(user_id).await?;

        match self.posts.find_repost(original_id, user_id).await? {
            Some(existing) => self.remove(original_id, user_id, existing).await,
            None => self.create(original_id, user_id, user.author_snapshot()).await,
        }
    }

    async fn remove(&self, original_id: &str, user_id: &str, existing: Post) -> AppResult<ToggleOutcome> {
        let mut batch = WriteBatch::new();
        batch
            .delete_existing(post_ref(&existing.id))
            .increment(profile_ref(user_id), profile_fields::REPOSTS_COUNT, -1);
        // The original may have disappeared since; the stub still goes
        if self.posts.find(original_id).await?.is_some() {
            batch.increment(post_ref(original_id), fields::REPOST_COUNT, -1);
        }

        match self.store.commit(batch).await {
            Ok(_) => info!("{} removed repost {} of {}", user_id, existing.id, original_id),
            Err(AppError::PreconditionFailed(_)) => {
                debug!("Repost {} was already removed concurrently", existing.id)
            }
            Err(e) => return Err(e),
        }
        Ok(ToggleOutcome {
            action: RepostAction::Deleted,
            repost_id: existing.id,
        })
    }

    async fn create(
        &self,
        original_id: &str,
        user_id: &str,
        author: AuthorSnapshot,
    ) -> AppResult<ToggleOutcome> {
        let original = self
            .posts
            .find(original_id)
            .await?
            .ok_or_else(|| AppError::OriginalNotFound(original_id.to_string()))?;
        if original.is_repost() {
            return Err(AppError::InvalidArgument(format!(
                "{} is itself a repost; repost its original instead",
                original_id
            )));
        }

        let stub = Post {
            id: repost_id(original_id, user_id),
            author,
            created_at: 0,
            kind: PostKind::Repost(RepostRef {
                original_post_id: original.id.clone(),
                original_author_id: original.author.id.clone(),
            }),
        };

        let mut batch = WriteBatch::new();
        batch
            .create_stamped(post_ref(&stub.id), stub.to_document()?, fields::CREATED_AT)
            .increment(profile_ref(user_id), profile_fields::REPOSTS_COUNT, 1)
            .increment(post_ref(original_id), fields::REPOST_COUNT, 1);

        match self.store.commit(batch).await {
            Ok(_) => info!("{} reposted {}", user_id, original_id),
            Err(AppError::AlreadyExists(_)) => {
                debug!("Repost {} was already created concurrently", stub.id)
            }
            Err(AppError::NotFound(_)) => return Err(AppError::OriginalNotFound(original_id.to_string())),
            Err(e) => return Err(e),
        }
        Ok(ToggleOutcome {
            action: RepostAction::Created,
            repost_id: stub.id,
        })
    }
}
