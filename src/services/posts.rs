// PostService - post persistence, chunked post reads, likes and comments

use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::infrastructure::chunking::{fan_out, unique_keys, ChunkedRead, RetryPolicy};
use crate::infrastructure::document_store::{
    current_time_millis, Direction, DocumentRef, DocumentSnapshot, DocumentStore, Filter, Query,
    WriteBatch, MAX_MEMBERSHIP_VALUES,
};
use crate::models::post::{fields, MAX_TEXT_CHARS};
use crate::models::profile::fields as profile_fields;
use crate::models::{Comment, NewPost, Post, PostBody, PostKind, POSTS};
use crate::services::profiles::{profile_ref, require_id, ProfileService};

pub fn post_ref(post_id: &str) -> DocumentRef {
    DocumentRef::new(POSTS, post_id)
}

/// Which of an author's posts to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorPosts {
    All,
    Originals,
    Reposts,
}

/// Decode query results, skipping documents that no longer parse as posts
fn decode_posts(snapshots: Vec<DocumentSnapshot>) -> Vec<Post> {
    snapshots
        .iter()
        .filter_map(|snapshot| match Post::from_snapshot(snapshot) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!("Skipping unreadable post: {}", e);
                None
            }
        })
        .collect()
}

fn validate_text(raw: &str, allow_empty: bool) -> AppResult<String> {
    let text = raw.trim();
    let len = text.chars().count();
    if len > MAX_TEXT_CHARS {
        return Err(AppError::InvalidArgument(format!(
            "text is {} characters, limit is {}",
            len, MAX_TEXT_CHARS
        )));
    }
    if len == 0 && !allow_empty {
        return Err(AppError::InvalidArgument("text must not be empty".to_string()));
    }
    Ok(text.to_string())
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileService,
    retry: RetryPolicy,
}

impl PostService {
    pub fn new(store: Arc<dyn DocumentStore>, profiles: ProfileService, retry: RetryPolicy) -> Self {
        Self {
            store,
            profiles,
            retry,
        }
    }

    /// Persist a content post and bump the author's `postsCount` in the same batch.
    #[instrument(skip(self, new_post))]
    pub async fn create(&self, author_id: &str, new_post: NewPost) -> AppResult<Post> {
        let author_id = require_id(author_id, "author id")?;
        let text = validate_text(&new_post.text, true)?;
        let media = match new_post.media {
            Some(mut media) => {
                media.url = media.url.trim().to_string();
                if media.url.is_empty() {
                    return Err(AppError::InvalidArgument("media url must not be empty".to_string()));
                }
                Some(media)
            }
            None => None,
        };
        let author = self.profiles.get(author_id).await?;

        let mut post = Post {
            id: Uuid::new_v4().to_string(),
            author: author.author_snapshot(),
            created_at: 0,
            kind: PostKind::Content(PostBody {
                text,
                media,
                ..Default::default()
            }),
        };

        let mut batch = WriteBatch::new();
        batch
            .create_stamped(post_ref(&post.id), post.to_document()?, fields::CREATED_AT)
            .increment(profile_ref(author_id), profile_fields::POSTS_COUNT, 1);
        post.created_at = match self.store.commit(batch).await {
            Ok(committed_at) => committed_at,
            Err(AppError::NotFound(_)) => return Err(AppError::ProfileNotFound(author_id.to_string())),
            Err(e) => return Err(e),
        };

        info!("Created post {} by {}", post.id, author_id);
        Ok(post)
    }

    pub async fn find(&self, post_id: &str) -> AppResult<Option<Post>> {
        let post_id = require_id(post_id, "post id")?;
        match self.store.get(&post_ref(post_id)).await? {
            Some(snapshot) => Ok(Some(Post::from_snapshot(&snapshot)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, post_id: &str) -> AppResult<Post> {
        self.find(post_id)
            .await?
            .ok_or_else(|| AppError::PostNotFound(post_id.to_string()))
    }

    /// Newest-first posts of the given authors, one query per group of ten authors,
    /// at most `limit_per_chunk` posts per query. Order across groups is not guaranteed.
    #[instrument(skip(self, author_ids), fields(authors = author_ids.len()))]
    pub async fn get_by_authors(&self, author_ids: &[String], limit_per_chunk: u32) -> ChunkedRead<Post> {
        let authors = unique_keys(author_ids.iter().cloned());
        fan_out(&authors, MAX_MEMBERSHIP_VALUES, &self.retry, |chunk| {
            let store = self.store.clone();
            async move {
                let query = Query::collection(POSTS)
                    .filter(Filter::in_values(fields::AUTHOR_ID, chunk))
                    .order_by(fields::CREATED_AT, Direction::Desc)
                    .limit(limit_per_chunk);
                Ok::<_, AppError>(decode_posts(store.query(&query).await?))
            }
        })
        .await
    }

    /// Chunked lookup by post id; unknown ids are absent from the result
    pub async fn get_by_ids(&self, post_ids: &[String]) -> ChunkedRead<Post> {
        let ids = unique_keys(post_ids.iter().cloned());
        fan_out(&ids, MAX_MEMBERSHIP_VALUES, &self.retry, |chunk| {
            let store = self.store.clone();
            async move {
                let query = Query::collection(POSTS).filter(Filter::id_in(chunk));
                Ok::<_, AppError>(decode_posts(store.query(&query).await?))
            }
        })
        .await
    }

    /// One author's posts, newest first
    pub async fn by_author(&self, author_id: &str, which: AuthorPosts, limit: u32) -> AppResult<Vec<Post>> {
        let author_id = require_id(author_id, "author id")?;
        let mut query = Query::collection(POSTS).filter(Filter::eq(fields::AUTHOR_ID, author_id));
        query = match which {
            AuthorPosts::All => query,
            AuthorPosts::Originals => query.filter(Filter::eq(fields::IS_REPOST, false)),
            AuthorPosts::Reposts => query.filter(Filter::eq(fields::IS_REPOST, true)),
        };
        let query = query
            .order_by(fields::CREATED_AT, Direction::Desc)
            .limit(limit);

        let snapshots = self.retry.run(|| self.store.query(&query)).await?;
        Ok(decode_posts(snapshots))
    }

    /// The acting user's repost of `original_post_id`, if any
    pub async fn find_repost(&self, original_post_id: &str, user_id: &str) -> AppResult<Option<Post>> {
        let original_post_id = require_id(original_post_id, "original post id")?;
        let user_id = require_id(user_id, "user id")?;
        let query = Query::collection(POSTS)
            .filter(Filter::eq(fields::ORIGINAL_POST_ID, original_post_id))
            .filter(Filter::eq(fields::AUTHOR_ID, user_id))
            .limit(1);
        let snapshots = self.store.query(&query).await?;
        match snapshots.first() {
            Some(snapshot) => Ok(Some(Post::from_snapshot(snapshot)?)),
            None => Ok(None),
        }
    }

    /// Which of `content_ids` the viewer currently has a repost of
    pub async fn reposted_by(&self, viewer_id: &str, content_ids: &[String]) -> ChunkedRead<String> {
        let ids = unique_keys(content_ids.iter().cloned());
        let viewer = viewer_id.to_string();
        fan_out(&ids, MAX_MEMBERSHIP_VALUES, &self.retry, |chunk| {
            let store = self.store.clone();
            let viewer = viewer.clone();
            async move {
                let query = Query::collection(POSTS)
                    .filter(Filter::in_values(fields::ORIGINAL_POST_ID, chunk))
                    .filter(Filter::eq(fields::AUTHOR_ID, viewer));
                let reposted: Vec<String> = decode_posts(store.query(&query).await?)
                    .into_iter()
                    .filter_map(|post| post.repost_ref().map(|r| r.original_post_id.clone()))
                    .collect();
                Ok::<_, AppError>(reposted)
            }
        })
        .await
    }

    /// Follow a repost to the post that owns the content
    async fn content_post(&self, post_id: &str) -> AppResult<Post> {
        let post = self.get(post_id).await?;
        match post.repost_ref() {
            Some(reference) => self
                .find(&reference.original_post_id)
                .await?
                .filter(|original| !original.is_repost())
                .ok_or_else(|| AppError::OriginalNotFound(reference.original_post_id.clone())),
            None => Ok(post),
        }
    }

    /// Like or un-like the content behind `post_id`. Returns whether it is now liked.
    #[instrument(skip(self))]
    pub async fn toggle_like(&self, post_id: &str, user_id: &str) -> AppResult<bool> {
        let user = self.profiles.get(require_id(user_id, "user id")?).await?;
        let post = self.content_post(post_id).await?;
        let liked = post
            .body()
            .map(|body| body.likes.iter().any(|handle| handle == &user.handle))
            .unwrap_or(false);

        let mut batch = WriteBatch::new();
        if liked {
            batch.array_remove(post_ref(&post.id), fields::LIKES, vec![json!(user.handle)]);
        } else {
            batch.array_union(post_ref(&post.id), fields::LIKES, vec![json!(user.handle)]);
        }
        match self.store.commit(batch).await {
            Ok(_) => Ok(!liked),
            Err(AppError::NotFound(_)) => Err(AppError::PostNotFound(post.id)),
            Err(e) => Err(e),
        }
    }

    /// Append a comment to the content behind `post_id`
    #[instrument(skip(self, text))]
    pub async fn add_comment(&self, post_id: &str, author_id: &str, text: &str) -> AppResult<Comment> {
        let text = validate_text(text, false)?;
        let author = self.profiles.get(require_id(author_id, "author id")?).await?;
        let post = self.content_post(post_id).await?;

        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            author_id: author.uid.clone(),
            author_name: author.display_name.clone(),
            author_handle: author.handle.clone(),
            text,
            created_at: current_time_millis(),
        };

        let mut batch = WriteBatch::new();
        batch.array_union(
            post_ref(&post.id),
            fields::COMMENTS,
            vec![serde_json::to_value(&comment)?],
        );
        match self.store.commit(batch).await {
            Ok(_) => Ok(comment),
            Err(AppError::NotFound(_)) => Err(AppError::PostNotFound(post.id)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryDocumentStore;
    use crate::models::{Media, MediaKind, NewProfile};

    async fn setup() -> PostService {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let profiles = ProfileService::new(store.clone(), RetryPolicy::none());
        for uid in ["ada", "bob"] {
            profiles
                .register(NewProfile {
                    uid: uid.to_string(),
                    handle: uid.to_string(),
                    display_name: uid.to_string(),
                    email: String::new(),
                    avatar_url: None,
                })
                .await
                .unwrap();
        }
        PostService::new(store, profiles, RetryPolicy::none())
    }

    fn text(body: &str) -> NewPost {
        NewPost {
            text: body.to_string(),
            media: None,
        }
    }

    #[tokio::test]
    async fn test_create_counts_post_and_snapshots_author() {
        let posts = setup().await;
        let post = posts.create("ada", text("  hello  ")).await.unwrap();

        assert_eq!(post.author.handle, "ada");
        assert_eq!(post.body().unwrap().text, "hello");
        assert_eq!(posts.get(&post.id).await.unwrap(), post);
        assert_eq!(posts.profiles.get("ada").await.unwrap().posts_count, 1);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let posts = setup().await;
        assert!(matches!(
            posts.create("ada", text(&"x".repeat(281))).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(posts.create("ada", text(&"é".repeat(280))).await.is_ok());
        assert!(posts.create("ada", text("")).await.is_ok());
        assert!(matches!(
            posts.create("ghost", text("hi")).await,
            Err(AppError::ProfileNotFound(_))
        ));

        let blank_media = NewPost {
            text: String::new(),
            media: Some(Media {
                url: "  ".to_string(),
                kind: MediaKind::Image,
            }),
        };
        assert!(matches!(
            posts.create("ada", blank_media).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            posts.get("missing").await,
            Err(AppError::PostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_by_authors_is_newest_first_per_chunk() {
        let posts = setup().await;
        let first = posts.create("ada", text("one")).await.unwrap();
        let second = posts.create("bob", text("two")).await.unwrap();
        let third = posts.create("ada", text("three")).await.unwrap();

        let read = posts
            .get_by_authors(&["ada".to_string(), "bob".to_string()], 100)
            .await;
        let ids: Vec<&str> = read.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

        let limited = posts.get_by_authors(&["ada".to_string()], 1).await;
        assert_eq!(limited.items.len(), 1);
        assert_eq!(limited.items[0].id, third.id);
    }

    #[tokio::test]
    async fn test_likes_toggle_by_handle() {
        let posts = setup().await;
        let post = posts.create("ada", text("like me")).await.unwrap();

        assert!(posts.toggle_like(&post.id, "bob").await.unwrap());
        assert_eq!(posts.get(&post.id).await.unwrap().body().unwrap().likes, vec!["bob"]);
        assert!(!posts.toggle_like(&post.id, "bob").await.unwrap());
        assert!(posts.get(&post.id).await.unwrap().body().unwrap().likes.is_empty());
    }

    #[tokio::test]
    async fn test_comments_append_in_order() {
        let posts = setup().await;
        let post = posts.create("ada", text("talk")).await.unwrap();

        posts.add_comment(&post.id, "bob", "first").await.unwrap();
        posts.add_comment(&post.id, "ada", "second").await.unwrap();
        assert!(matches!(
            posts.add_comment(&post.id, "bob", "   ").await,
            Err(AppError::InvalidArgument(_))
        ));

        let stored = posts.get(&post.id).await.unwrap();
        let texts: Vec<&str> = stored
            .body()
            .unwrap()
            .comments
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
