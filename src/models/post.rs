// Post model: content posts and repost stubs as one sum type, plus the resolved feed view.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{Document, DocumentSnapshot, Timestamp};
use crate::models::timestamp::deserialize_timestamp;

pub const MAX_TEXT_CHARS: usize = 280;

/// Stored field names on `posts/{postId}`
pub mod fields {
    pub const AUTHOR_ID: &str = "authorId";
    pub const AUTHOR_NAME: &str = "authorName";
    pub const AUTHOR_HANDLE: &str = "authorHandle";
    pub const TEXT: &str = "text";
    pub const MEDIA_URL: &str = "mediaUrl";
    pub const MEDIA_TYPE: &str = "mediaType";
    pub const CREATED_AT: &str = "createdAt";
    pub const LIKES: &str = "likes";
    pub const COMMENTS: &str = "comments";
    pub const IS_REPOST: &str = "isRepost";
    pub const REPOST_COUNT: &str = "repostCount";
    pub const ORIGINAL_POST_ID: &str = "originalPostId";
    pub const ORIGINAL_AUTHOR_ID: &str = "originalAuthorId";
}

/// Deterministic id of `user_id`'s repost of `original_post_id`; at most one can exist.
pub fn repost_id(original_post_id: &str, user_id: &str) -> String {
    format!("repost_{}_{}", original_post_id, user_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub id: String,
    pub name: String,
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Unknown stored kinds read as images
    fn from_stored(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("video") => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_handle: String,
    pub text: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub created_at: Timestamp,
}

/// Content owned by a non-repost post
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostBody {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    pub likes: Vec<String>,
    pub comments: Vec<Comment>,
    pub repost_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostRef {
    pub original_post_id: String,
    pub original_author_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PostKind {
    Content(PostBody),
    Repost(RepostRef),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author: AuthorSnapshot,
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub kind: PostKind,
}

impl Post {
    pub fn is_repost(&self) -> bool {
        matches!(self.kind, PostKind::Repost(_))
    }

    pub fn body(&self) -> Option<&PostBody> {
        match &self.kind {
            PostKind::Content(body) => Some(body),
            PostKind::Repost(_) => None,
        }
    }

    pub fn repost_ref(&self) -> Option<&RepostRef> {
        match &self.kind {
            PostKind::Repost(reference) => Some(reference),
            PostKind::Content(_) => None,
        }
    }

    /// Id of the post that owns the content: the original for reposts, otherwise this post
    pub fn content_id(&self) -> &str {
        match &self.kind {
            PostKind::Repost(reference) => &reference.original_post_id,
            PostKind::Content(_) => &self.id,
        }
    }

    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> AppResult<Self> {
        let record: PostRecord = serde_json::from_value(Value::Object(snapshot.data.clone()))
            .map_err(|e| AppError::MalformedDocument(format!("posts/{}: {}", snapshot.id, e)))?;
        record.into_post(snapshot.id.clone())
    }

    /// Stored form, without `createdAt` (filled in with the commit time)
    pub fn to_document(&self) -> AppResult<Document> {
        let mut doc = Document::new();
        doc.insert(fields::AUTHOR_ID.to_string(), json!(self.author.id));
        doc.insert(fields::AUTHOR_NAME.to_string(), json!(self.author.name));
        doc.insert(fields::AUTHOR_HANDLE.to_string(), json!(self.author.handle));
        match &self.kind {
            PostKind::Content(body) => {
                doc.insert(fields::TEXT.to_string(), json!(body.text));
                doc.insert(fields::LIKES.to_string(), json!(body.likes));
                doc.insert(fields::COMMENTS.to_string(), serde_json::to_value(&body.comments)?);
                doc.insert(fields::IS_REPOST.to_string(), json!(false));
                doc.insert(fields::REPOST_COUNT.to_string(), json!(body.repost_count));
                if let Some(media) = &body.media {
                    doc.insert(fields::MEDIA_URL.to_string(), json!(media.url));
                    doc.insert(fields::MEDIA_TYPE.to_string(), json!(media.kind.as_str()));
                }
            }
            PostKind::Repost(reference) => {
                doc.insert(fields::TEXT.to_string(), json!(""));
                doc.insert(fields::LIKES.to_string(), json!([]));
                doc.insert(fields::COMMENTS.to_string(), json!([]));
                doc.insert(fields::IS_REPOST.to_string(), json!(true));
                doc.insert(fields::REPOST_COUNT.to_string(), json!(0));
                doc.insert(
                    fields::ORIGINAL_POST_ID.to_string(),
                    json!(reference.original_post_id),
                );
                doc.insert(
                    fields::ORIGINAL_AUTHOR_ID.to_string(),
                    json!(reference.original_author_id),
                );
            }
        }
        Ok(doc)
    }
}

// Loose on-disk shape; validated into `Post` by `into_post`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(default)]
    author_id: String,
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    author_handle: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    created_at: Timestamp,
    #[serde(default)]
    likes: Vec<String>,
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default)]
    is_repost: bool,
    #[serde(default)]
    repost_count: u64,
    #[serde(default)]
    original_post_id: Option<String>,
    #[serde(default)]
    original_author_id: Option<String>,
}

impl PostRecord {
    fn into_post(self, id: String) -> AppResult<Post> {
        if self.author_id.is_empty() {
            return Err(AppError::MalformedDocument(format!("posts/{}: missing authorId", id)));
        }
        let author = AuthorSnapshot {
            id: self.author_id,
            name: self.author_name,
            handle: self.author_handle,
        };

        let kind = if self.is_repost {
            let original_post_id = self
                .original_post_id
                .filter(|original| !original.is_empty())
                .ok_or_else(|| {
                    AppError::MalformedDocument(format!(
                        "posts/{}: repost without originalPostId",
                        id
                    ))
                })?;
            PostKind::Repost(RepostRef {
                original_post_id,
                original_author_id: self.original_author_id.unwrap_or_default(),
            })
        } else {
            let media = self
                .media_url
                .filter(|url| !url.trim().is_empty())
                .map(|url| Media {
                    url,
                    kind: MediaKind::from_stored(self.media_type.as_deref()),
                });
            PostKind::Content(PostBody {
                text: self.text,
                media,
                likes: self.likes,
                comments: self.comments,
                repost_count: self.repost_count,
            })
        };

        Ok(Post {
            id,
            author,
            created_at: self.created_at,
            kind,
        })
    }
}

/// Post creation input
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Option<Media>,
}

/// Where a resolved repost's content came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostOrigin {
    pub post_id: String,
    pub author: AuthorSnapshot,
    pub created_at: Timestamp,
}

/// Render-ready timeline record: an original post, or a repost carrying its original's content.
/// `author` and `created_at` always describe the entry itself (the reposter for reposts).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub id: String,
    pub author: AuthorSnapshot,
    pub created_at: Timestamp,
    pub body: PostBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_of: Option<RepostOrigin>,
    pub reposted_by_viewer: bool,
}

impl FeedEntry {
    pub fn from_original(id: String, author: AuthorSnapshot, created_at: Timestamp, body: PostBody) -> Self {
        FeedEntry {
            id,
            author,
            created_at,
            body,
            repost_of: None,
            reposted_by_viewer: false,
        }
    }

    /// Merge a repost stub with its original's content. `original` must be a content post.
    pub fn from_repost(stub: &Post, original: &Post) -> Option<Self> {
        let body = original.body()?.clone();
        Some(FeedEntry {
            id: stub.id.clone(),
            author: stub.author.clone(),
            created_at: stub.created_at,
            body,
            repost_of: Some(RepostOrigin {
                post_id: original.id.clone(),
                author: original.author.clone(),
                created_at: original.created_at,
            }),
            reposted_by_viewer: false,
        })
    }

    pub fn is_repost(&self) -> bool {
        self.repost_of.is_some()
    }

    pub fn content_id(&self) -> &str {
        self.repost_of
            .as_ref()
            .map(|origin| origin.post_id.as_str())
            .unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::document_store::into_document;

    fn snapshot(id: &str, value: Value) -> DocumentSnapshot {
        DocumentSnapshot {
            id: id.to_string(),
            data: into_document(value).unwrap(),
        }
    }

    #[test]
    fn test_decodes_content_post() {
        let post = Post::from_snapshot(&snapshot(
            "p1",
            json!({
                "authorId": "u1", "authorName": "Ada", "authorHandle": "ada",
                "text": "hello", "mediaUrl": "https://cdn/x.mp4", "mediaType": "VIDEO",
                "createdAt": 1_700_000_000_000i64, "likes": ["bob"], "repostCount": 2
            }),
        ))
        .unwrap();

        assert!(!post.is_repost());
        assert_eq!(post.content_id(), "p1");
        let body = post.body().unwrap();
        assert_eq!(body.text, "hello");
        assert_eq!(body.media.as_ref().unwrap().kind, MediaKind::Video);
        assert_eq!(body.likes, vec!["bob"]);
        assert_eq!(body.repost_count, 2);
    }

    #[test]
    fn test_decodes_repost_stub() {
        let post = Post::from_snapshot(&snapshot(
            "r1",
            json!({"authorId": "u2", "isRepost": true, "originalPostId": "p1", "originalAuthorId": "u1"}),
        ))
        .unwrap();
        assert!(post.is_repost());
        assert_eq!(post.content_id(), "p1");
        assert!(post.body().is_none());
    }

    #[test]
    fn test_repost_without_original_is_malformed() {
        let err = Post::from_snapshot(&snapshot("r1", json!({"authorId": "u2", "isRepost": true})))
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedDocument(_)));
    }

    #[test]
    fn test_stored_form_decodes_back() {
        let post = Post {
            id: "p9".to_string(),
            author: AuthorSnapshot {
                id: "u1".to_string(),
                name: "Ada".to_string(),
                handle: "ada".to_string(),
            },
            created_at: 0,
            kind: PostKind::Content(PostBody {
                text: "hi".to_string(),
                media: Some(Media {
                    url: "https://cdn/a.png".to_string(),
                    kind: MediaKind::Image,
                }),
                ..Default::default()
            }),
        };
        let document = post.to_document().unwrap();
        assert_eq!(document[fields::IS_REPOST], json!(false));
        assert_eq!(document[fields::MEDIA_TYPE], json!("image"));
        assert!(!document.contains_key(fields::CREATED_AT));

        let decoded = Post::from_snapshot(&DocumentSnapshot {
            id: "p9".to_string(),
            data: document,
        })
        .unwrap();
        assert_eq!(decoded, post);
    }

    #[test]
    fn test_feed_entry_from_repost_keeps_stub_identity() {
        let original = Post::from_snapshot(&snapshot(
            "p1",
            json!({"authorId": "u1", "text": "hello", "createdAt": 1000}),
        ))
        .unwrap();
        let stub = Post::from_snapshot(&snapshot(
            "r1",
            json!({"authorId": "u2", "isRepost": true, "originalPostId": "p1", "createdAt": 2000}),
        ))
        .unwrap();

        let entry = FeedEntry::from_repost(&stub, &original).unwrap();
        assert_eq!(entry.id, "r1");
        assert_eq!(entry.author.id, "u2");
        assert_eq!(entry.created_at, 2_000_000);
        assert_eq!(entry.body.text, "hello");
        assert_eq!(entry.content_id(), "p1");
        assert!(FeedEntry::from_repost(&stub, &stub).is_none());
    }
}
