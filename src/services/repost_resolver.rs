// RepostResolver - merges original content into repost stubs and tags viewer-relative state

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::infrastructure::chunking::ChunkFailure;
use crate::models::{FeedEntry, Post, PostKind};
use crate::services::posts::PostService;

/// Resolved entries plus the partitions whose originals could not be read
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub entries: Vec<FeedEntry>,
    pub failures: Vec<ChunkFailure>,
    /// Repost stubs left out because their original is missing
    pub dropped: usize,
}

#[derive(Clone)]
pub struct RepostResolver {
    posts: PostService,
}

impl RepostResolver {
    pub fn new(posts: PostService) -> Self {
        Self { posts }
    }

    /// Turn a mix of content posts and repost stubs into feed entries, keeping input order.
    /// Originals not already in `posts` are fetched; stubs whose original is missing
    /// (or is itself a repost) are dropped.
    pub async fn resolve(&self, posts: Vec<Post>) -> Resolution {
        let in_hand: HashSet<&str> = posts
            .iter()
            .filter(|post| !post.is_repost())
            .map(|post| post.id.as_str())
            .collect();
        let missing: Vec<String> = posts
            .iter()
            .filter_map(Post::repost_ref)
            .map(|reference| reference.original_post_id.as_str())
            .filter(|id| !in_hand.contains(id))
            .map(str::to_string)
            .collect();

        let (fetched, failures) = if missing.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            self.posts.get_by_ids(&missing).await.into_parts()
        };

        let originals: HashMap<&str, &Post> = posts
            .iter()
            .chain(fetched.iter())
            .filter(|post| !post.is_repost())
            .map(|post| (post.id.as_str(), post))
            .collect();

        let mut resolution = Resolution {
            failures,
            ..Default::default()
        };
        for post in &posts {
            match &post.kind {
                PostKind::Content(body) => resolution.entries.push(FeedEntry::from_original(
                    post.id.clone(),
                    post.author.clone(),
                    post.created_at,
                    body.clone(),
                )),
                PostKind::Repost(reference) => {
                    let resolved = originals
                        .get(reference.original_post_id.as_str())
                        .and_then(|original| FeedEntry::from_repost(post, original));
                    match resolved {
                        Some(entry) => resolution.entries.push(entry),
                        None => {
                            debug!(
                                "Dropping repost {}: original {} unavailable",
                                post.id, reference.original_post_id
                            );
                            resolution.dropped += 1;
                        }
                    }
                }
            }
        }
        resolution
    }

    /// Mark every entry whose content the viewer has reposted. Best effort: partitions that
    /// fail to load count as "not reposted" and are returned for the caller to report.
    pub async fn tag_viewer_reposts(&self, viewer_id: &str, entries: &mut [FeedEntry]) -> Vec<ChunkFailure> {
        if entries.is_empty() {
            return Vec::new();
        }
        let content_ids: Vec<String> = entries
            .iter()
            .map(|entry| entry.content_id().to_string())
            .collect();

        let (reposted, failures) = self.posts.reposted_by(viewer_id, &content_ids).await.into_parts();
        let reposted: HashSet<String> = reposted.into_iter().collect();
        for entry in entries.iter_mut() {
            entry.reposted_by_viewer = reposted.contains(entry.content_id());
        }
        failures
    }
}
