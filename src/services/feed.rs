// FeedAssembler - builds a viewer's timeline from the follow graph, plus per-profile activity views

use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

use crate::config::FeedConfig;
use crate::error::AppResult;
use crate::infrastructure::chunking::{unique_keys, ChunkFailure};
use crate::models::{FeedEntry, Post};
use crate::services::graph::GraphService;
use crate::services::posts::{AuthorPosts, PostService};
use crate::services::profiles::require_id;
use crate::services::repost_resolver::RepostResolver;

/// A timeline plus the read partitions that failed while building it.
/// The entries are still usable when `failures` is non-empty; they just miss those partitions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Feed {
    pub entries: Vec<FeedEntry>,
    pub failures: Vec<ChunkFailure>,
}

impl Feed {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Newest first; equal timestamps keep their arrival order
fn sort_newest_first(entries: &mut [FeedEntry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[derive(Clone)]
pub struct FeedAssembler {
    graph: GraphService,
    posts: PostService,
    resolver: RepostResolver,
    config: FeedConfig,
}

impl FeedAssembler {
    pub fn new(graph: GraphService, posts: PostService, resolver: RepostResolver, config: FeedConfig) -> Self {
        Self {
            graph,
            posts,
            resolver,
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn assemble_feed(&self, viewer_id: &str) -> AppResult<Feed> {
        let viewer = require_id(viewer_id, "viewer id")?;

        let following = self.graph.following_ids(viewer).await?;
        let scope = unique_keys(std::iter::once(viewer.to_string()).chain(following));

        let (raw, mut failures) = self
            .posts
            .get_by_authors(&scope, self.config.chunk_limit)
            .await
            .into_parts();

        // Content that also arrives through a repost is shown only via the repost
        let reposted_originals: HashSet<String> = raw
            .iter()
            .filter_map(Post::repost_ref)
            .map(|reference| reference.original_post_id.clone())
            .collect();

        let resolution = self.resolver.resolve(raw).await;
        failures.extend(resolution.failures);

        let mut entries: Vec<FeedEntry> = resolution
            .entries
            .into_iter()
            .filter(|entry| entry.is_repost() || !reposted_originals.contains(&entry.id))
            .collect();
        sort_newest_first(&mut entries);
        entries.truncate(self.config.max_entries);

        failures.extend(self.resolver.tag_viewer_reposts(viewer, &mut entries).await);

        if failures.is_empty() {
            info!("Assembled feed for {}: {} entries from {} authors", viewer, entries.len(), scope.len());
        } else {
            warn!(
                "Assembled partial feed for {}: {} entries, {} failed partitions",
                viewer,
                entries.len(),
                failures.len()
            );
        }
        Ok(Feed { entries, failures })
    }

    /// An author's own content posts, newest first
    pub async fn original_posts(&self, author_id: &str) -> AppResult<Vec<Post>> {
        self.posts
            .by_author(author_id, AuthorPosts::Originals, self.config.profile_activity_limit)
            .await
    }

    /// An author's reposts with their originals' content merged in, newest first
    pub async fn reposts(&self, author_id: &str) -> AppResult<Vec<FeedEntry>> {
        let stubs = self
            .posts
            .by_author(author_id, AuthorPosts::Reposts, self.config.profile_activity_limit)
            .await?;
        let resolution = self.resolver.resolve(stubs).await;
        if !resolution.failures.is_empty() {
            warn!(
                "{} partitions of reposted originals failed for {}",
                resolution.failures.len(),
                author_id
            );
        }
        Ok(resolution.entries)
    }

    /// Everything an author posted or reposted, newest first, tagged for `viewer_id` when given
    #[instrument(skip(self))]
    pub async fn all_activity(&self, author_id: &str, viewer_id: Option<&str>) -> AppResult<Vec<FeedEntry>> {
        let posts = self
            .posts
            .by_author(author_id, AuthorPosts::All, self.config.profile_activity_limit)
            .await?;
        let resolution = self.resolver.resolve(posts).await;
        let mut entries = resolution.entries;
        sort_newest_first(&mut entries);

        if let Some(viewer) = viewer_id.map(str::trim).filter(|viewer| !viewer.is_empty()) {
            let failures = self.resolver.tag_viewer_reposts(viewer, &mut entries).await;
            if !failures.is_empty() {
                warn!("Repost status unavailable for {} partitions", failures.len());
            }
        }
        Ok(entries)
    }
}
