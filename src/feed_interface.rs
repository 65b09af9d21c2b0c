// Feed Interface - single entry point bundling the feed/graph services, plus its HTTP router

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    config::FeedConfig,
    error::{AppError, AppResult},
    infrastructure::{
        chunking::RetryPolicy, document_store::DocumentStore, metrics_store::MetricsStore,
        viewer::ViewerContext,
    },
    models::{Comment, FeedEntry, NewPost, NewProfile, Post, ProfileUpdate, UserProfile},
    services::{
        Feed, FeedAssembler, GraphService, PostService, ProfileService, RepostResolver,
        RepostToggle, ToggleOutcome,
    },
};

#[derive(Clone)]
pub struct FeedInterface {
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<MetricsStore>>,
    pub profiles: ProfileService,
    pub graph: GraphService,
    pub posts: PostService,
    pub feed: FeedAssembler,
    pub reposts: RepostToggle,
}

impl FeedInterface {
    pub fn new(store: Arc<dyn DocumentStore>, config: &FeedConfig) -> Self {
        let retry = RetryPolicy::from_config(config);
        let profiles = ProfileService::new(store.clone(), retry.clone());
        let graph = GraphService::new(store.clone(), profiles.clone(), retry.clone());
        let posts = PostService::new(store.clone(), profiles.clone(), retry);
        let resolver = RepostResolver::new(posts.clone());
        let feed = FeedAssembler::new(graph.clone(), posts.clone(), resolver, config.clone());
        let reposts = RepostToggle::new(store.clone(), profiles.clone(), posts.clone());

        Self {
            store,
            metrics: None,
            profiles,
            graph,
            posts,
            feed,
            reposts,
        }
    }

    /// Route every store call through `metrics` so `/metrics` can report it
    pub fn with_metrics(metrics: Arc<MetricsStore>, config: &FeedConfig) -> Self {
        let store: Arc<dyn DocumentStore> = metrics.clone();
        Self {
            metrics: Some(metrics),
            ..Self::new(store, config)
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn assemble_feed(&self, viewer_id: &str) -> AppResult<Feed> {
        self.feed.assemble_feed(viewer_id).await
    }

    pub async fn create_post(&self, author_id: &str, new_post: NewPost) -> AppResult<Post> {
        self.posts.create(author_id, new_post).await
    }

    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        self.graph.follow(follower_id, followee_id).await
    }

    pub async fn unfollow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        self.graph.unfollow(follower_id, followee_id).await
    }

    pub async fn is_following(&self, follower_id: &str, followee_id: &str) -> AppResult<bool> {
        self.graph.is_following(follower_id, followee_id).await
    }

    pub async fn toggle_repost(&self, original_post_id: &str, acting_user_id: &str) -> AppResult<ToggleOutcome> {
        self.reposts.toggle(original_post_id, acting_user_id).await
    }

    pub async fn get_original_posts(&self, author_id: &str) -> AppResult<Vec<Post>> {
        self.feed.original_posts(author_id).await
    }

    pub async fn get_reposts(&self, author_id: &str) -> AppResult<Vec<FeedEntry>> {
        self.feed.reposts(author_id).await
    }

    pub async fn get_all_activity(&self, author_id: &str, viewer_id: Option<&str>) -> AppResult<Vec<FeedEntry>> {
        self.feed.all_activity(author_id, viewer_id).await
    }
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub viewer: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

// HTTP Handlers

pub async fn feed_handler(
    State(api): State<FeedInterface>,
    viewer: ViewerContext,
) -> AppResult<Json<Feed>> {
    Ok(Json(api.assemble_feed(&viewer.user_id).await?))
}

pub async fn register_profile_handler(
    State(api): State<FeedInterface>,
    Json(req): Json<NewProfile>,
) -> AppResult<(StatusCode, Json<UserProfile>)> {
    let profile = api.profiles.register(req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(api.profiles.get(&uid).await?))
}

pub async fn update_profile_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
    Json(req): Json<ProfileUpdate>,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(api.profiles.update(&uid, req).await?))
}

pub async fn profile_by_handle_handler(
    State(api): State<FeedInterface>,
    AxumPath(handle): AxumPath<String>,
) -> AppResult<Json<UserProfile>> {
    api.profiles
        .find_by_handle(&handle)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::ProfileNotFound(handle.clone()))
}

pub async fn is_following_handler(
    State(api): State<FeedInterface>,
    AxumPath((uid, target)): AxumPath<(String, String)>,
) -> AppResult<Json<Value>> {
    let following = api.is_following(&uid, &target).await?;
    Ok(Json(json!({ "following": following })))
}

pub async fn follow_handler(
    State(api): State<FeedInterface>,
    AxumPath((uid, target)): AxumPath<(String, String)>,
) -> AppResult<Json<Value>> {
    api.follow(&uid, &target).await?;
    Ok(Json(json!({ "following": true })))
}

pub async fn unfollow_handler(
    State(api): State<FeedInterface>,
    AxumPath((uid, target)): AxumPath<(String, String)>,
) -> AppResult<Json<Value>> {
    api.unfollow(&uid, &target).await?;
    Ok(Json(json!({ "following": false })))
}

pub async fn followers_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
) -> AppResult<Json<Vec<UserProfile>>> {
    Ok(Json(api.graph.list_followers(&uid).await?))
}

pub async fn following_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
) -> AppResult<Json<Vec<UserProfile>>> {
    Ok(Json(api.graph.list_following(&uid).await?))
}

pub async fn original_posts_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(api.get_original_posts(&uid).await?))
}

pub async fn reposts_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
) -> AppResult<Json<Vec<FeedEntry>>> {
    Ok(Json(api.get_reposts(&uid).await?))
}

pub async fn activity_handler(
    State(api): State<FeedInterface>,
    AxumPath(uid): AxumPath<String>,
    Query(params): Query<ActivityQuery>,
) -> AppResult<Json<Vec<FeedEntry>>> {
    Ok(Json(api.get_all_activity(&uid, params.viewer.as_deref()).await?))
}

pub async fn create_post_handler(
    State(api): State<FeedInterface>,
    viewer: ViewerContext,
    Json(req): Json<NewPost>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let post = api.create_post(&viewer.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post_handler(
    State(api): State<FeedInterface>,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<Json<Post>> {
    Ok(Json(api.posts.get(&post_id).await?))
}

pub async fn like_handler(
    State(api): State<FeedInterface>,
    viewer: ViewerContext,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let liked = api.posts.toggle_like(&post_id, &viewer.user_id).await?;
    Ok(Json(json!({ "liked": liked })))
}

pub async fn comment_handler(
    State(api): State<FeedInterface>,
    viewer: ViewerContext,
    AxumPath(post_id): AxumPath<String>,
    Json(req): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = api
        .posts
        .add_comment(&post_id, &viewer.user_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn repost_handler(
    State(api): State<FeedInterface>,
    viewer: ViewerContext,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<Json<ToggleOutcome>> {
    Ok(Json(api.toggle_repost(&post_id, &viewer.user_id).await?))
}

pub async fn metrics_handler(State(api): State<FeedInterface>) -> AppResult<Json<Value>> {
    match &api.metrics {
        Some(metrics) => Ok(Json(serde_json::to_value(metrics.snapshot().await)?)),
        None => Ok(Json(json!({ "backend": api.backend_name(), "operations": {} }))),
    }
}

pub async fn health_handler(State(api): State<FeedInterface>) -> Json<Value> {
    Json(json!({ "status": "healthy", "backend": api.backend_name() }))
}

// Create feed router
pub fn create_feed_router(api: FeedInterface) -> Router {
    Router::new()
        // Timeline
        .route("/feed", get(feed_handler))

        // Profiles and the follow graph
        .route("/users", post(register_profile_handler))
        .route("/users/{id}", get(get_profile_handler).patch(update_profile_handler))
        .route("/users/by-handle/{handle}", get(profile_by_handle_handler))
        .route(
            "/users/{id}/following/{target}",
            get(is_following_handler)
                .put(follow_handler)
                .delete(unfollow_handler),
        )
        .route("/users/{id}/followers", get(followers_handler))
        .route("/users/{id}/following", get(following_handler))

        // Profile activity
        .route("/users/{id}/posts", get(original_posts_handler))
        .route("/users/{id}/reposts", get(reposts_handler))
        .route("/users/{id}/activity", get(activity_handler))

        // Posts
        .route("/posts", post(create_post_handler))
        .route("/posts/{id}", get(get_post_handler))
        .route("/posts/{id}/likes", post(like_handler))
        .route("/posts/{id}/comments", post(comment_handler))
        .route("/posts/{id}/repost", post(repost_handler))

        // Operations
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(api)
}
