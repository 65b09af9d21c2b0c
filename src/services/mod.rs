// Feed and graph services layered over the document store

pub mod feed;
pub mod graph;
pub mod posts;
pub mod profiles;
pub mod repost_resolver;
pub mod repost_toggle;

pub use feed::{Feed, FeedAssembler};
pub use graph::GraphService;
pub use posts::{AuthorPosts, PostService};
pub use profiles::ProfileService;
pub use repost_resolver::{RepostResolver, Resolution};
pub use repost_toggle::{RepostAction, RepostToggle, ToggleOutcome};
