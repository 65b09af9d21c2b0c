// Domain records and the collection layout they are stored under

pub mod post;
pub mod profile;
pub mod timestamp;

pub use post::{
    repost_id, AuthorSnapshot, Comment, FeedEntry, Media, MediaKind, NewPost, Post, PostBody,
    PostKind, RepostOrigin, RepostRef,
};
pub use profile::{NewProfile, ProfileUpdate, UserProfile};
pub use timestamp::normalize_timestamp;

pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
/// `handles/{handle}` -> `{uid}` claim documents
pub const HANDLES: &str = "handles";

/// Pointer records for the accounts following `uid`
pub fn followers_collection(uid: &str) -> String {
    format!("{}/{}/followers", USERS, uid)
}

/// Pointer records for the accounts `uid` follows
pub fn following_collection(uid: &str) -> String {
    format!("{}/{}/following", USERS, uid)
}
