// ProfileService - registration, lookup and editing of user profiles

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::infrastructure::chunking::{fan_out, unique_keys, ChunkedRead, RetryPolicy};
use crate::infrastructure::document_store::{
    Document, DocumentRef, DocumentStore, Filter, Query, WriteBatch, MAX_MEMBERSHIP_VALUES,
};
use crate::models::profile::{
    fields, normalize_handle, validate_description, validate_display_name,
};
use crate::models::{NewProfile, ProfileUpdate, UserProfile, HANDLES, USERS};

pub(crate) fn require_id<'a>(id: &'a str, what: &str) -> AppResult<&'a str> {
    let id = id.trim();
    if id.is_empty() {
        Err(AppError::InvalidArgument(format!("{} must not be empty", what)))
    } else {
        Ok(id)
    }
}

pub fn profile_ref(uid: &str) -> DocumentRef {
    DocumentRef::new(USERS, uid)
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl ProfileService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[instrument(skip(self, registration), fields(uid = %registration.uid))]
    pub async fn register(&self, registration: NewProfile) -> AppResult<UserProfile> {
        let uid = require_id(&registration.uid, "uid")?.to_string();
        let handle = normalize_handle(&registration.handle)?;
        let display_name = validate_display_name(&registration.display_name)?;
        let avatar_url = registration
            .avatar_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        if self.find(&uid).await?.is_some() {
            return Err(AppError::AlreadyExists(format!("profile {}", uid)));
        }
        let claim = DocumentRef::new(HANDLES, handle.clone());
        if self.store.get(&claim).await?.is_some() {
            return Err(AppError::AlreadyExists(format!("handle '{}' is taken", handle)));
        }

        let profile = UserProfile {
            uid: uid.clone(),
            handle: handle.clone(),
            display_name,
            email: registration.email.trim().to_string(),
            avatar_url,
            description: None,
            created_at: 0,
            followers_count: 0,
            following_count: 0,
            posts_count: 0,
            reposts_count: 0,
        };

        let mut claim_doc = Document::new();
        claim_doc.insert(fields::UID.to_string(), json!(uid));

        // Both creates fail together if either the uid or the handle was taken concurrently
        let mut batch = WriteBatch::new();
        batch
            .create_stamped(profile_ref(&uid), profile.to_document()?, fields::CREATED_AT)
            .create(claim, claim_doc);
        let committed_at = self.store.commit(batch).await?;

        info!("Registered profile {} (@{})", uid, handle);
        Ok(UserProfile {
            created_at: committed_at,
            ..profile
        })
    }

    pub async fn find(&self, uid: &str) -> AppResult<Option<UserProfile>> {
        let uid = require_id(uid, "uid")?;
        match self.store.get(&profile_ref(uid)).await? {
            Some(snapshot) => Ok(Some(UserProfile::from_snapshot(&snapshot)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, uid: &str) -> AppResult<UserProfile> {
        self.find(uid)
            .await?
            .ok_or_else(|| AppError::ProfileNotFound(uid.to_string()))
    }

    pub async fn find_by_handle(&self, handle: &str) -> AppResult<Option<UserProfile>> {
        let Ok(handle) = normalize_handle(handle) else {
            return Ok(None);
        };
        let Some(claim) = self.store.get(&DocumentRef::new(HANDLES, handle)).await? else {
            return Ok(None);
        };
        match claim.get(fields::UID).and_then(Value::as_str) {
            Some(uid) => self.find(uid).await,
            None => Err(AppError::MalformedDocument(format!(
                "{}/{} has no uid",
                HANDLES, claim.id
            ))),
        }
    }

    /// Chunked id lookup; ids without a profile are simply absent from the result
    pub async fn get_many(&self, uids: &[String]) -> ChunkedRead<UserProfile> {
        let uids = unique_keys(uids.iter().cloned());
        fan_out(&uids, MAX_MEMBERSHIP_VALUES, &self.retry, |chunk| {
            let store = self.store.clone();
            async move {
                let query = Query::collection(USERS).filter(Filter::id_in(chunk));
                store
                    .query(&query)
                    .await?
                    .iter()
                    .map(UserProfile::from_snapshot)
                    .collect::<AppResult<Vec<_>>>()
            }
        })
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update(&self, uid: &str, update: ProfileUpdate) -> AppResult<UserProfile> {
        let uid = require_id(uid, "uid")?;
        if update.is_empty() {
            return self.get(uid).await;
        }

        let mut changes = Document::new();
        if let Some(name) = &update.display_name {
            changes.insert(
                fields::DISPLAY_NAME.to_string(),
                json!(validate_display_name(name)?),
            );
        }
        if let Some(avatar) = &update.avatar_url {
            let avatar = avatar.trim();
            let value = if avatar.is_empty() { Value::Null } else { json!(avatar) };
            changes.insert(fields::AVATAR_URL.to_string(), value);
        }
        if let Some(description) = &update.description {
            changes.insert(
                fields::DESCRIPTION.to_string(),
                json!(validate_description(description)?),
            );
        }

        let mut batch = WriteBatch::new();
        batch.update(profile_ref(uid), changes);
        match self.store.commit(batch).await {
            Ok(_) => self.get(uid).await,
            Err(AppError::NotFound(_)) => Err(AppError::ProfileNotFound(uid.to_string())),
            Err(e) => Err(e),
        }
    }
}
