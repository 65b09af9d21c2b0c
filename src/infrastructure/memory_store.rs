// In-process document store backed by ordered maps.
// A batch holds the write lock for its whole duration, so batches never interleave.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::AppResult;
use crate::infrastructure::document_store::{
    apply_write, compare_values, CommitClock, Direction, Document, DocumentRef, DocumentSnapshot,
    DocumentStore, Query, Timestamp, WriteBatch,
};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Document>>>,
    clock: CommitClock,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, target: &DocumentRef) -> AppResult<Option<DocumentSnapshot>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&target.collection)
            .and_then(|docs| docs.get(&target.id))
            .map(|data| DocumentSnapshot {
                id: target.id.clone(),
                data: data.clone(),
            }))
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<DocumentSnapshot>> {
        query.validate()?;

        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<DocumentSnapshot> = docs
            .iter()
            .filter(|(id, data)| query.filters.iter().all(|f| f.matches(id, data)))
            .filter(|(_, data)| {
                query
                    .order_by
                    .as_ref()
                    .map(|order| data.get(&order.field).is_some_and(|v| !v.is_null()))
                    .unwrap_or(true)
            })
            .map(|(id, data)| DocumentSnapshot {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();

        if let Some(order) = &query.order_by {
            matched.sort_by(|a, b| {
                let by_field = match (a.data.get(&order.field), b.data.get(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => std::cmp::Ordering::Equal,
                };
                let by_field = match order.direction {
                    Direction::Asc => by_field,
                    Direction::Desc => by_field.reverse(),
                };
                by_field.then_with(|| a.id.cmp(&b.id))
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit as usize);
        }

        Ok(matched)
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<Timestamp> {
        batch.validate()?;

        let mut collections = self.collections.write().await;
        let now = self.clock.next();

        // Stage every write first; nothing is published unless all of them apply.
        let mut staged: HashMap<DocumentRef, Option<Document>> = HashMap::new();
        for op in batch.ops() {
            let target = op.target();
            let current = match staged.get(target) {
                Some(state) => state.clone(),
                None => collections
                    .get(&target.collection)
                    .and_then(|docs| docs.get(&target.id))
                    .cloned(),
            };
            let next = apply_write(current, op, now)?;
            staged.insert(target.clone(), next);
        }

        for (target, state) in staged {
            match state {
                Some(data) => {
                    collections
                        .entry(target.collection)
                        .or_default()
                        .insert(target.id, data);
                }
                None => {
                    if let Some(docs) = collections.get_mut(&target.collection) {
                        docs.remove(&target.id);
                    }
                }
            }
        }

        debug!("Committed batch of {} writes at {}", batch.len(), now);
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::infrastructure::document_store::{into_document, Filter};
    use serde_json::json;

    fn post(author: &str, created_at: i64) -> Document {
        into_document(json!({"authorId": author, "createdAt": created_at})).unwrap()
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_partial_state() {
        let store = MemoryDocumentStore::new();

        let mut batch = WriteBatch::new();
        batch
            .create(DocumentRef::new("posts", "p1"), post("u1", 1))
            .increment(DocumentRef::new("users", "missing"), "postsCount", 1);

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.get(&DocumentRef::new("posts", "p1")).await.unwrap().is_none());
        assert_eq!(store.count("posts").await, 0);
    }

    #[tokio::test]
    async fn test_writes_in_one_batch_see_each_other() {
        let store = MemoryDocumentStore::new();
        let user = DocumentRef::new("users", "u1");

        let mut batch = WriteBatch::new();
        batch
            .create(user.clone(), into_document(json!({"postsCount": 0})).unwrap())
            .increment(user.clone(), "postsCount", 1)
            .increment(user.clone(), "postsCount", 1);
        store.commit(batch).await.unwrap();

        let snapshot = store.get(&user).await.unwrap().unwrap();
        assert_eq!(snapshot.data["postsCount"], json!(2));
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let store = MemoryDocumentStore::new();
        let mut batch = WriteBatch::new();
        batch
            .create(DocumentRef::new("posts", "a"), post("u1", 10))
            .create(DocumentRef::new("posts", "b"), post("u2", 30))
            .create(DocumentRef::new("posts", "c"), post("u3", 20))
            .create(DocumentRef::new("posts", "d"), post("u1", 40))
            .create(
                DocumentRef::new("posts", "e"),
                into_document(json!({"authorId": "u1"})).unwrap(),
            );
        store.commit(batch).await.unwrap();

        let query = Query::collection("posts")
            .filter(Filter::in_values("authorId", ["u1", "u2"]))
            .order_by("createdAt", Direction::Desc)
            .limit(2);
        let ids: Vec<String> = store
            .query(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["d", "b"]);

        // Unordered queries keep documents lacking the field
        let all_u1 = Query::collection("posts").filter(Filter::eq("authorId", "u1"));
        assert_eq!(store.query(&all_u1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_server_timestamps_follow_commit_order() {
        let store = MemoryDocumentStore::new();
        let mut first = WriteBatch::new();
        first.create_stamped(DocumentRef::new("posts", "p1"), Document::new(), "createdAt");
        let mut second = WriteBatch::new();
        second.create_stamped(DocumentRef::new("posts", "p2"), Document::new(), "createdAt");

        let t1 = store.commit(first).await.unwrap();
        let t2 = store.commit(second).await.unwrap();
        assert!(t2 > t1);

        let p2 = store.get(&DocumentRef::new("posts", "p2")).await.unwrap().unwrap();
        assert_eq!(p2.data["createdAt"], json!(t2));
    }
}
