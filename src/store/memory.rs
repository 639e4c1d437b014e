use super::{
    AddedDocument, Fields, NegotiationStore, Precondition, StoreError, StoreResult, Subscription,
};
use crate::utils::random_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

type IdSource = Box<dyn Fn() -> String + Send + Sync>;

struct Document {
    fields: Fields,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Collection {
    docs: HashMap<String, Document>,
    order: Vec<String>,
    doc_listeners: HashMap<String, Vec<mpsc::UnboundedSender<Fields>>>,
    added_listeners: Vec<mpsc::UnboundedSender<AddedDocument>>,
}

impl Collection {
    fn insert(&mut self, id: String, fields: Fields) -> AddedDocument {
        let created_at = Utc::now();
        self.order.push(id.clone());
        self.docs.insert(
            id.clone(),
            Document {
                fields: fields.clone(),
                created_at,
            },
        );
        AddedDocument {
            id,
            fields,
            created_at,
        }
    }

    fn added(&self) -> Vec<AddedDocument> {
        self.order
            .iter()
            .filter_map(|id| {
                self.docs.get(id).map(|doc| AddedDocument {
                    id: id.clone(),
                    fields: doc.fields.clone(),
                    created_at: doc.created_at,
                })
            })
            .collect()
    }

    fn notify_added(&mut self, doc: &AddedDocument) {
        self.added_listeners.retain(|tx| tx.send(doc.clone()).is_ok());
    }

    fn notify_changed(&mut self, id: &str) {
        let Some(doc) = self.docs.get(id) else {
            return;
        };
        if let Some(listeners) = self.doc_listeners.get_mut(id) {
            listeners.retain(|tx| tx.send(doc.fields.clone()).is_ok());
        }
    }
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    unavailable: bool,
    writes: usize,
}

impl Inner {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            Err(StoreError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

/// In-process [`NegotiationStore`].
///
/// Two coordinators sharing one `MemoryStore` negotiate with each other the
/// same way two processes would through a hosted document database.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    id_source: IdSource,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_id_source(random_id)
    }

    /// Uses `ids` to name new documents instead of random hex ids.
    pub fn with_id_source(ids: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            id_source: Box::new(ids),
        }
    }

    /// Makes every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Number of successful writes (creations, merges and appends).
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.order.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Delivers every document of `collection` again to its `subscribe_added`
    /// listeners, as an at-least-once backend may do after a reconnect.
    pub fn replay_added(&self, collection: &str) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.collections.get_mut(collection) {
            for doc in c.added() {
                c.notify_added(&doc);
            }
        }
    }

    fn next_id(&self, collection: &Collection) -> StoreResult<String> {
        let id = (self.id_source)();
        if collection.docs.contains_key(&id) {
            return Err(StoreError::Unavailable(format!("id `{id}` already taken")));
        }
        Ok(id)
    }
}

#[async_trait]
impl NegotiationStore for MemoryStore {
    async fn create_document(&self, collection: &str) -> StoreResult<String> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let coll = inner.collections.entry(collection.to_owned()).or_default();
        let id = self.next_id(coll)?;
        let doc = coll.insert(id.clone(), Fields::new());
        coll.notify_added(&doc);
        inner.writes += 1;
        debug!(collection, id = %id, "document created");
        Ok(id)
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Fields>> {
        let inner = self.inner.lock();
        inner.check_available()?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .map(|doc| doc.fields.clone()))
    }

    async fn set_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        precondition: Precondition,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let not_found = || StoreError::NotFound {
            collection: collection.to_owned(),
            id: id.to_owned(),
        };
        let coll = inner.collections.get_mut(collection).ok_or_else(not_found)?;
        let doc = coll.docs.get_mut(id).ok_or_else(not_found)?;

        if let Precondition::FieldsAbsent(required) = &precondition {
            if let Some(field) = required.iter().find(|f| doc.fields.contains_key(*f)) {
                return Err(StoreError::PreconditionFailed {
                    collection: collection.to_owned(),
                    id: id.to_owned(),
                    field: field.clone(),
                });
            }
        }

        doc.fields.extend(fields);
        coll.notify_changed(id);
        inner.writes += 1;
        debug!(collection, id, "document updated");
        Ok(())
    }

    async fn add_document(&self, collection: &str, fields: Fields) -> StoreResult<String> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let coll = inner.collections.entry(collection.to_owned()).or_default();
        let id = self.next_id(coll)?;
        let doc = coll.insert(id.clone(), fields);
        coll.notify_added(&doc);
        inner.writes += 1;
        Ok(id)
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Subscription<Fields>> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_owned(),
                id: id.to_owned(),
            })?;
        let snapshot = coll
            .docs
            .get(id)
            .map(|doc| doc.fields.clone())
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_owned(),
                id: id.to_owned(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, the first send cannot fail.
        let _ = tx.send(snapshot);
        coll.doc_listeners.entry(id.to_owned()).or_default().push(tx);
        Ok(Subscription::new(rx))
    }

    async fn subscribe_added(&self, collection: &str) -> StoreResult<Subscription<AddedDocument>> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let coll = inner.collections.entry(collection.to_owned()).or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        for doc in coll.added() {
            let _ = tx.send(doc);
        }
        coll.added_listeners.push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn merge_keeps_existing_fields() {
        let store = MemoryStore::new();
        let id = store.create_document("calls").await.unwrap();
        store
            .set_fields("calls", &id, fields(json!({"a": 1})), Precondition::None)
            .await
            .unwrap();
        store
            .set_fields("calls", &id, fields(json!({"b": 2, "a": 3})), Precondition::None)
            .await
            .unwrap();

        let doc = store.get_document("calls", &id).await.unwrap().unwrap();
        assert_eq!(doc, fields(json!({"a": 3, "b": 2})));
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn conditional_merge_rejects_present_field() {
        let store = MemoryStore::new();
        let id = store.create_document("calls").await.unwrap();
        let once = Precondition::FieldsAbsent(vec!["offer".into()]);
        store
            .set_fields("calls", &id, fields(json!({"offer": "x"})), once.clone())
            .await
            .unwrap();

        let err = store
            .set_fields("calls", &id, fields(json!({"offer": "y"})), once)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed { ref field, .. } if field == "offer"));

        let doc = store.get_document("calls", &id).await.unwrap().unwrap();
        assert_eq!(doc["offer"], json!("x"));
    }

    #[tokio::test]
    async fn set_fields_on_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .set_fields("calls", "nope", Fields::new(), Precondition::None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn document_subscription_starts_with_snapshot() {
        let store = MemoryStore::new();
        let id = store.create_document("calls").await.unwrap();
        let mut sub = store.subscribe_document("calls", &id).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), Fields::new());

        store
            .set_fields("calls", &id, fields(json!({"answer": 1})), Precondition::None)
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap(), fields(json!({"answer": 1})));
    }

    #[tokio::test]
    async fn added_subscription_sees_existing_then_new_documents_in_order() {
        let store = MemoryStore::new();
        store.add_document("c", fields(json!({"n": 1}))).await.unwrap();
        let mut sub = store.subscribe_added("c").await.unwrap();
        store.add_document("c", fields(json!({"n": 2}))).await.unwrap();

        assert_eq!(sub.next().await.unwrap().fields["n"], json!(1));
        assert_eq!(sub.next().await.unwrap().fields["n"], json!(2));
    }

    #[tokio::test]
    async fn replay_redelivers_same_ids() {
        let store = MemoryStore::new();
        let id = store.add_document("c", Fields::new()).await.unwrap();
        let mut sub = store.subscribe_added("c").await.unwrap();
        store.replay_added("c");

        let first = sub.next().await.unwrap();
        let again = sub.next().await.unwrap();
        assert_eq!(first.id, id);
        assert_eq!(again.id, id);
        // Redelivery keeps the original creation time.
        assert_eq!(again.created_at, first.created_at);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.create_document("calls").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.get_document("calls", "x").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.create_document("calls").await.is_ok());
    }

    #[tokio::test]
    async fn injected_ids_are_used() {
        let store = MemoryStore::with_id_source(|| "abc123".to_owned());
        assert_eq!(store.create_document("calls").await.unwrap(), "abc123");
        assert!(matches!(
            store.create_document("calls").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
