//! Document store used as the signaling medium between two peers.
//!
//! The store is a generic collection/document service: documents are maps of
//! fields, collections are addressed by slash-separated paths
//! (`calls/<id>/offerCandidates`), and changes are observed through
//! subscriptions.

pub mod call;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// Fields of a store document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document `{collection}/{id}` not found")]
    NotFound { collection: String, id: String },

    #[error("field `{field}` of `{collection}/{id}` is already set")]
    PreconditionFailed {
        collection: String,
        id: String,
        field: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Condition checked atomically with a field merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// Every listed field must be absent from the document.
    FieldsAbsent(Vec<String>),
}

/// Document appended to a collection, as observed by `subscribe_added`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedDocument {
    pub id: String,
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
}

/// Stream of store notifications. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// Next notification, or `None` once the store dropped the listener.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait NegotiationStore: Send + Sync + 'static {
    /// Allocates a new empty document and returns its id.
    async fn create_document(&self, collection: &str) -> StoreResult<String>;

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Fields>>;

    /// Merges `fields` into an existing document (last write wins per field).
    async fn set_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        precondition: Precondition,
    ) -> StoreResult<()>;

    /// Appends a document with a generated id.
    async fn add_document(&self, collection: &str, fields: Fields) -> StoreResult<String>;

    /// Delivers the current snapshot of the document, then every change.
    async fn subscribe_document(&self, collection: &str, id: &str)
        -> StoreResult<Subscription<Fields>>;

    /// Delivers every existing document of the collection, then each addition.
    /// Delivery is at-least-once.
    async fn subscribe_added(&self, collection: &str) -> StoreResult<Subscription<AddedDocument>>;
}
