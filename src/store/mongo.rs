//! MongoDB backend for the document adapter.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Client, Collection, Database};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::models::Record;

use super::DocumentBackend;

pub struct MongoBackend {
    client: Client,
    db: Database,
}

impl MongoBackend {
    /// Create the client. The driver connects lazily, so an unreachable
    /// server surfaces on the first write.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        Ok(Self { client, db })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

/// JSON record to BSON document.
pub fn to_bson_document(record: &Record) -> Result<Document> {
    bson::to_document(record)
        .map_err(|e| PipelineError::shape(format!("record is not a valid document: {}", e)))
}

/// BSON document back to a JSON record, using relaxed extended JSON for
/// BSON-only types (object ids, dates).
pub fn from_bson_document(document: Document) -> Record {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[async_trait]
impl DocumentBackend for MongoBackend {
    fn kind(&self) -> &str {
        "mongo"
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Record>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let documents = docs
            .iter()
            .map(to_bson_document)
            .collect::<Result<Vec<_>>>()?;
        self.collection(collection).insert_many(documents).await?;
        Ok(())
    }

    async fn upsert_by(&self, collection: &str, key: &str, docs: Vec<Record>) -> Result<()> {
        let coll = self.collection(collection);
        for record in &docs {
            let document = to_bson_document(record)?;
            let Some(natural_key) = document.get(key).cloned() else {
                coll.insert_one(document).await?;
                continue;
            };
            let mut filter = Document::new();
            filter.insert(key, natural_key);
            coll.update_one(filter, doc! { "$set": document })
                .upsert(true)
                .await?;
        }
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>> {
        let cursor = self.collection(collection).find(doc! {}).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(from_bson_document).collect())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
