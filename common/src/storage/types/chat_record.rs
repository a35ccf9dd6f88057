use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ChatRecord, "chat_record", {
    document_id: String,
    question: String,
    answer: String,
    #[serde(default)]
    cited_pages: Vec<u32>
});

impl ChatRecord {
    pub fn new(document_id: String, question: String, answer: String, cited_pages: Vec<u32>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            question,
            answer,
            cited_pages,
        }
    }

    pub async fn append(self, db: &SurrealDbClient) -> Result<ChatRecord, AppError> {
        db.store_item(self)
            .await?
            .ok_or_else(|| AppError::InternalError("chat record was not stored".to_string()))
    }

    /// Chat history of one document, oldest first.
    pub async fn list_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChatRecord>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE document_id = $document_id ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?;

        let records: Vec<ChatRecord> = result.take(0)?;
        Ok(records)
    }
}
