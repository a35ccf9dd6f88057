use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Lifecycle of an uploaded document. `Ready` and `Failed` are terminal.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentState {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "PENDING",
            DocumentState::Ready => "READY",
            DocumentState::Failed => "FAILED",
        }
    }

    /// Validates `event` against the lifecycle and returns the resulting state.
    pub fn next(&self, event: DocumentTransition) -> Result<DocumentState, AppError> {
        use lifecycle::pending;
        match (self, event) {
            (DocumentState::Pending, DocumentTransition::Succeed) => pending()
                .succeed()
                .map(|_| DocumentState::Ready)
                .map_err(|_| invalid_transition(self, event)),
            (DocumentState::Pending, DocumentTransition::Fail) => pending()
                .fail()
                .map(|_| DocumentState::Failed)
                .map_err(|_| invalid_transition(self, event)),
            _ => Err(invalid_transition(self, event)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTransition {
    Succeed,
    Fail,
}

impl DocumentTransition {
    fn as_str(&self) -> &'static str {
        match self {
            DocumentTransition::Succeed => "succeed",
            DocumentTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: DocumentLifecycleMachine,
        initial: Pending,
        states: [Pending, Ready, Failed],
        events {
            succeed {
                transition: { from: Pending, to: Ready }
            }
            fail {
                transition: { from: Pending, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> DocumentLifecycleMachine<(), Pending> {
        DocumentLifecycleMachine::new(())
    }
}

fn invalid_transition(state: &DocumentState, event: DocumentTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid document transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

stored_object!(Document, "document", {
    filename: String,
    state: DocumentState,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    page_count: Option<u32>,
    #[serde(default)]
    passage_count: Option<u32>
});

impl Document {
    pub fn new(filename: String) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            filename,
            state: DocumentState::Pending,
            error_message: None,
            page_count: None,
            passage_count: None,
        }
    }

    pub async fn create_pending(
        filename: String,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let document = Self::new(filename);
        db.store_item(document.clone()).await?;
        Ok(document)
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Document, AppError> {
        db.get_item::<Document>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {id}")))
    }

    /// All documents, newest first.
    pub async fn list_recent(db: &SurrealDbClient) -> Result<Vec<Document>, AppError> {
        let mut result = db
            .client
            .query("SELECT * FROM type::table($table) ORDER BY created_at DESC")
            .bind(("table", Self::table_name()))
            .await?;

        let documents: Vec<Document> = result.take(0)?;
        Ok(documents)
    }

    pub async fn mark_ready(
        id: &str,
        page_count: u32,
        passage_count: u32,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let current = Self::get(id, db).await?;
        let next = current.state.next(DocumentTransition::Succeed)?;

        const READY_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next,
                page_count = $page_count,
                passage_count = $passage_count,
                error_message = NONE,
                updated_at = $now
            WHERE state = $pending
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(READY_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("next", next.as_str()))
            .bind(("pending", DocumentState::Pending.as_str()))
            .bind(("page_count", page_count))
            .bind(("passage_count", passage_count))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&current.state, DocumentTransition::Succeed))
    }

    pub async fn mark_failed(
        id: &str,
        error_message: &str,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let current = Self::get(id, db).await?;
        let next = current.state.next(DocumentTransition::Fail)?;

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next,
                error_message = $error_message,
                updated_at = $now
            WHERE state = $pending
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("next", next.as_str()))
            .bind(("pending", DocumentState::Pending.as_str()))
            .bind(("error_message", error_message.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&current.state, DocumentTransition::Fail))
    }
}
