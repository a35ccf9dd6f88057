use std::{collections::HashMap, sync::Arc};

use common::{
    error::AppError,
    storage::types::document::{DocumentState, DocumentTransition},
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::vector_index::VectorIndex;

#[derive(Debug, Default)]
struct Session {
    state: DocumentState,
    index: Option<Arc<VectorIndex>>,
    failure: Option<String>,
}

/// Maps document ids to their lifecycle state and, once ready, their vector index.
///
/// An index becomes visible to readers in the same critical section that flips the
/// document to `Ready`, so a reader never observes a ready document without an index.
/// `get` only holds the read lock long enough to clone the `Arc`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

fn unknown(document_id: &str) -> AppError {
    AppError::NotFound(format!("document {document_id}"))
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_pending(&self, document_id: &str) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(document_id) {
            return Err(AppError::Validation(format!(
                "document {document_id} is already registered"
            )));
        }
        sessions.insert(document_id.to_string(), Session::default());
        Ok(())
    }

    /// Attaches a built index to a pending document without exposing it to queries.
    pub async fn register(&self, document_id: &str, index: Arc<VectorIndex>) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(document_id)
            .ok_or_else(|| unknown(document_id))?;
        Self::attach(document_id, session, index)
    }

    pub async fn mark_ready(&self, document_id: &str) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(document_id)
            .ok_or_else(|| unknown(document_id))?;
        Self::promote(document_id, session)
    }

    /// Attaches the index and marks the document ready under a single write lock.
    pub async fn publish(&self, document_id: &str, index: Arc<VectorIndex>) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(document_id)
            .ok_or_else(|| unknown(document_id))?;
        Self::attach(document_id, session, index)?;
        Self::promote(document_id, session)?;

        info!(
            document_id,
            passages = session.index.as_ref().map_or(0, |index| index.len()),
            "document published"
        );
        Ok(())
    }

    pub async fn mark_failed(&self, document_id: &str, reason: &str) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(document_id)
            .ok_or_else(|| unknown(document_id))?;

        session.state = session.state.next(DocumentTransition::Fail)?;
        session.index = None;
        session.failure = Some(reason.to_string());

        warn!(document_id, reason, "document marked failed");
        Ok(())
    }

    pub async fn get(&self, document_id: &str) -> Result<Arc<VectorIndex>, AppError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(document_id).ok_or_else(|| unknown(document_id))?;

        match (session.state, session.index.as_ref()) {
            (DocumentState::Ready, Some(index)) => Ok(Arc::clone(index)),
            (state, _) => Err(AppError::NotReady(format!(
                "{document_id} is {}",
                state.as_str()
            ))),
        }
    }

    pub async fn state(&self, document_id: &str) -> Option<DocumentState> {
        self.sessions
            .read()
            .await
            .get(document_id)
            .map(|session| session.state)
    }

    pub async fn failure_reason(&self, document_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(document_id)
            .and_then(|session| session.failure.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn attach(document_id: &str, session: &mut Session, index: Arc<VectorIndex>) -> Result<(), AppError> {
        if session.state != DocumentState::Pending {
            return Err(AppError::Validation(format!(
                "cannot attach an index to {document_id} in state {}",
                session.state.as_str()
            )));
        }
        session.index = Some(index);
        Ok(())
    }

    fn promote(document_id: &str, session: &mut Session) -> Result<(), AppError> {
        if session.index.is_none() {
            return Err(AppError::Validation(format!(
                "document {document_id} has no index attached"
            )));
        }
        session.state = session.state.next(DocumentTransition::Succeed)?;
        Ok(())
    }
}
