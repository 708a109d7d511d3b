//! In-memory connector used by manager tests.

use crate::db::backend::BackendKind;
use crate::db::params::{QueryOutput, SqlParam};
use crate::error::{DbError, DbResult};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Answer every statement with a single `{"test": 1}` row.
    Ok,
    /// Refuse every statement with a connection error.
    Fail,
    /// Never answer (sleeps far beyond any probe timeout).
    Hang,
}

#[derive(Debug)]
pub struct MockConnector {
    pub kind: BackendKind,
    pub behavior: MockBehavior,
}

impl MockConnector {
    pub fn new(kind: BackendKind, behavior: MockBehavior) -> Self {
        Self { kind, behavior }
    }

    pub async fn execute(
        &self,
        _sql: &str,
        _params: &[SqlParam],
    ) -> DbResult<QueryOutput> {
        match self.behavior {
            MockBehavior::Ok => {
                let mut row = serde_json::Map::new();
                row.insert("test".to_string(), serde_json::json!(1));
                Ok(QueryOutput {
                    rows: vec![row],
                    rows_affected: 0,
                })
            }
            MockBehavior::Fail => Err(DbError::connection(
                "mock backend refused the query",
                "not a real backend",
            )),
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Ok(QueryOutput::default())
            }
        }
    }
}
