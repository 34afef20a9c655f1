//! Question answering: schema lookup, translation, execution.
//!
//! Every stage either succeeds completely or the whole answer fails; nothing
//! partial is ever returned. The store's read guard is held from schema
//! lookup to the end of execution, so the generated SQL always runs against
//! the schema it was generated for.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::QueryError,
    executor::{QueryResult, SqlExecutor},
    schema::SchemaStore,
    translator::QueryTranslator
};

/// Answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub query:     String,
    pub sql_query: String,
    pub result:    QueryResult
}

/// Orchestrates translation and execution against the shared store.
#[derive(Clone)]
pub struct QueryPipeline {
    store:      Arc<SchemaStore>,
    translator: QueryTranslator,
    executor:   SqlExecutor
}

impl QueryPipeline {
    pub fn new(store: Arc<SchemaStore>, translator: QueryTranslator, executor: SqlExecutor) -> Self {
        Self {
            store,
            translator,
            executor
        }
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    /// Answer a natural-language question.
    ///
    /// # Errors
    ///
    /// - [`QueryError::NoSchema`] when no schema has been uploaded
    /// - [`QueryError::NotConfigured`] / [`QueryError::Translation`] from the
    ///   translator
    /// - [`QueryError::Execution`] when the generated statement fails
    pub async fn answer(&self, question: &str) -> Result<QueryAnswer, QueryError> {
        let live = self.store.live().await;
        let schema = live.schema()?;
        let statement = self.translator.translate(schema, question).await?;
        debug!(sql = %statement, "executing generated statement");
        let result = self.executor.execute(&live, &statement).await?;
        info!(%question, message = %result.message, "question answered");
        Ok(QueryAnswer {
            query: question.to_string(),
            sql_query: statement.into_inner(),
            result
        })
    }
}
