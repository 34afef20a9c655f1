//! Natural-language to SQL translation.
//!
//! The translator builds a fixed prompt around the schema text and the
//! question, sends it to a [`LanguageModel`], and cleans the reply down to a
//! bare SQL statement. It does not check that the statement is valid SQL:
//! the database engine does that on execution. It does reject replies that
//! contain more than one statement.
//!
//! # Example
//!
//! ```
//! use sql_query_assistant::translator::clean_sql;
//!
//! let raw = "```sql\nSELECT COUNT(*) FROM t;\n```";
//! assert_eq!(clean_sql(raw), "SELECT COUNT(*) FROM t;");
//! ```

use std::{fmt, sync::Arc, sync::LazyLock, time::Duration};

use regex::Regex;
use sqlparser::{dialect::SQLiteDialect, parser::Parser};
use tracing::debug;

use crate::{error::QueryError, llm::LanguageModel, schema::Schema};

/// Default time allowed for one generation call
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Opening fence with an optional SQL language tag. Any other word after the
/// fence is kept as the start of the statement.
static OPENING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^```[ \t]*(?:(?i:sql|sqlite3?|postgres(?:ql)?|pgsql|mysql|tsql|plsql)\b[ \t]*)?(?:\r?\n)?"
    )
    .expect("valid regex")
});

static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?[ \t]*```\s*$").expect("valid regex"));

static LEADING_SQL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^sql(\s+|$)").expect("valid regex"));

/// A single SQL statement produced by the translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedStatement(String);

impl TranslatedStatement {
    /// Wrap statement text without translation
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TranslatedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converts questions into SQL using an injected language model.
#[derive(Clone)]
pub struct QueryTranslator {
    model:   Arc<dyn LanguageModel>,
    timeout: Duration
}

impl QueryTranslator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::with_timeout(model, DEFAULT_GENERATION_TIMEOUT)
    }

    pub fn with_timeout(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model,
            timeout
        }
    }

    /// Translate `question` into one SQL statement for `schema`.
    ///
    /// # Errors
    ///
    /// - [`QueryError::NotConfigured`] when the model has no credentials
    /// - [`QueryError::Translation`] when the model fails, times out, returns
    ///   nothing usable, or returns several statements
    pub async fn translate(
        &self,
        schema: &Schema,
        question: &str
    ) -> Result<TranslatedStatement, QueryError> {
        let prompt = build_prompt(schema, question);
        let raw = tokio::time::timeout(self.timeout, self.model.generate(&prompt))
            .await
            .map_err(|_| {
                QueryError::Translation(format!(
                    "language model did not respond within {}s",
                    self.timeout.as_secs_f32()
                ))
            })??;
        let sql = clean_sql(&raw);
        if sql.is_empty() {
            return Err(QueryError::Translation(
                "language model returned an empty response".into()
            ));
        }
        ensure_single_statement(&sql)?;
        debug!(%question, %sql, "question translated");
        Ok(TranslatedStatement(sql))
    }
}

/// Prompt sent to the language model
pub fn build_prompt(schema: &Schema, question: &str) -> String {
    format!(
        "Based on the following database schema:\n\
         ---\n\
         {schema}\n\
         ---\n\
         Convert the following natural language query into a single, valid SQL query.\n\
         Only return the SQL query and nothing else.\n\n\
         Natural language query: \"{question}\"\n",
        schema = schema.as_str().trim(),
        question = question
    )
}

/// Strip markdown fences, stray backticks and a leading `sql` tag
pub fn clean_sql(raw: &str) -> String {
    let text = raw.trim();
    let text = OPENING_FENCE.replace(text, "");
    let text = CLOSING_FENCE.replace(&text, "");
    let text = text.replace('`', "");
    let text = text.trim();
    LEADING_SQL_TAG.replace(text, "").trim().to_string()
}

/// Reject output that parses as more than one statement.
///
/// Output the parser cannot handle is passed through; SQLite reports any
/// real syntax error when the statement runs.
fn ensure_single_statement(sql: &str) -> Result<(), QueryError> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) if statements.len() > 1 => Err(QueryError::Translation(format!(
            "expected exactly one SQL statement, got {}",
            statements.len()
        ))),
        Ok(statements) if statements.is_empty() => Err(QueryError::Translation(
            "language model response contained no SQL statement".into()
        )),
        Ok(_) => Ok(()),
        Err(e) => {
            debug!(error = %e, "generated SQL not understood by parser, passing through");
            Ok(())
        }
    }
}
