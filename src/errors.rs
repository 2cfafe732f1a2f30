use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NoData(String),

    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("statement parse failed: {0}")]
    Statement(String),

    #[error("unsupported bank statement: none of the supported banks ({0}) appear in the text")]
    UnsupportedBank(String),

    #[error("spreadsheet read failed: {0}")]
    Spreadsheet(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Stable code reported by the query adapter and the CLI.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND_ERROR",
            Self::NoData(_) => "NO_DATA_ERROR",
            Self::Database { .. } | Self::Io { .. } | Self::Serialization(_) => "STORAGE_ERROR",
            Self::Statement(_) | Self::Spreadsheet(_) => "STATEMENT_ERROR",
            Self::UnsupportedBank(_) => "UNSUPPORTED_BANK_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Export(_) => "EXPORT_ERROR",
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<csv::Error> for LedgerError {
    fn from(e: csv::Error) -> Self {
        Self::Serialization(format!("csv: {e}"))
    }
}

pub(crate) trait DbContext<T> {
    fn db_context(self, context: &str) -> LedgerResult<T>;
}

impl<T> DbContext<T> for Result<T, rusqlite::Error> {
    fn db_context(self, context: &str) -> LedgerResult<T> {
        self.map_err(|source| LedgerError::Database {
            context: context.to_string(),
            source,
        })
    }
}

pub(crate) trait IoContext<T> {
    fn io_context(self, context: &str) -> LedgerResult<T>;
}

impl<T> IoContext<T> for Result<T, std::io::Error> {
    fn io_context(self, context: &str) -> LedgerResult<T> {
        self.map_err(|source| LedgerError::Io {
            context: context.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_context_keeps_message_and_category() {
        let raw: Result<(), rusqlite::Error> = Err(rusqlite::Error::QueryReturnedNoRows);
        let err = raw.db_context("load account").expect_err("should fail");
        assert_eq!(err.category(), "STORAGE_ERROR");
        assert!(err.to_string().starts_with("load account: "));
    }

    #[test]
    fn validation_errors_render_plain_message() {
        let err = LedgerError::validation("description is required");
        assert_eq!(err.to_string(), "description is required");
        assert_eq!(err.category(), "VALIDATION_ERROR");
    }
}
