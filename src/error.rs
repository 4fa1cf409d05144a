//! Error types for the exam core.
//!
//! Every fallible operation returns [`CoreResult`]. Callers use
//! [`CoreError::kind`] to tell caller-side mistakes apart from persistence
//! failures, which are the only ones worth retrying.

use thiserror::Error;

use crate::catalog::{AnswerFormat, Board};

pub type QuestionId = i64;
pub type AttemptId = i64;

/// Errors produced by the question store, exam assembly, scoring and history.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Another question already has the exact same body text.
    #[error("a question with the same body already exists")]
    DuplicateQuestion,

    /// The answer key is outside the valid set for the question format.
    #[error("answer key {key:?} is not valid for {format} questions")]
    InvalidAnswerKey { format: AnswerFormat, key: String },

    /// A submitted answer could not be read as a symbol of the question format.
    #[error("answer {symbol:?} is not valid for {format} questions")]
    InvalidAnswerSymbol { format: AnswerFormat, symbol: String },

    #[error("no questions available for {board} / {subject}")]
    NoQuestionsAvailable { board: Board, subject: String },

    #[error("exam size must be at least 1")]
    InvalidExamSize,

    #[error("unknown board: {0}")]
    UnknownBoard(String),

    #[error("unknown answer format: {0}")]
    UnknownFormat(String),

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("attempt {0} is already finalized")]
    AlreadyFinalized(AttemptId),

    #[error("attempt {0} belongs to another candidate")]
    NotOwner(AttemptId),

    #[error("attempt {0} not found")]
    AttemptNotFound(AttemptId),

    #[error("question {0} not found")]
    QuestionNotFound(QuestionId),

    #[error("question {question} is not part of attempt {attempt}")]
    QuestionNotInExam {
        attempt: AttemptId,
        question: QuestionId,
    },

    /// Finalize was called before any answer was recorded.
    #[error("attempt {0} has no recorded answers")]
    NoAnswers(AttemptId),

    #[error("unsupported import format: .{0}")]
    UnsupportedFormat(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; the caller must change it before trying again.
    Validation,
    /// Protocol violation such as finalizing twice or deleting someone else's attempt.
    State,
    /// The store failed; nothing was committed, so a retry is safe.
    Persistence,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::DuplicateQuestion
            | CoreError::InvalidAnswerKey { .. }
            | CoreError::InvalidAnswerSymbol { .. }
            | CoreError::NoQuestionsAvailable { .. }
            | CoreError::InvalidExamSize
            | CoreError::UnknownBoard(_)
            | CoreError::UnknownFormat(_)
            | CoreError::Validation { .. }
            | CoreError::UnsupportedFormat(_)
            | CoreError::Config(_) => ErrorKind::Validation,
            // A malformed file stays malformed; only a failed read is worth retrying.
            CoreError::Csv(e) if !matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                ErrorKind::Validation
            }
            CoreError::Spreadsheet(e) if !matches!(e, calamine::Error::Io(_)) => {
                ErrorKind::Validation
            }
            CoreError::AlreadyFinalized(_)
            | CoreError::NotOwner(_)
            | CoreError::AttemptNotFound(_)
            | CoreError::QuestionNotFound(_)
            | CoreError::QuestionNotInExam { .. }
            | CoreError::NoAnswers(_) => ErrorKind::State,
            CoreError::Database(_)
            | CoreError::Csv(_)
            | CoreError::Spreadsheet(_)
            | CoreError::Io(_) => ErrorKind::Persistence,
        }
    }

    /// Returns `true` if the failed operation can be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Persistence
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_errors_are_not_retryable() {
        assert_eq!(CoreError::AlreadyFinalized(3).kind(), ErrorKind::State);
        assert!(!CoreError::NotOwner(3).is_retryable());
    }

    #[test]
    fn database_errors_are_retryable() {
        let err = CoreError::from(rusqlite::Error::InvalidQuery);
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.is_retryable());
    }

    #[test]
    fn display_names_the_offending_key() {
        let err = CoreError::InvalidAnswerKey {
            format: AnswerFormat::Binary,
            key: "A".into(),
        };
        assert_eq!(err.to_string(), "answer key \"A\" is not valid for binary questions");
    }

    #[test]
    fn malformed_files_are_validation_errors() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader("a,b\nc\n".as_bytes());
        let err = reader.records().find_map(Result::err).unwrap();
        let err = CoreError::from(err);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err = CoreError::from(calamine::Error::Msg("not a workbook"));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "read cut short");
        assert!(CoreError::from(calamine::Error::Io(io)).is_retryable());
    }
}
