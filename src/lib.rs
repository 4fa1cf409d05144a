//! Concurso Core - exam engine for public-competition study
//!
//! Assembles random exams per board and subject, scores attempts, keeps the
//! attempt history and mines wrong answers for recurring trap patterns.
//! Storage is SQLite; an optional Python module exposes the same operations.

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod exam;
pub mod history;
pub mod import;
pub mod questions;
pub mod scoring;
pub mod telemetry;

#[cfg(feature = "python")]
mod python;

pub use analysis::{
    analyze, failed_questions, PatternCount, PatternReport, PatternSource, TRAP_KEYWORDS,
};
pub use catalog::{
    AnswerFormat, Board, Competition, CompetitionTag, OwnerId, Subject, GENERAL_COMPETITION,
};
pub use config::Config;
pub use db::{open_database, open_in_memory};
pub use error::{AttemptId, CoreError, CoreResult, ErrorKind, QuestionId};
pub use exam::{assemble, load_exam, AssembleRequest, Exam, ExamQuestion};
pub use history::{
    delete_attempt, export_attempts, list_attempts, owner_stats, AttemptSummary, ExportRecord,
};
pub use import::{import_csv, import_file, ImportReport};
pub use questions::{add_question, find_questions, get_question, NewQuestion, Question};
pub use scoring::{finalize, AnswerSheet, AttemptOutcome};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Concurso Core Python Module
#[cfg(feature = "python")]
#[pymodule]
fn concurso_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Setup
    m.add_function(wrap_pyfunction!(python::py_init_database, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_list_competitions, m)?)?;

    // Question store
    m.add_function(wrap_pyfunction!(python::py_add_question, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_import_questions, m)?)?;

    // Exams and scoring
    m.add_function(wrap_pyfunction!(python::py_assemble_exam, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_load_exam, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_finalize_attempt, m)?)?;

    // History and analysis
    m.add_function(wrap_pyfunction!(python::py_list_attempts, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_delete_attempt, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_export_attempts_csv, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_analyze_patterns, m)?)?;

    m.add_class::<python::PyExam>()?;
    m.add_class::<python::PyExamQuestion>()?;
    m.add_class::<python::PyAttemptResult>()?;
    m.add_class::<python::PyAttempt>()?;
    m.add_class::<python::PyPatternCount>()?;
    m.add_class::<python::PyCompetition>()?;

    Ok(())
}
