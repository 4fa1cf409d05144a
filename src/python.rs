//! Python bindings, built with the `python` feature.
//!
//! Every function takes the database path and opens its own connection, so
//! the UI layer never holds Rust state between calls.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::analysis::analyze;
use crate::catalog::{list_competitions, seed_catalog, Board, CompetitionTag, OwnerId, Subject};
use crate::config::Config;
use crate::db::open_database;
use crate::error::{CoreError, ErrorKind};
use crate::exam::{assemble, load_exam, AssembleRequest, Exam};
use crate::history::{delete_attempt, export_attempts, list_attempts};
use crate::import::import_file;
use crate::questions::{add_question, seed_sample_questions, NewQuestion};
use crate::scoring::{finalize, AnswerSheet};
use crate::telemetry::init_tracing;

impl From<CoreError> for PyErr {
    fn from(err: CoreError) -> Self {
        match err.kind() {
            ErrorKind::Validation => PyValueError::new_err(err.to_string()),
            ErrorKind::State | ErrorKind::Persistence => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

#[pyclass(name = "ExamQuestion")]
#[derive(Debug, Clone)]
pub struct PyExamQuestion {
    #[pyo3(get)]
    pub id: i64,
    #[pyo3(get)]
    pub position: usize,
    #[pyo3(get)]
    pub body: String,
    #[pyo3(get)]
    pub format: String,
    #[pyo3(get)]
    pub year: Option<u16>,
    #[pyo3(get)]
    pub competition: Option<String>,
}

#[pyclass(name = "Exam")]
#[derive(Debug, Clone)]
pub struct PyExam {
    #[pyo3(get)]
    pub attempt_id: i64,
    #[pyo3(get)]
    pub board: String,
    #[pyo3(get)]
    pub subject: String,
    #[pyo3(get)]
    pub competition: Option<String>,
    #[pyo3(get)]
    pub questions: Vec<PyExamQuestion>,
}

#[pymethods]
impl PyExam {
    fn __repr__(&self) -> String {
        format!(
            "Exam(attempt_id={}, board='{}', subject='{}', questions={})",
            self.attempt_id,
            self.board,
            self.subject,
            self.questions.len()
        )
    }
}

impl From<Exam> for PyExam {
    fn from(exam: Exam) -> Self {
        PyExam {
            attempt_id: exam.attempt_id,
            board: exam.board.to_string(),
            subject: exam.subject,
            competition: exam.competition,
            questions: exam
                .questions
                .into_iter()
                .map(|q| PyExamQuestion {
                    id: q.id,
                    position: q.position,
                    body: q.body,
                    format: q.format.to_string(),
                    year: q.year,
                    competition: q.competition,
                })
                .collect(),
        }
    }
}

#[pyclass(name = "AttemptResult")]
#[derive(Debug, Clone)]
pub struct PyAttemptResult {
    #[pyo3(get)]
    pub attempt_id: i64,
    #[pyo3(get)]
    pub correct: usize,
    #[pyo3(get)]
    pub total: usize,
    #[pyo3(get)]
    pub score: f64,
}

#[pymethods]
impl PyAttemptResult {
    fn __repr__(&self) -> String {
        format!(
            "AttemptResult(correct={}, total={}, score={:.2}%)",
            self.correct, self.total, self.score
        )
    }
}

#[pyclass(name = "Attempt")]
#[derive(Debug, Clone)]
pub struct PyAttempt {
    #[pyo3(get)]
    pub id: i64,
    #[pyo3(get)]
    pub created_at: String,
    #[pyo3(get)]
    pub competition: Option<String>,
    #[pyo3(get)]
    pub board: String,
    #[pyo3(get)]
    pub subject: String,
    #[pyo3(get)]
    pub question_count: usize,
    #[pyo3(get)]
    pub score: Option<f64>,
}

#[pyclass(name = "PatternCount")]
#[derive(Debug, Clone)]
pub struct PyPatternCount {
    #[pyo3(get)]
    pub pattern: String,
    #[pyo3(get)]
    pub source: String,
    #[pyo3(get)]
    pub count: usize,
}

#[pyclass(name = "Competition")]
#[derive(Debug, Clone)]
pub struct PyCompetition {
    #[pyo3(get)]
    pub name: String,
    #[pyo3(get)]
    pub status: String,
    #[pyo3(get)]
    pub likely_board: String,
    #[pyo3(get)]
    pub vacancies: String,
    #[pyo3(get)]
    pub salary: String,
}

fn optional_competition(raw: Option<&str>) -> PyResult<Option<CompetitionTag>> {
    match raw.map(str::trim).filter(|c| !c.is_empty()) {
        Some(name) => Ok(Some(CompetitionTag::new(name)?)),
        None => Ok(None),
    }
}

#[pyfunction]
#[pyo3(name = "init_database")]
pub fn py_init_database(db_path: &str) -> PyResult<()> {
    let mut conn = open_database(db_path)?;
    seed_catalog(&conn)?;
    seed_sample_questions(&mut conn)?;
    Ok(())
}

#[pyfunction]
#[pyo3(name = "init_logging", signature = (filter=None))]
pub fn py_init_logging(filter: Option<&str>) -> PyResult<bool> {
    let filter = match filter {
        Some(f) => f.to_string(),
        None => Config::from_env()?.log_filter,
    };
    Ok(init_tracing(&filter))
}

#[pyfunction]
#[pyo3(
    name = "add_question",
    signature = (
        db_path, board, subject, body, format, answer_key,
        competition=None, year=None, trap=None
    )
)]
#[allow(clippy::too_many_arguments)]
pub fn py_add_question(
    db_path: &str,
    board: &str,
    subject: &str,
    body: &str,
    format: &str,
    answer_key: &str,
    competition: Option<&str>,
    year: Option<u16>,
    trap: Option<&str>,
) -> PyResult<i64> {
    let mut question = NewQuestion::new(
        board.parse::<Board>()?,
        Subject::new(subject)?,
        body,
        format.parse()?,
        answer_key,
    );
    question.competition = optional_competition(competition)?;
    question.year = year;
    question.trap_annotation = trap.map(str::to_string);

    let mut conn = open_database(db_path)?;
    Ok(add_question(&mut conn, &question)?)
}

/// Returns `(imported, skipped)`.
#[pyfunction]
#[pyo3(name = "import_questions")]
pub fn py_import_questions(file_path: &str, db_path: &str) -> PyResult<(usize, usize)> {
    let mut conn = open_database(db_path)?;
    let report = import_file(&mut conn, file_path)?;
    Ok((report.imported, report.skipped))
}

#[pyfunction]
#[pyo3(
    name = "assemble_exam",
    signature = (db_path, owner, board, subject, competition=None, size=None, seed=None)
)]
pub fn py_assemble_exam(
    db_path: &str,
    owner: &str,
    board: &str,
    subject: &str,
    competition: Option<&str>,
    size: Option<usize>,
    seed: Option<u64>,
) -> PyResult<PyExam> {
    let size = match size {
        Some(size) => size,
        None => Config::from_env()?.exam_size,
    };
    let mut request =
        AssembleRequest::new(OwnerId::new(owner)?, board.parse()?, Subject::new(subject)?)
            .with_size(size);
    request.competition = optional_competition(competition)?;
    request.seed = seed;

    let mut conn = open_database(db_path)?;
    Ok(assemble(&mut conn, &request)?.into())
}

#[pyfunction]
#[pyo3(name = "load_exam")]
pub fn py_load_exam(db_path: &str, attempt_id: i64) -> PyResult<PyExam> {
    let conn = open_database(db_path)?;
    Ok(load_exam(&conn, attempt_id)?.into())
}

/// `answers` is a list of `(question_id, symbol)` pairs.
#[pyfunction]
#[pyo3(name = "finalize_attempt")]
pub fn py_finalize_attempt(
    db_path: &str,
    attempt_id: i64,
    answers: Vec<(i64, String)>,
) -> PyResult<PyAttemptResult> {
    let mut conn = open_database(db_path)?;
    let mut sheet = AnswerSheet::new(attempt_id);
    for (question_id, symbol) in &answers {
        sheet.record(&conn, *question_id, symbol)?;
    }
    let outcome = finalize(&mut conn, &sheet)?;
    Ok(PyAttemptResult {
        attempt_id: outcome.attempt_id,
        correct: outcome.correct,
        total: outcome.total,
        score: outcome.score,
    })
}

#[pyfunction]
#[pyo3(name = "list_attempts")]
pub fn py_list_attempts(db_path: &str, owner: &str) -> PyResult<Vec<PyAttempt>> {
    let conn = open_database(db_path)?;
    let attempts = list_attempts(&conn, &OwnerId::new(owner)?)?;
    Ok(attempts
        .into_iter()
        .map(|a| PyAttempt {
            id: a.id,
            created_at: a.created_at.format("%Y-%m-%d %H:%M").to_string(),
            competition: a.competition,
            board: a.board.to_string(),
            subject: a.subject,
            question_count: a.question_count,
            score: a.score,
        })
        .collect())
}

#[pyfunction]
#[pyo3(name = "delete_attempt")]
pub fn py_delete_attempt(db_path: &str, attempt_id: i64, owner: &str) -> PyResult<bool> {
    let mut conn = open_database(db_path)?;
    Ok(delete_attempt(&mut conn, attempt_id, &OwnerId::new(owner)?)?)
}

#[pyfunction]
#[pyo3(name = "export_attempts_csv")]
pub fn py_export_attempts_csv(db_path: &str, owner: &str) -> PyResult<String> {
    let conn = open_database(db_path)?;
    let owner = OwnerId::new(owner)?;
    let mut out = Vec::new();
    export_attempts(&conn, &owner).write_csv(&mut out)?;
    String::from_utf8(out).map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

#[pyfunction]
#[pyo3(name = "analyze_patterns", signature = (db_path, owner, limit=None))]
pub fn py_analyze_patterns(
    db_path: &str,
    owner: &str,
    limit: Option<usize>,
) -> PyResult<Vec<PyPatternCount>> {
    let limit = match limit {
        Some(limit) => limit,
        None => Config::from_env()?.pattern_limit,
    };
    let conn = open_database(db_path)?;
    let report = analyze(&conn, &OwnerId::new(owner)?, limit)?;
    Ok(report
        .patterns
        .into_iter()
        .map(|p| PyPatternCount {
            pattern: p.pattern,
            source: format!("{:?}", p.source).to_lowercase(),
            count: p.count,
        })
        .collect())
}

#[pyfunction]
#[pyo3(name = "list_competitions")]
pub fn py_list_competitions(db_path: &str) -> PyResult<Vec<PyCompetition>> {
    let conn = open_database(db_path)?;
    Ok(list_competitions(&conn)?
        .into_iter()
        .map(|c| PyCompetition {
            name: c.name,
            status: c.status,
            likely_board: c.likely_board,
            vacancies: c.vacancies,
            salary: c.salary,
        })
        .collect())
}
