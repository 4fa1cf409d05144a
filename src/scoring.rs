//! Attempt scoring: collect answers, then finalize them in one transaction.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::AnswerFormat;
use crate::error::{AttemptId, CoreError, CoreResult, QuestionId};

/// Answer waiting to be written at finalize time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingAnswer {
    pub question_id: QuestionId,
    pub submitted: char,
    pub is_correct: bool,
}

/// Answers a candidate has given so far for one attempt.
///
/// Keyed by question, so answering the same question again replaces the
/// earlier answer and at most one answer per question is ever written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSheet {
    attempt_id: AttemptId,
    answers: BTreeMap<QuestionId, PendingAnswer>,
}

/// Final result of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub attempt_id: AttemptId,
    pub correct: usize,
    pub total: usize,
    pub score: f64,
}

impl AnswerSheet {
    pub fn new(attempt_id: AttemptId) -> Self {
        Self {
            attempt_id,
            answers: BTreeMap::new(),
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Record the candidate's answer to one exam question and return whether
    /// it matches the key.
    pub fn record(
        &mut self,
        conn: &Connection,
        question_id: QuestionId,
        submitted: &str,
    ) -> CoreResult<bool> {
        let attempt_score: Option<Option<f64>> = conn
            .query_row(
                "SELECT score FROM attempts WHERE id = ?1",
                params![self.attempt_id],
                |row| row.get(0),
            )
            .optional()?;
        match attempt_score {
            None => return Err(CoreError::AttemptNotFound(self.attempt_id)),
            Some(Some(_)) => return Err(CoreError::AlreadyFinalized(self.attempt_id)),
            Some(None) => {}
        }

        let key: Option<(AnswerFormat, String)> = conn
            .query_row(
                "SELECT q.format, q.answer_key
                 FROM exam_questions e JOIN questions q ON q.id = e.question_id
                 WHERE e.attempt_id = ?1 AND e.question_id = ?2",
                params![self.attempt_id, question_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (format, answer_key) = key.ok_or(CoreError::QuestionNotInExam {
            attempt: self.attempt_id,
            question: question_id,
        })?;

        let symbol = format
            .parse_symbol(submitted)
            .ok_or_else(|| CoreError::InvalidAnswerSymbol {
                format,
                symbol: submitted.to_string(),
            })?;
        let is_correct = answer_key.starts_with(symbol);

        self.answers.insert(
            question_id,
            PendingAnswer {
                question_id,
                submitted: symbol,
                is_correct,
            },
        );
        debug!(attempt_id = self.attempt_id, question_id, is_correct, "answer recorded");
        Ok(is_correct)
    }

    pub fn answers(&self) -> impl Iterator<Item = &PendingAnswer> {
        self.answers.values()
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn correct_count(&self) -> usize {
        self.answers.values().filter(|a| a.is_correct).count()
    }
}

/// Percentage of correct answers over the exam size, rounded to two decimals.
pub fn compute_score(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * correct as f64 / total as f64;
    (raw * 100.0).round() / 100.0
}

/// Write every recorded answer and set the attempt score, all or nothing.
///
/// The denominator is the number of questions drawn for the exam, so
/// unanswered questions count as wrong. Calling this on an attempt that
/// already has a score fails with [`CoreError::AlreadyFinalized`] and leaves
/// the stored score untouched. The sheet is not consumed, so a failed
/// finalize can be retried.
pub fn finalize(conn: &mut Connection, sheet: &AnswerSheet) -> CoreResult<AttemptOutcome> {
    let attempt_id = sheet.attempt_id;
    let tx = conn.transaction()?;

    let row: Option<(Option<f64>, i64)> = tx
        .query_row(
            "SELECT score, question_count FROM attempts WHERE id = ?1",
            params![attempt_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (score, question_count) = row.ok_or(CoreError::AttemptNotFound(attempt_id))?;
    if score.is_some() {
        return Err(CoreError::AlreadyFinalized(attempt_id));
    }
    if sheet.is_empty() {
        return Err(CoreError::NoAnswers(attempt_id));
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO answers (attempt_id, question_id, submitted, is_correct)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for answer in sheet.answers() {
            insert.execute(params![
                attempt_id,
                answer.question_id,
                answer.submitted.to_string(),
                answer.is_correct,
            ])?;
        }
    }

    let total = question_count.max(0) as usize;
    let correct = sheet.correct_count();
    let score = compute_score(correct, total);
    let updated = tx.execute(
        "UPDATE attempts SET score = ?1, finalized_at = ?2 WHERE id = ?3 AND score IS NULL",
        params![score, Utc::now(), attempt_id],
    )?;
    if updated == 0 {
        return Err(CoreError::AlreadyFinalized(attempt_id));
    }
    tx.commit()?;

    info!(attempt_id, correct, total, score, "attempt finalized");
    Ok(AttemptOutcome {
        attempt_id,
        correct,
        total,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Board, OwnerId, Subject};
    use crate::db::open_in_memory;
    use crate::exam::{assemble, AssembleRequest, Exam};
    use crate::questions::{add_question, get_question, NewQuestion};

    fn setup(n: usize) -> (Connection, Exam) {
        let mut conn = open_in_memory().unwrap();
        let math = Subject::new("Math").unwrap();
        for i in 0..n {
            let q = if i % 2 == 0 {
                let body = format!("Binary {i}");
                NewQuestion::new(Board::Cespe, math.clone(), body, AnswerFormat::Binary, "C")
            } else {
                let body = format!("Choice {i}");
                NewQuestion::new(Board::Cespe, math.clone(), body, AnswerFormat::Choice, "B")
            };
            add_question(&mut conn, &q).unwrap();
        }
        let request = AssembleRequest::new(OwnerId::new("ana").unwrap(), Board::Cespe, math)
            .with_size(n)
            .with_seed(3);
        let exam = assemble(&mut conn, &request).unwrap();
        (conn, exam)
    }

    fn key_of(conn: &Connection, id: QuestionId) -> char {
        get_question(conn, id).unwrap().unwrap().answer_key
    }

    fn answer_count(conn: &Connection, attempt_id: AttemptId) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM answers WHERE attempt_id = ?1",
            params![attempt_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn score_rounds_to_two_decimals() {
        assert_eq!(compute_score(2, 3), 66.67);
        assert_eq!(compute_score(1, 3), 33.33);
        assert_eq!(compute_score(4, 4), 100.0);
        assert_eq!(compute_score(0, 0), 0.0);
    }

    #[test]
    fn record_compares_against_the_key() {
        let (conn, exam) = setup(2);
        let mut sheet = AnswerSheet::new(exam.attempt_id);
        for q in &exam.questions {
            let key = key_of(&conn, q.id);
            assert!(sheet.record(&conn, q.id, &key.to_lowercase().to_string()).unwrap());
        }
        assert_eq!(sheet.correct_count(), 2);
    }

    #[test]
    fn re_recording_replaces_the_previous_answer() {
        let (conn, exam) = setup(1);
        let q = &exam.questions[0];
        let mut sheet = AnswerSheet::new(exam.attempt_id);
        assert!(!sheet.record(&conn, q.id, "E").unwrap());
        assert!(sheet.record(&conn, q.id, "certo").unwrap());
        assert_eq!(sheet.len(), 1);
        assert_eq!(sheet.correct_count(), 1);
    }

    #[test]
    fn record_rejects_foreign_questions_and_bad_symbols() {
        let (mut conn, exam) = setup(1);
        let math = Subject::new("Math").unwrap();
        let stray = NewQuestion::new(Board::Fgv, math, "Stray", AnswerFormat::Choice, "A");
        let stray = add_question(&mut conn, &stray).unwrap();
        let mut sheet = AnswerSheet::new(exam.attempt_id);
        assert!(matches!(
            sheet.record(&conn, stray, "A"),
            Err(CoreError::QuestionNotInExam { .. })
        ));
        assert!(matches!(
            sheet.record(&conn, exam.questions[0].id, "A"),
            Err(CoreError::InvalidAnswerSymbol { format: AnswerFormat::Binary, .. })
        ));
        assert!(sheet.is_empty());
    }

    #[test]
    fn unanswered_questions_count_as_wrong() {
        let (mut conn, exam) = setup(4);
        let first = &exam.questions[0];
        let mut sheet = AnswerSheet::new(exam.attempt_id);
        let key = key_of(&conn, first.id).to_string();
        sheet.record(&conn, first.id, &key).unwrap();

        let outcome = finalize(&mut conn, &sheet).unwrap();
        assert_eq!(outcome.correct, 1);
        assert_eq!(outcome.total, 4);
        assert_eq!(outcome.score, 25.0);
        assert_eq!(answer_count(&conn, exam.attempt_id), 1);
    }

    #[test]
    fn finalize_twice_keeps_the_first_score() {
        let (mut conn, exam) = setup(2);
        let mut sheet = AnswerSheet::new(exam.attempt_id);
        for q in &exam.questions {
            let key = key_of(&conn, q.id).to_string();
            sheet.record(&conn, q.id, &key).unwrap();
        }
        assert_eq!(finalize(&mut conn, &sheet).unwrap().score, 100.0);

        assert!(matches!(
            finalize(&mut conn, &sheet),
            Err(CoreError::AlreadyFinalized(id)) if id == exam.attempt_id
        ));
        let stored: f64 = conn
            .query_row(
                "SELECT score FROM attempts WHERE id = ?1",
                params![exam.attempt_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, 100.0);
        assert_eq!(answer_count(&conn, exam.attempt_id), 2);

        assert!(matches!(
            sheet.clone().record(&conn, exam.questions[0].id, "C"),
            Err(CoreError::AlreadyFinalized(_))
        ));
    }

    #[test]
    fn empty_sheet_cannot_be_finalized() {
        let (mut conn, exam) = setup(2);
        let sheet = AnswerSheet::new(exam.attempt_id);
        assert!(matches!(finalize(&mut conn, &sheet), Err(CoreError::NoAnswers(_))));
    }

    #[test]
    fn failed_finalize_leaves_attempt_open() {
        let (mut conn, exam) = setup(2);
        let mut sheet = AnswerSheet::new(exam.attempt_id);
        for q in &exam.questions {
            sheet.record(&conn, q.id, "C").unwrap();
        }
        let recorded = sheet.len();
        assert!(recorded > 0);

        // A conflicting row makes the batch insert fail midway.
        let last = sheet.answers().last().unwrap().question_id;
        conn.execute(
            "INSERT INTO answers (attempt_id, question_id, submitted, is_correct)
             VALUES (?1, ?2, 'C', 0)",
            params![exam.attempt_id, last],
        )
        .unwrap();
        assert!(matches!(finalize(&mut conn, &sheet), Err(CoreError::Database(_))));
        assert_eq!(answer_count(&conn, exam.attempt_id), 1);

        conn.execute("DELETE FROM answers WHERE attempt_id = ?1", params![exam.attempt_id])
            .unwrap();
        let outcome = finalize(&mut conn, &sheet).unwrap();
        assert_eq!(answer_count(&conn, exam.attempt_id), recorded as i64);
        assert_eq!(outcome.total, 2);
    }

    #[test]
    fn unknown_attempt_is_reported() {
        let (mut conn, _) = setup(1);
        let sheet = AnswerSheet::new(404);
        assert!(matches!(finalize(&mut conn, &sheet), Err(CoreError::AttemptNotFound(404))));
        let mut sheet = AnswerSheet::new(404);
        assert!(matches!(sheet.record(&conn, 1, "C"), Err(CoreError::AttemptNotFound(404))));
    }
}
