//! Attempt history: listing, deletion, export and per-candidate statistics.

use std::io::Write;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{Board, OwnerId};
use crate::error::{AttemptId, CoreError, CoreResult};

/// One attempt as listed in the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub id: AttemptId,
    pub created_at: DateTime<Utc>,
    pub competition: Option<String>,
    pub board: Board,
    pub subject: String,
    pub question_count: usize,
    /// `None` while the attempt is still open.
    pub score: Option<f64>,
}

const SUMMARY_COLUMNS: &str = "id, created_at, competition, board, subject, question_count, score";

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<AttemptSummary> {
    Ok(AttemptSummary {
        id: row.get(0)?,
        created_at: row.get(1)?,
        competition: row.get(2)?,
        board: row.get(3)?,
        subject: row.get(4)?,
        question_count: row.get::<_, i64>(5)?.max(0) as usize,
        score: row.get(6)?,
    })
}

/// Attempts of `owner`, newest first.
pub fn list_attempts(conn: &Connection, owner: &OwnerId) -> CoreResult<Vec<AttemptSummary>> {
    let query = format!(
        "SELECT {SUMMARY_COLUMNS} FROM attempts WHERE owner_id = ?1
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params![owner.as_str()], summary_from_row)?;
    let attempts: Vec<AttemptSummary> = rows.collect::<Result<_, _>>()?;
    debug!(%owner, count = attempts.len(), "attempts listed");
    Ok(attempts)
}

/// Delete an attempt together with its drawn questions and answers.
///
/// Returns `false` when the attempt does not exist; deleting twice is not an
/// error. Fails with [`CoreError::NotOwner`] when it belongs to someone else.
pub fn delete_attempt(
    conn: &mut Connection,
    attempt_id: AttemptId,
    owner: &OwnerId,
) -> CoreResult<bool> {
    let tx = conn.transaction()?;
    let stored_owner: Option<String> = tx
        .query_row(
            "SELECT owner_id FROM attempts WHERE id = ?1",
            params![attempt_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(stored_owner) = stored_owner else {
        debug!(attempt_id, "delete of unknown attempt ignored");
        return Ok(false);
    };
    if stored_owner != owner.as_str() {
        return Err(CoreError::NotOwner(attempt_id));
    }

    let answers = tx.execute("DELETE FROM answers WHERE attempt_id = ?1", params![attempt_id])?;
    tx.execute("DELETE FROM exam_questions WHERE attempt_id = ?1", params![attempt_id])?;
    tx.execute("DELETE FROM attempts WHERE id = ?1", params![attempt_id])?;
    tx.commit()?;

    info!(attempt_id, %owner, answers, "attempt deleted");
    Ok(true)
}

/// Flattened attempt, ready for a tabular export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    pub date: String,
    pub competition: String,
    pub board: String,
    pub subject: String,
    /// Percentage such as `66.67%`, empty while the attempt is open.
    pub score: String,
}

impl From<&AttemptSummary> for ExportRecord {
    fn from(summary: &AttemptSummary) -> Self {
        ExportRecord {
            date: summary.created_at.format("%Y-%m-%d %H:%M").to_string(),
            competition: summary.competition.clone().unwrap_or_default(),
            board: summary.board.to_string(),
            subject: summary.subject.clone(),
            score: summary
                .score
                .map(|s| format!("{s:.2}%"))
                .unwrap_or_default(),
        }
    }
}

const EXPORT_PAGE_SIZE: usize = 64;

/// Read-only view over an owner's attempts for export.
///
/// Each call to [`AttemptExport::iter`] starts a fresh pass that loads
/// attempts page by page, newest first.
#[derive(Debug, Clone, Copy)]
pub struct AttemptExport<'c> {
    conn: &'c Connection,
    owner: &'c OwnerId,
}

pub fn export_attempts<'c>(conn: &'c Connection, owner: &'c OwnerId) -> AttemptExport<'c> {
    AttemptExport { conn, owner }
}

impl<'c> AttemptExport<'c> {
    pub fn iter(&self) -> ExportIter<'c> {
        ExportIter {
            conn: self.conn,
            owner: self.owner,
            cursor: None,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Write the export as CSV with a header row. Returns the number of records.
    pub fn write_csv<W: Write>(&self, writer: W) -> CoreResult<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut written = 0;
        for record in self.iter() {
            csv_writer.serialize(record?)?;
            written += 1;
        }
        if written == 0 {
            csv_writer.write_record(["date", "competition", "board", "subject", "score"])?;
        }
        csv_writer.flush()?;
        Ok(written)
    }
}

impl<'c> IntoIterator for &AttemptExport<'c> {
    type Item = CoreResult<ExportRecord>;
    type IntoIter = ExportIter<'c>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy pass over an export; keyset-paginated on `(created_at, id)`.
pub struct ExportIter<'c> {
    conn: &'c Connection,
    owner: &'c OwnerId,
    cursor: Option<(DateTime<Utc>, AttemptId)>,
    /// Next page, reversed so `pop` yields the newest first.
    buffer: Vec<AttemptSummary>,
    done: bool,
}

impl ExportIter<'_> {
    fn fetch_page(&mut self) -> CoreResult<()> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM attempts
             WHERE owner_id = ?1
               AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND id < ?3))
             ORDER BY created_at DESC, id DESC
             LIMIT ?4"
        );
        let (after_time, after_id) = match self.cursor {
            Some((time, id)) => (Some(time), Some(id)),
            None => (None, None),
        };
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(
            params![self.owner.as_str(), after_time, after_id, EXPORT_PAGE_SIZE as i64],
            summary_from_row,
        )?;
        let page: Vec<AttemptSummary> = rows.collect::<Result<_, _>>()?;

        if page.len() < EXPORT_PAGE_SIZE {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some((last.created_at, last.id));
        }
        self.buffer = page;
        self.buffer.reverse();
        Ok(())
    }
}

impl Iterator for ExportIter<'_> {
    type Item = CoreResult<ExportRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop().map(|summary| Ok(ExportRecord::from(&summary)))
    }
}

/// Aggregate numbers over an owner's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttemptStats {
    pub total_attempts: usize,
    pub finalized_attempts: usize,
    pub average_score: Option<f64>,
    pub best_score: Option<f64>,
}

pub fn owner_stats(conn: &Connection, owner: &OwnerId) -> CoreResult<AttemptStats> {
    let stats = conn.query_row(
        "SELECT COUNT(*), COUNT(score), AVG(score), MAX(score) FROM attempts WHERE owner_id = ?1",
        params![owner.as_str()],
        |row| {
            Ok(AttemptStats {
                total_attempts: row.get::<_, i64>(0)? as usize,
                finalized_attempts: row.get::<_, i64>(1)? as usize,
                average_score: row
                    .get::<_, Option<f64>>(2)?
                    .map(|avg| (avg * 100.0).round() / 100.0),
                best_score: row.get(3)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AnswerFormat, CompetitionTag, Subject};
    use crate::db::open_in_memory;
    use crate::exam::{assemble, AssembleRequest};
    use crate::questions::{add_question, NewQuestion};
    use crate::scoring::{finalize, AnswerSheet};

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name).unwrap()
    }

    fn prepared() -> Connection {
        let mut conn = open_in_memory().unwrap();
        let math = Subject::new("Math").unwrap();
        for i in 0..4 {
            let body = format!("Q{i}");
            let q = NewQuestion::new(Board::Cespe, math.clone(), body, AnswerFormat::Binary, "C");
            add_question(&mut conn, &q).unwrap();
        }
        conn
    }

    fn open_attempt(conn: &mut Connection, who: &OwnerId) -> AttemptId {
        let request = AssembleRequest::new(who.clone(), Board::Cespe, Subject::new("Math").unwrap())
            .with_competition(CompetitionTag::new("INSS").unwrap())
            .with_size(2);
        assemble(conn, &request).unwrap().attempt_id
    }

    fn finish_all_correct(conn: &mut Connection, attempt_id: AttemptId) {
        let exam = crate::exam::load_exam(conn, attempt_id).unwrap();
        let mut sheet = AnswerSheet::new(attempt_id);
        for q in &exam.questions {
            sheet.record(conn, q.id, "C").unwrap();
        }
        finalize(conn, &sheet).unwrap();
    }

    fn count(conn: &Connection, table: &str, attempt_id: AttemptId) -> i64 {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE attempt_id = ?1"),
            params![attempt_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn list_is_newest_first_and_scoped_to_owner() {
        let mut conn = prepared();
        let ana = owner("ana");
        let first = open_attempt(&mut conn, &ana);
        let second = open_attempt(&mut conn, &ana);
        open_attempt(&mut conn, &owner("bia"));
        finish_all_correct(&mut conn, first);

        let listed = list_attempts(&conn, &ana).unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(listed[0].score, None);
        assert_eq!(listed[1].score, Some(100.0));
        assert_eq!(listed[1].competition.as_deref(), Some("INSS"));
    }

    #[test]
    fn delete_cascades_and_is_idempotent() {
        let mut conn = prepared();
        let ana = owner("ana");
        let attempt = open_attempt(&mut conn, &ana);
        finish_all_correct(&mut conn, attempt);
        assert_eq!(count(&conn, "answers", attempt), 2);

        assert!(delete_attempt(&mut conn, attempt, &ana).unwrap());
        assert_eq!(count(&conn, "answers", attempt), 0);
        assert_eq!(count(&conn, "exam_questions", attempt), 0);
        assert!(list_attempts(&conn, &ana).unwrap().is_empty());
        assert!(!delete_attempt(&mut conn, attempt, &ana).unwrap());

        let questions: i64 = conn
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(questions, 4);
    }

    #[test]
    fn delete_by_other_owner_is_refused() {
        let mut conn = prepared();
        let ana = owner("ana");
        let attempt = open_attempt(&mut conn, &ana);
        assert!(matches!(
            delete_attempt(&mut conn, attempt, &owner("bia")),
            Err(CoreError::NotOwner(id)) if id == attempt
        ));
        assert_eq!(list_attempts(&conn, &ana).unwrap().len(), 1);
    }

    #[test]
    fn export_is_restartable_and_renders_scores() {
        let mut conn = prepared();
        let ana = owner("ana");
        let done = open_attempt(&mut conn, &ana);
        finish_all_correct(&mut conn, done);
        open_attempt(&mut conn, &ana);

        let export = export_attempts(&conn, &ana);
        let first: Vec<ExportRecord> = export.iter().collect::<CoreResult<_>>().unwrap();
        let second: Vec<ExportRecord> = (&export).into_iter().collect::<CoreResult<_>>().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].score, "");
        assert_eq!(first[1].score, "100.00%");
        assert_eq!(first[1].board, "CESPE");
    }

    #[test]
    fn export_pages_through_large_histories() {
        let mut conn = prepared();
        let ana = owner("ana");
        let total = EXPORT_PAGE_SIZE * 2 + 5;
        for _ in 0..total {
            open_attempt(&mut conn, &ana);
        }
        assert_eq!(export_attempts(&conn, &ana).iter().count(), total);
    }

    #[test]
    fn csv_export_has_the_expected_columns() {
        let mut conn = prepared();
        let ana = owner("ana");
        let attempt = open_attempt(&mut conn, &ana);
        finish_all_correct(&mut conn, attempt);

        let mut out = Vec::new();
        let written = export_attempts(&conn, &ana).write_csv(&mut out).unwrap();
        assert_eq!(written, 1);
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("date,competition,board,subject,score"));
        assert!(lines.next().unwrap().ends_with(",INSS,CESPE,Math,100.00%"));

        let mut empty = Vec::new();
        export_attempts(&conn, &owner("nobody")).write_csv(&mut empty).unwrap();
        assert_eq!(String::from_utf8(empty).unwrap(), "date,competition,board,subject,score\n");
    }

    #[test]
    fn stats_summarize_finalized_attempts() {
        let mut conn = prepared();
        let ana = owner("ana");
        let a = open_attempt(&mut conn, &ana);
        finish_all_correct(&mut conn, a);
        open_attempt(&mut conn, &ana);

        let stats = owner_stats(&conn, &ana).unwrap();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.finalized_attempts, 1);
        assert_eq!(stats.average_score, Some(100.0));
        assert_eq!(stats.best_score, Some(100.0));

        let nobody = owner_stats(&conn, &owner("nobody")).unwrap();
        assert_eq!(nobody.total_attempts, 0);
        assert_eq!(nobody.average_score, None);
    }
}
