//! Question store: the shared, append-only question catalog.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{register_subject, AnswerFormat, Board, CompetitionTag, Subject};
use crate::error::{CoreError, CoreResult, QuestionId};

/// Stored question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub id: QuestionId,
    pub board: Board,
    pub subject: String,
    pub competition: Option<String>,
    pub year: Option<u16>,
    pub body: String,
    pub format: AnswerFormat,
    pub answer_key: char,
    pub trap_annotation: Option<String>,
}

/// Input for [`add_question`].
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub board: Board,
    pub subject: Subject,
    pub competition: Option<CompetitionTag>,
    pub year: Option<u16>,
    pub body: String,
    pub format: AnswerFormat,
    pub answer_key: String,
    pub trap_annotation: Option<String>,
}

impl NewQuestion {
    pub fn new(
        board: Board,
        subject: Subject,
        body: impl Into<String>,
        format: AnswerFormat,
        answer_key: impl Into<String>,
    ) -> Self {
        Self {
            board,
            subject,
            competition: None,
            year: None,
            body: body.into(),
            format,
            answer_key: answer_key.into(),
            trap_annotation: None,
        }
    }

    pub fn with_competition(mut self, competition: CompetitionTag) -> Self {
        self.competition = Some(competition);
        self
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_trap(mut self, annotation: impl Into<String>) -> Self {
        self.trap_annotation = Some(annotation.into());
        self
    }
}

const QUESTION_COLUMNS: &str =
    "id, board, subject, competition, year, body, format, answer_key, trap_annotation";

pub(crate) fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    let key: String = row.get(7)?;
    Ok(Question {
        id: row.get(0)?,
        board: row.get(1)?,
        subject: row.get(2)?,
        competition: row.get(3)?,
        year: row.get(4)?,
        body: row.get(5)?,
        format: row.get(6)?,
        answer_key: key.chars().next().unwrap_or_default(),
        trap_annotation: row.get(8)?,
    })
}

/// Add a question to the store.
///
/// Fails with [`CoreError::DuplicateQuestion`] when the body text already
/// exists and with [`CoreError::InvalidAnswerKey`] when the key does not fit
/// the format. Nothing is written on failure.
pub fn add_question(conn: &mut Connection, question: &NewQuestion) -> CoreResult<QuestionId> {
    // Stored verbatim, so uniqueness is an exact text match.
    let body = question.body.as_str();
    if body.trim().is_empty() {
        return Err(CoreError::validation("body", "must not be empty"));
    }
    let key = question.format.validate_key(&question.answer_key)?;
    let trap = question
        .trap_annotation
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let tx = conn.transaction()?;
    let exists: Option<i64> = tx
        .query_row("SELECT id FROM questions WHERE body = ?1", params![body], |row| {
            row.get(0)
        })
        .optional()?;
    if exists.is_some() {
        return Err(CoreError::DuplicateQuestion);
    }

    tx.execute(
        "INSERT INTO questions (board, subject, competition, year, body, format, answer_key,
                                trap_annotation, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            question.board,
            question.subject.as_str(),
            question.competition.as_ref().map(CompetitionTag::as_str),
            question.year,
            body,
            question.format,
            key.to_string(),
            trap,
            Utc::now(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CoreError::DuplicateQuestion
        }
        other => CoreError::Database(other),
    })?;
    let id = tx.last_insert_rowid();
    register_subject(&tx, &question.subject)?;
    tx.commit()?;

    info!(id, board = %question.board, subject = %question.subject, "question added");
    Ok(id)
}

/// Questions matching board and subject, in insertion order.
///
/// With a competition, only questions tagged with it, tagged `general`, or
/// untagged are returned. Without one, the competition is not filtered.
pub fn find_questions(
    conn: &Connection,
    board: Board,
    subject: &Subject,
    competition: Option<&CompetitionTag>,
) -> CoreResult<Vec<Question>> {
    let query = format!(
        "SELECT {QUESTION_COLUMNS} FROM questions
         WHERE board = ?1 AND subject = ?2
           AND (?3 IS NULL OR competition IS NULL OR competition = 'general' OR competition = ?3)
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(
        params![board, subject.as_str(), competition.map(CompetitionTag::as_str)],
        question_from_row,
    )?;
    let questions: Vec<Question> = rows.collect::<Result<_, _>>()?;
    debug!(count = questions.len(), %board, %subject, "questions found");
    Ok(questions)
}

pub fn get_question(conn: &Connection, id: QuestionId) -> CoreResult<Option<Question>> {
    let query = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1");
    Ok(conn
        .query_row(&query, params![id], question_from_row)
        .optional()?)
}

pub fn count_questions(conn: &Connection) -> CoreResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Timestamp of the newest question, if any.
pub fn last_added_at(conn: &Connection) -> CoreResult<Option<DateTime<Utc>>> {
    Ok(conn.query_row("SELECT MAX(created_at) FROM questions", [], |row| row.get(0))?)
}

/// Insert the starter question set. Questions already present are skipped.
pub fn seed_sample_questions(conn: &mut Connection) -> CoreResult<usize> {
    let portugues = Subject::new("Portugues")?;
    let logica = Subject::new("Raciocinio Logico")?;
    let samples = [
        NewQuestion::new(
            Board::Cespe,
            portugues.clone(),
            "Julgue: A expressão 'imprescindíveis' indica que políticas são opcionais.",
            AnswerFormat::Binary,
            "E",
        )
        .with_year(2026)
        .with_trap("inversão de absoluto"),
        NewQuestion::new(
            Board::Cespe,
            portugues.clone(),
            "Assinale a substituição que mantém o sentido original.",
            AnswerFormat::Choice,
            "C",
        )
        .with_year(2026)
        .with_trap("equivalência semântica"),
        NewQuestion::new(
            Board::Cespe,
            logica,
            "Número de linhas da tabela-verdade para condicional.",
            AnswerFormat::Choice,
            "C",
        )
        .with_year(2026)
        .with_trap("lógica proposicional"),
        NewQuestion::new(
            Board::Fgv,
            portugues,
            "“Uma casa com cachorro é um lar feliz”. Deduz-se que todos devem ter cachorro.",
            AnswerFormat::Choice,
            "E",
        )
        .with_year(2020)
        .with_trap("extrapolação indevida"),
    ];

    let mut inserted = 0;
    for sample in &samples {
        match add_question(conn, sample) {
            Ok(_) => inserted += 1,
            Err(CoreError::DuplicateQuestion) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::GENERAL_COMPETITION;
    use crate::db::open_in_memory;

    fn math() -> Subject {
        Subject::new("Math").unwrap()
    }

    #[test]
    fn add_and_fetch_round_trip() {
        let mut conn = open_in_memory().unwrap();
        let q = NewQuestion::new(Board::Cespe, math(), "2 + 2 = 4", AnswerFormat::Binary, "c")
            .with_year(2024)
            .with_trap("  ");
        let id = add_question(&mut conn, &q).unwrap();

        let stored = get_question(&conn, id).unwrap().unwrap();
        assert_eq!(stored.answer_key, 'C');
        assert_eq!(stored.year, Some(2024));
        assert_eq!(stored.trap_annotation, None);
        assert_eq!(stored.competition, None);
        assert!(last_added_at(&conn).unwrap().is_some());
    }

    #[test]
    fn duplicate_body_is_rejected_without_new_row() {
        let mut conn = open_in_memory().unwrap();
        let q = NewQuestion::new(Board::Fgv, math(), "Same body", AnswerFormat::Choice, "A");
        add_question(&mut conn, &q).unwrap();
        let again = NewQuestion::new(Board::Cespe, math(), "Same body", AnswerFormat::Binary, "E");
        assert!(matches!(
            add_question(&mut conn, &again),
            Err(CoreError::DuplicateQuestion)
        ));
        assert_eq!(count_questions(&conn).unwrap(), 1);
    }

    #[test]
    fn bodies_differing_in_whitespace_are_distinct() {
        let mut conn = open_in_memory().unwrap();
        let plain = NewQuestion::new(Board::Cespe, math(), "X", AnswerFormat::Binary, "C");
        let padded = NewQuestion::new(Board::Cespe, math(), "X ", AnswerFormat::Binary, "E");
        let first = add_question(&mut conn, &plain).unwrap();
        let second = add_question(&mut conn, &padded).unwrap();
        assert_eq!(get_question(&conn, second).unwrap().unwrap().body, "X ");
        assert_ne!(first, second);
        assert!(matches!(
            add_question(&mut conn, &padded),
            Err(CoreError::DuplicateQuestion)
        ));

        let blank = NewQuestion::new(Board::Cespe, math(), "   ", AnswerFormat::Binary, "C");
        assert!(matches!(
            add_question(&mut conn, &blank),
            Err(CoreError::Validation { field: "body", .. })
        ));
    }

    #[test]
    fn binary_question_with_choice_key_is_rejected() {
        let mut conn = open_in_memory().unwrap();
        let q = NewQuestion::new(Board::Cespe, math(), "Body", AnswerFormat::Binary, "A");
        assert!(matches!(
            add_question(&mut conn, &q),
            Err(CoreError::InvalidAnswerKey { .. })
        ));
        assert_eq!(count_questions(&conn).unwrap(), 0);
    }

    #[test]
    fn find_applies_competition_rules() {
        let mut conn = open_in_memory().unwrap();
        let inss = CompetitionTag::new("INSS").unwrap();
        let prf = CompetitionTag::new("PRF").unwrap();
        let base =
            |body: &str| NewQuestion::new(Board::Cespe, math(), body, AnswerFormat::Binary, "C");

        add_question(&mut conn, &base("untagged")).unwrap();
        add_question(&mut conn, &base("general").with_competition(CompetitionTag::general()))
            .unwrap();
        add_question(&mut conn, &base("inss").with_competition(inss.clone())).unwrap();
        add_question(&mut conn, &base("prf").with_competition(prf)).unwrap();
        add_question(
            &mut conn,
            &NewQuestion::new(Board::Fgv, math(), "other board", AnswerFormat::Choice, "B"),
        )
        .unwrap();

        let bodies = |qs: Vec<Question>| qs.into_iter().map(|q| q.body).collect::<Vec<_>>();
        assert_eq!(
            bodies(find_questions(&conn, Board::Cespe, &math(), Some(&inss)).unwrap()),
            vec!["untagged", "general", "inss"]
        );
        assert_eq!(find_questions(&conn, Board::Cespe, &math(), None).unwrap().len(), 4);

        // Upper-case sentinel is still shared with every competition.
        let shouted = CompetitionTag::new("GENERAL").unwrap();
        add_question(&mut conn, &base("shouted").with_competition(shouted)).unwrap();
        let stored = find_questions(&conn, Board::Cespe, &math(), Some(&inss)).unwrap();
        assert_eq!(stored.last().unwrap().body, "shouted");
        assert_eq!(stored.last().unwrap().competition.as_deref(), Some(GENERAL_COMPETITION));
        assert!(find_questions(&conn, Board::Cespe, &Subject::new("Direito").unwrap(), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn adding_a_question_registers_its_subject() {
        let mut conn = open_in_memory().unwrap();
        let q = NewQuestion::new(Board::Fgv, math(), "Body", AnswerFormat::Choice, "D");
        add_question(&mut conn, &q).unwrap();
        assert_eq!(crate::catalog::list_subjects(&conn).unwrap(), vec!["Math"]);
    }

    #[test]
    fn sample_seed_is_idempotent() {
        let mut conn = open_in_memory().unwrap();
        assert_eq!(seed_sample_questions(&mut conn).unwrap(), 4);
        assert_eq!(seed_sample_questions(&mut conn).unwrap(), 0);
        assert_eq!(count_questions(&conn).unwrap(), 4);
    }
}
