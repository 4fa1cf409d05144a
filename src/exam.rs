//! Exam assembly: draw an unbiased question subset and open an attempt for it.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

use crate::catalog::{AnswerFormat, Board, CompetitionTag, OwnerId, Subject};
use crate::error::{AttemptId, CoreError, CoreResult, QuestionId};
use crate::questions::find_questions;

pub const DEFAULT_EXAM_SIZE: usize = 10;

/// Parameters of one exam draw.
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub owner: OwnerId,
    pub board: Board,
    pub subject: Subject,
    pub competition: Option<CompetitionTag>,
    pub size: usize,
    /// Fixes the draw, mostly for tests. `None` seeds from system entropy.
    pub seed: Option<u64>,
}

impl AssembleRequest {
    pub fn new(owner: OwnerId, board: Board, subject: Subject) -> Self {
        Self {
            owner,
            board,
            subject,
            competition: None,
            size: DEFAULT_EXAM_SIZE,
            seed: None,
        }
    }

    pub fn with_competition(mut self, competition: CompetitionTag) -> Self {
        self.competition = Some(competition);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A question as shown to the candidate. The answer key is left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamQuestion {
    pub id: QuestionId,
    pub position: usize,
    pub body: String,
    pub format: AnswerFormat,
    pub year: Option<u16>,
    pub competition: Option<String>,
}

/// Drawn exam bound to its attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exam {
    pub attempt_id: AttemptId,
    pub board: Board,
    pub subject: String,
    pub competition: Option<String>,
    pub questions: Vec<ExamQuestion>,
}

impl Exam {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Uniform sample without replacement of up to `size` items, via a partial
/// Fisher-Yates shuffle. The result order is random as well.
pub fn draw_sample<T: Clone, R: Rng + ?Sized>(items: &[T], size: usize, rng: &mut R) -> Vec<T> {
    let mut pool = items.to_vec();
    let amount = size.min(pool.len());
    let (picked, _) = pool.partial_shuffle(rng, amount);
    picked.to_vec()
}

/// Draw an exam and open an attempt for it in one transaction.
///
/// Fewer matching questions than requested yields a short exam; none at all
/// fails with [`CoreError::NoQuestionsAvailable`].
pub fn assemble(conn: &mut Connection, request: &AssembleRequest) -> CoreResult<Exam> {
    if request.size == 0 {
        return Err(CoreError::InvalidExamSize);
    }

    let tx = conn.transaction()?;
    let candidates = find_questions(
        &tx,
        request.board,
        &request.subject,
        request.competition.as_ref(),
    )?;
    if candidates.is_empty() {
        return Err(CoreError::NoQuestionsAvailable {
            board: request.board,
            subject: request.subject.to_string(),
        });
    }

    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let indices: Vec<usize> = (0..candidates.len()).collect();
    let picked = draw_sample(&indices, request.size, &mut rng);

    let competition = request.competition.as_ref().map(|c| c.as_str().to_string());
    tx.execute(
        "INSERT INTO attempts (owner_id, created_at, competition, board, subject, question_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            request.owner.as_str(),
            Utc::now(),
            competition,
            request.board,
            request.subject.as_str(),
            picked.len() as i64,
        ],
    )?;
    let attempt_id = tx.last_insert_rowid();

    let mut questions = Vec::with_capacity(picked.len());
    {
        let mut insert = tx.prepare(
            "INSERT INTO exam_questions (attempt_id, question_id, position) VALUES (?1, ?2, ?3)",
        )?;
        for (position, &index) in picked.iter().enumerate() {
            let q = &candidates[index];
            insert.execute(params![attempt_id, q.id, position as i64])?;
            questions.push(ExamQuestion {
                id: q.id,
                position,
                body: q.body.clone(),
                format: q.format,
                year: q.year,
                competition: q.competition.clone(),
            });
        }
    }
    tx.commit()?;

    info!(
        attempt_id,
        owner = %request.owner,
        board = %request.board,
        subject = %request.subject,
        available = candidates.len(),
        drawn = questions.len(),
        "exam assembled"
    );
    Ok(Exam {
        attempt_id,
        board: request.board,
        subject: request.subject.to_string(),
        competition,
        questions,
    })
}

/// Re-read a previously drawn exam, in its original order.
pub fn load_exam(conn: &Connection, attempt_id: AttemptId) -> CoreResult<Exam> {
    let header = conn
        .query_row(
            "SELECT board, subject, competition FROM attempts WHERE id = ?1",
            params![attempt_id],
            |row| {
                Ok((
                    row.get::<_, Board>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    let (board, subject, competition) = header.ok_or(CoreError::AttemptNotFound(attempt_id))?;

    let mut stmt = conn.prepare(
        "SELECT q.id, e.position, q.body, q.format, q.year, q.competition
         FROM exam_questions e JOIN questions q ON q.id = e.question_id
         WHERE e.attempt_id = ?1
         ORDER BY e.position",
    )?;
    let rows = stmt.query_map(params![attempt_id], |row| {
        Ok(ExamQuestion {
            id: row.get(0)?,
            position: row.get::<_, i64>(1)? as usize,
            body: row.get(2)?,
            format: row.get(3)?,
            year: row.get(4)?,
            competition: row.get(5)?,
        })
    })?;
    let questions = rows.collect::<Result<Vec<_>, _>>()?;

    Ok(Exam {
        attempt_id,
        board,
        subject,
        competition,
        questions,
    })
}
