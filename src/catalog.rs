//! Reference data: exam boards, answer formats, validated filter values and
//! the competition/subject lists.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Competition tag shared by every competition.
pub const GENERAL_COMPETITION: &str = "general";

/// Examining organization. The board decides the usual answer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Board {
    Cespe,
    Fgv,
}

impl Board {
    pub fn as_str(&self) -> &'static str {
        match self {
            Board::Cespe => "CESPE",
            Board::Fgv => "FGV",
        }
    }

    /// CESPE writes true/false items, FGV writes five-option items.
    pub fn default_format(&self) -> AnswerFormat {
        match self {
            Board::Cespe => AnswerFormat::Binary,
            Board::Fgv => AnswerFormat::Choice,
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Board {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CESPE" | "CEBRASPE" | "CESPE/CEBRASPE" => Ok(Board::Cespe),
            "FGV" => Ok(Board::Fgv),
            _ => Err(CoreError::UnknownBoard(s.trim().to_string())),
        }
    }
}

impl ToSql for Board {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Board {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|_| FromSqlError::Other(format!("unknown board {raw:?}").into()))
    }
}

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    /// Certo/Errado items, keys C or E.
    Binary,
    /// Multiple choice, keys A to E.
    Choice,
}

impl AnswerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerFormat::Binary => "binary",
            AnswerFormat::Choice => "choice",
        }
    }

    pub fn valid_symbols(&self) -> &'static [char] {
        match self {
            AnswerFormat::Binary => &['C', 'E'],
            AnswerFormat::Choice => &['A', 'B', 'C', 'D', 'E'],
        }
    }

    /// Normalizes a symbol typed by a person. Binary items also accept the
    /// words "certo" and "errado".
    pub fn parse_symbol(&self, raw: &str) -> Option<char> {
        let upper = raw.trim().to_uppercase();
        let symbol = match (self, upper.as_str()) {
            (AnswerFormat::Binary, "CERTO") => 'C',
            (AnswerFormat::Binary, "ERRADO") => 'E',
            _ => {
                let mut chars = upper.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => return None,
                }
            }
        };
        self.valid_symbols().contains(&symbol).then_some(symbol)
    }

    /// Validates an answer key for this format.
    pub fn validate_key(&self, raw: &str) -> CoreResult<char> {
        self.parse_symbol(raw).ok_or_else(|| CoreError::InvalidAnswerKey {
            format: *self,
            key: raw.to_string(),
        })
    }
}

impl fmt::Display for AnswerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binary" | "certo_errado" | "certo/errado" | "ce" => Ok(AnswerFormat::Binary),
            "choice" | "multipla" | "múltipla" | "multiple_choice" => Ok(AnswerFormat::Choice),
            _ => Err(CoreError::UnknownFormat(s.trim().to_string())),
        }
    }
}

impl ToSql for AnswerFormat {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AnswerFormat {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|_| FromSqlError::Other(format!("unknown answer format {raw:?}").into()))
    }
}

fn non_empty(field: &'static str, raw: &str) -> CoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Subject name, e.g. "Portugues".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Subject(String);

impl Subject {
    pub fn new(raw: &str) -> CoreResult<Self> {
        non_empty("subject", raw).map(Subject)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque candidate identity handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: &str) -> CoreResult<Self> {
        non_empty("owner id", raw).map(OwnerId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Competition name. Open-ended, so only checked for emptiness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CompetitionTag(String);

impl CompetitionTag {
    /// Any casing of `general` is stored as [`GENERAL_COMPETITION`].
    pub fn new(raw: &str) -> CoreResult<Self> {
        let name = non_empty("competition", raw)?;
        if name.eq_ignore_ascii_case(GENERAL_COMPETITION) {
            return Ok(Self::general());
        }
        Ok(CompetitionTag(name))
    }

    pub fn general() -> Self {
        CompetitionTag(GENERAL_COMPETITION.to_string())
    }

    pub fn is_general(&self) -> bool {
        self.0 == GENERAL_COMPETITION
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompetitionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry of the competition reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub name: String,
    pub status: String,
    pub likely_board: String,
    pub vacancies: String,
    pub salary: String,
}

impl Competition {
    /// Boards named in `likely_board`, e.g. "CESPE ou FGV". Placeholders such
    /// as "a definir" yield nothing.
    pub fn likely_boards(&self) -> Vec<Board> {
        let mut boards = Vec::new();
        let normalized = self
            .likely_board
            .replace(" ou ", "/")
            .replace(" or ", "/")
            .replace(',', "/");
        for part in normalized.split('/') {
            if let Ok(board) = part.parse::<Board>() {
                if !boards.contains(&board) {
                    boards.push(board);
                }
            }
        }
        boards
    }
}

fn competition(
    name: &str,
    status: &str,
    board: &str,
    vacancies: &str,
    salary: &str,
) -> Competition {
    Competition {
        name: name.to_string(),
        status: status.to_string(),
        likely_board: board.to_string(),
        vacancies: vacancies.to_string(),
        salary: salary.to_string(),
    }
}

/// The shipped competition list for the 2026 cycle.
pub fn builtin_competitions() -> Vec<Competition> {
    vec![
        competition(
            "INSS (Técnico e Analista)",
            "Previsto/Autorizado",
            "CESPE/CEBRASPE",
            "~8.500",
            "até R$ 9.300",
        ),
        competition("IBGE (Temporários Censo)", "Autorizado", "a definir", "39.108", "variável"),
        competition(
            "Banco do Brasil (Escriturário)",
            "Previsto",
            "CESPE/CEBRASPE",
            "7.200+",
            "R$ 5.948+",
        ),
        competition(
            "PRF (Policial Rodoviário Federal)",
            "Previsto",
            "CESPE/CEBRASPE",
            "511",
            "R$ 12.253+",
        ),
        competition(
            "AGU (Advocacia-Geral da União)",
            "Previsto",
            "CESPE/CEBRASPE",
            "403+",
            "até R$ 21.000",
        ),
        competition("Câmara dos Deputados", "Previsto", "CESPE ou FGV", "várias", "até R$ 30.000+"),
        competition("EBSERH", "Previsto", "FGV", "várias", "até R$ 18.000+"),
    ]
}

const BUILTIN_SUBJECTS: &[&str] = &["Portugues", "Raciocinio Logico"];

/// Inserts the builtin competitions and subjects, leaving existing rows alone.
pub fn seed_catalog(conn: &Connection) -> CoreResult<usize> {
    let mut inserted = 0;
    for c in builtin_competitions() {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO competitions (name, status, likely_board, vacancies, salary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![c.name, c.status, c.likely_board, c.vacancies, c.salary],
        )?;
    }
    for subject in BUILTIN_SUBJECTS {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO subjects (name) VALUES (?1)",
            params![subject],
        )?;
    }
    debug!(inserted, "catalog seeded");
    Ok(inserted)
}

pub fn list_competitions(conn: &Connection) -> CoreResult<Vec<Competition>> {
    let mut stmt = conn.prepare(
        "SELECT name, status, likely_board, vacancies, salary FROM competitions ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Competition {
            name: row.get(0)?,
            status: row.get(1)?,
            likely_board: row.get(2)?,
            vacancies: row.get(3)?,
            salary: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn list_subjects(conn: &Connection) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM subjects ORDER BY name")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub(crate) fn register_subject(conn: &Connection, subject: &Subject) -> CoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO subjects (name) VALUES (?1)",
        params![subject.as_str()],
    )?;
    Ok(())
}
