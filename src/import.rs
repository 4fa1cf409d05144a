//! Bulk question import from CSV and Excel sheets.
//!
//! Rows are validated and added one by one; bad or duplicate rows are
//! skipped and counted instead of failing the batch.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{AnswerFormat, Board, CompetitionTag, Subject};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::questions::{add_question, NewQuestion};

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// One raw row, as read from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    pub board: String,
    pub subject: String,
    pub year: String,
    pub competition: String,
    pub body: String,
    pub format: String,
    pub answer_key: String,
    pub trap_annotation: String,
}

impl ImportRow {
    /// Validate the raw strings into a question ready for the store.
    pub fn to_new_question(&self) -> CoreResult<NewQuestion> {
        let board: Board = self.board.parse()?;
        let subject = Subject::new(&self.subject)?;
        // An empty format cell means the board's usual one.
        let format = match self.format.trim() {
            "" => board.default_format(),
            raw => raw.parse::<AnswerFormat>()?,
        };
        let mut question =
            NewQuestion::new(board, subject, self.body.trim(), format, self.answer_key.trim());

        let year = self.year.trim();
        if !year.is_empty() {
            let parsed = year
                .parse::<u16>()
                .map_err(|_| CoreError::validation("year", format!("{year:?} is not a year")))?;
            question = question.with_year(parsed);
        }
        if !self.competition.trim().is_empty() {
            question = question.with_competition(CompetitionTag::new(&self.competition)?);
        }
        if !self.trap_annotation.trim().is_empty() {
            question = question.with_trap(self.trap_annotation.trim());
        }
        Ok(question)
    }
}

/// Column index mapping
#[derive(Debug, Default, Clone)]
pub struct ColumnMapping {
    pub board: usize,
    pub subject: usize,
    pub body: usize,
    pub answer_key: usize,
    pub format: Option<usize>,
    pub year: Option<usize>,
    pub competition: Option<usize>,
    pub trap_annotation: Option<usize>,
}

impl ColumnMapping {
    fn row_from<'a>(&self, cell: impl Fn(usize) -> Option<&'a str>) -> ImportRow {
        let get = |i: usize| cell(i).unwrap_or("").trim().to_string();
        let opt = |i: Option<usize>| i.map(&get).unwrap_or_default();
        ImportRow {
            board: get(self.board),
            subject: get(self.subject),
            year: opt(self.year),
            competition: opt(self.competition),
            body: get(self.body),
            format: opt(self.format),
            answer_key: get(self.answer_key),
            trap_annotation: opt(self.trap_annotation),
        }
    }
}

/// Detect column indices from header names
pub fn detect_columns(headers: &[String]) -> CoreResult<ColumnMapping> {
    let mut board = None;
    let mut subject = None;
    let mut body = None;
    let mut answer_key = None;
    let mut mapping = ColumnMapping::default();

    for (i, header) in headers.iter().enumerate() {
        match header.trim().to_lowercase().as_str() {
            "board" | "banca" => board = Some(i),
            "subject" | "materia" | "matéria" => subject = Some(i),
            "body" | "question" | "questao" | "questão" => body = Some(i),
            "format" | "tipo" => mapping.format = Some(i),
            "answerkey" | "answer_key" | "key" | "gabarito" => answer_key = Some(i),
            "year" | "ano" => mapping.year = Some(i),
            "competition" | "concurso" => mapping.competition = Some(i),
            "trapannotation" | "trap_annotation" | "trap" | "pegadinha" => {
                mapping.trap_annotation = Some(i)
            }
            _ => {}
        }
    }

    let require = |found: Option<usize>, name: &str| {
        found.ok_or_else(|| {
            CoreError::validation("header", format!("missing required '{name}' column"))
        })
    };
    mapping.board = require(board, "board")?;
    mapping.subject = require(subject, "subject")?;
    mapping.body = require(body, "body")?;
    mapping.answer_key = require(answer_key, "answerKey")?;
    Ok(mapping)
}

/// Add every row, skipping the ones that fail validation or already exist.
/// Store failures still abort, since they are not caused by the row.
pub fn import_rows(
    conn: &mut Connection,
    rows: impl IntoIterator<Item = ImportRow>,
) -> CoreResult<ImportReport> {
    let mut report = ImportReport::default();
    for (line, row) in rows.into_iter().enumerate() {
        let result = row
            .to_new_question()
            .and_then(|question| add_question(conn, &question));
        match result {
            Ok(_) => report.imported += 1,
            Err(e) if e.kind() == ErrorKind::Persistence => return Err(e),
            Err(e) => {
                warn!(row = line + 1, error = %e, "import row skipped");
                report.skipped += 1;
            }
        }
    }
    info!(imported = report.imported, skipped = report.skipped, "bulk import finished");
    Ok(report)
}

/// Import a file, picking the parser from its extension.
pub fn import_file(conn: &mut Connection, file_path: impl AsRef<Path>) -> CoreResult<ImportReport> {
    let path = file_path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "xlsx" | "xls" => import_excel(conn, path),
        "csv" => import_csv(conn, std::fs::File::open(path)?),
        _ => Err(CoreError::UnsupportedFormat(extension)),
    }
}

/// Import CSV data from any reader.
pub fn import_csv<R: Read>(conn: &mut Connection, source: R) -> CoreResult<ImportReport> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
    let mapping = detect_columns(&headers)?;

    let mut rows = Vec::new();
    let mut unreadable = 0;
    for result in reader.records() {
        match result {
            Ok(record) => rows.push(mapping.row_from(|i| record.get(i))),
            Err(e) => {
                warn!(error = %e, "unreadable csv row skipped");
                unreadable += 1;
            }
        }
    }

    let mut report = import_rows(conn, rows)?;
    report.skipped += unreadable;
    Ok(report)
}

/// Import the first sheet of an Excel workbook, `.xlsx` or legacy `.xls`.
pub fn import_excel(conn: &mut Connection, file_path: &Path) -> CoreResult<ImportReport> {
    let mut workbook = open_workbook_auto(file_path)?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| CoreError::validation("workbook", "no sheets found"))?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut sheet_rows = range.rows();
    let header_row = sheet_rows
        .next()
        .ok_or_else(|| CoreError::validation("workbook", "empty sheet, no header row"))?;
    let headers: Vec<String> = header_row.iter().map(get_cell_string).collect();
    let mapping = detect_columns(&headers)?;

    let rows: Vec<ImportRow> = sheet_rows
        .map(|row| {
            let cells: Vec<String> = row.iter().map(get_cell_string).collect();
            mapping.row_from(|i| cells.get(i).map(String::as_str))
        })
        .collect();

    import_rows(conn, rows)
}

/// Helper to extract string from Excel cell
fn get_cell_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
        Data::Empty => String::new(),
    }
}
