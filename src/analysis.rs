//! Trap-pattern mining over a candidate's wrong answers.
//!
//! Every wrong answer feeds two independent tallies: one keyed by the
//! question's trap annotation and one per trap keyword found in the body.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::debug;

use crate::catalog::OwnerId;
use crate::error::CoreResult;
use crate::questions::{question_from_row, Question};

/// Substrings whose presence in a question body tends to trip candidates:
/// absolute quantifiers and inference-demanding phrasing.
pub const TRAP_KEYWORDS: &[&str] = &[
    "sempre",
    "nunca",
    "apenas",
    "exclusivamente",
    "obrigatoriamente",
    "julgue",
    "infere-se",
    "conclui-se",
    "imprescindível",
    "bem definido",
    "todo",
    "nenhum",
    "de acordo com o texto",
    "correto afirmar",
];

pub const DEFAULT_PATTERN_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSource {
    Annotation,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCount {
    pub pattern: String,
    pub source: PatternSource,
    pub count: usize,
}

/// Ranked patterns for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternReport {
    /// Number of wrong answers that were scanned.
    pub wrong_answers: usize,
    pub patterns: Vec<PatternCount>,
}

impl PatternReport {
    /// `true` when the candidate has no wrong answers to analyze.
    pub fn is_empty(&self) -> bool {
        self.wrong_answers == 0
    }

    pub fn count_of(&self, pattern: &str) -> Option<usize> {
        self.patterns
            .iter()
            .find(|p| p.pattern == pattern)
            .map(|p| p.count)
    }
}

/// Frequency counter that remembers first-seen order for tie breaking.
#[derive(Debug, Default)]
struct Tally {
    index: HashMap<(PatternSource, String), usize>,
    entries: Vec<PatternCount>,
}

impl Tally {
    fn bump(&mut self, source: PatternSource, pattern: &str) {
        match self.index.get(&(source, pattern.to_string())) {
            Some(&i) => self.entries[i].count += 1,
            None => {
                self.index
                    .insert((source, pattern.to_string()), self.entries.len());
                self.entries.push(PatternCount {
                    pattern: pattern.to_string(),
                    source,
                    count: 1,
                });
            }
        }
    }

    fn ranked(mut self, limit: usize) -> Vec<PatternCount> {
        // stable sort keeps first-seen order among equal counts
        self.entries.sort_by(|a, b| b.count.cmp(&a.count));
        self.entries.truncate(limit);
        self.entries
    }
}

/// Count annotations and keyword hits over the given wrong answers,
/// identified by `(body, trap annotation)`.
pub fn tally_patterns<'a, I>(wrong: I, keywords: &[&str], limit: usize) -> PatternReport
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut tally = Tally::default();
    let mut wrong_answers = 0;
    for (body, annotation) in wrong {
        wrong_answers += 1;
        if let Some(label) = annotation.map(str::trim).filter(|l| !l.is_empty()) {
            tally.bump(PatternSource::Annotation, label);
        }
        let lowered = body.to_lowercase();
        for keyword in keywords {
            if lowered.contains(&keyword.to_lowercase()) {
                tally.bump(PatternSource::Keyword, keyword);
            }
        }
    }
    PatternReport {
        wrong_answers,
        patterns: tally.ranked(limit),
    }
}

fn wrong_answer_questions(conn: &Connection, owner: &OwnerId) -> CoreResult<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.board, q.subject, q.competition, q.year, q.body, q.format,
                q.answer_key, q.trap_annotation
         FROM answers a
         JOIN attempts t ON t.id = a.attempt_id
         JOIN questions q ON q.id = a.question_id
         WHERE t.owner_id = ?1 AND a.is_correct = 0
         ORDER BY t.created_at, t.id, a.id",
    )?;
    let rows = stmt.query_map(params![owner.as_str()], question_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Rank the trap patterns behind every wrong answer of `owner`, across all
/// attempts. No wrong answers gives an empty report, not an error.
pub fn analyze(conn: &Connection, owner: &OwnerId, limit: usize) -> CoreResult<PatternReport> {
    let wrong = wrong_answer_questions(conn, owner)?;
    let report = tally_patterns(
        wrong
            .iter()
            .map(|q| (q.body.as_str(), q.trap_annotation.as_deref())),
        TRAP_KEYWORDS,
        limit,
    );
    debug!(
        %owner,
        wrong = report.wrong_answers,
        patterns = report.patterns.len(),
        "patterns analyzed"
    );
    Ok(report)
}

/// Questions `owner` got wrong, most missed first.
pub fn failed_questions(
    conn: &Connection,
    owner: &OwnerId,
    limit: usize,
) -> CoreResult<Vec<(Question, usize)>> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.board, q.subject, q.competition, q.year, q.body, q.format,
                q.answer_key, q.trap_annotation, COUNT(*) AS misses
         FROM answers a
         JOIN attempts t ON t.id = a.attempt_id
         JOIN questions q ON q.id = a.question_id
         WHERE t.owner_id = ?1 AND a.is_correct = 0
         GROUP BY q.id
         ORDER BY misses DESC, q.id
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![owner.as_str(), limit as i64], |row| {
        Ok((question_from_row(row)?, row.get::<_, i64>(9)? as usize))
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wrong_answers_is_an_empty_report() {
        let report = tally_patterns(Vec::<(&str, Option<&str>)>::new(), TRAP_KEYWORDS, 10);
        assert!(report.is_empty());
        assert!(report.patterns.is_empty());
    }

    #[test]
    fn annotation_and_keywords_are_counted_independently() {
        let wrong = vec![(
            "Julgue: o servidor SEMPRE responde, e nunca falha.",
            Some("absolute-inversion"),
        )];
        let report = tally_patterns(wrong, TRAP_KEYWORDS, 10);
        assert_eq!(report.wrong_answers, 1);
        assert_eq!(report.count_of("absolute-inversion"), Some(1));
        assert_eq!(report.count_of("sempre"), Some(1));
        assert_eq!(report.count_of("nunca"), Some(1));
        assert_eq!(report.count_of("julgue"), Some(1));
        assert_eq!(report.patterns.len(), 4);
    }

    #[test]
    fn ranking_is_by_count_then_first_seen() {
        let wrong = vec![
            ("apenas isso", Some("b-trap")),
            ("nada aqui", Some("a-trap")),
            ("nada aqui também", Some("a-trap")),
            ("sempre", None),
        ];
        let report = tally_patterns(wrong, TRAP_KEYWORDS, 10);
        let order: Vec<_> = report.patterns.iter().map(|p| p.pattern.as_str()).collect();
        assert_eq!(order, vec!["a-trap", "b-trap", "apenas", "sempre"]);

        let misses = vec![("apenas", Some("x")), ("sempre", Some("x"))];
        let top = tally_patterns(misses, TRAP_KEYWORDS, 1);
        assert_eq!(top.patterns.len(), 1);
        assert_eq!(top.patterns[0].pattern, "x");
        assert_eq!(top.patterns[0].count, 2);
    }

    #[test]
    fn keyword_matching_is_case_insensitive_with_accents() {
        let report = tally_patterns(vec![("É IMPRESCINDÍVEL notar", None)], TRAP_KEYWORDS, 10);
        assert_eq!(report.count_of("imprescindível"), Some(1));
    }

    #[test]
    fn blank_annotation_is_ignored() {
        let report = tally_patterns(vec![("texto neutro", Some("  "))], TRAP_KEYWORDS, 10);
        assert_eq!(report.wrong_answers, 1);
        assert!(report.patterns.is_empty());
        assert!(!report.is_empty());
    }
}
