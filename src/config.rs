//! Runtime configuration, read from the environment (and `.env` if present).

use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;
use rusqlite::Connection;

use crate::analysis::DEFAULT_PATTERN_LIMIT;
use crate::db::open_database;
use crate::error::{CoreError, CoreResult};
use crate::exam::DEFAULT_EXAM_SIZE;

pub const DEFAULT_DB_PATH: &str = "concursos.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub exam_size: usize,
    pub pattern_limit: usize,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            exam_size: DEFAULT_EXAM_SIZE,
            pattern_limit: DEFAULT_PATTERN_LIMIT,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> CoreResult<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let defaults = Self::default();
        let count = |key: &str, default: usize| -> CoreResult<usize> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => match raw.trim().parse::<usize>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(CoreError::Config(format!(
                        "{key} must be a positive integer, got {raw:?}"
                    ))),
                },
            }
        };

        Ok(Self {
            database_path: lookup("CONCURSO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            exam_size: count("CONCURSO_EXAM_SIZE", defaults.exam_size)?,
            pattern_limit: count("CONCURSO_PATTERN_LIMIT", defaults.pattern_limit)?,
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn open_database(&self) -> CoreResult<Connection> {
        open_database(&self.database_path)
    }
}
