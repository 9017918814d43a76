//! Append-only trade journal.
//!
//! Columns: ts, price, signal, qty, sl, tp, note. One row per entry, exit or
//! shutdown flatten. The header is written only when the file is new or empty.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal CSV write failed: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Flatten,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub signal: Signal,
    /// Signed: negative for sells.
    pub qty: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub note: String,
}

pub trait TradeJournal {
    fn record(&mut self, row: &TradeRecord) -> Result<(), JournalError>;
}

/// In-memory journal.
impl TradeJournal for Vec<TradeRecord> {
    fn record(&mut self, row: &TradeRecord) -> Result<(), JournalError> {
        self.push(row.clone());
        Ok(())
    }
}

/// CSV file journal. Each row is appended and flushed immediately.
#[derive(Debug, Clone)]
pub struct CsvJournal {
    path: PathBuf,
}

impl CsvJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row back.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>, JournalError> {
        let mut rdr = csv::Reader::from_path(&self.path)?;
        let rows = rdr.deserialize().collect::<Result<Vec<TradeRecord>, _>>()?;
        Ok(rows)
    }

    fn io_err(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl TradeJournal for CsvJournal {
    fn record(&mut self, row: &TradeRecord) -> Result<(), JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let is_empty = file.metadata().map_err(|e| self.io_err(e))?.len() == 0;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);
        wtr.serialize(row)?;
        wtr.flush().map_err(|e| self.io_err(e))?;
        Ok(())
    }
}
