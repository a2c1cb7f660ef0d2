use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::job::RecordId;
use crate::paths::PathPlan;

pub const TIMEOUT_MESSAGE: &str = "Operation timed out";

/// Clasificación terminal de un registro.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    Success(Value),
    DomainError(String),
    Timeout(String),
}

/// Exactamente uno por Record; `id` siempre es el del Record que lo produjo.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub id: RecordId,
    pub local_index: usize,
    pub status: OutcomeStatus,
}

impl Outcome {
    pub fn success(id: RecordId, local_index: usize, result: Value) -> Self {
        Self {
            id,
            local_index,
            status: OutcomeStatus::Success(result),
        }
    }

    pub fn error(id: RecordId, local_index: usize, message: impl Into<String>) -> Self {
        Self {
            id,
            local_index,
            status: OutcomeStatus::DomainError(message.into()),
        }
    }

    pub fn timeout(id: RecordId, local_index: usize) -> Self {
        Self {
            id,
            local_index,
            status: OutcomeStatus::Timeout(TIMEOUT_MESSAGE.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success(_))
    }
}

/// Línea de salida para un Success: `{id, ...campos del resultado}`.
/// Si el resultado no es un objeto, queda envuelto en `result`.
pub fn success_line(id: RecordId, result: Value) -> Value {
    let mut obj = match result {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    obj.insert("id".to_string(), Value::from(id));
    Value::Object(obj)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Error,
}

/// Una línea del log de errores compartido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub id: RecordId,
    pub file: String,
    pub local_index: usize,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub error: String,
    pub success: bool,
}

impl ErrorLogEntry {
    /// `None` para un Success (va al stream de salida, no al log).
    pub fn from_outcome(outcome: &Outcome, file: &str) -> Option<Self> {
        let (kind, error) = match &outcome.status {
            OutcomeStatus::Success(_) => return None,
            OutcomeStatus::DomainError(msg) => (ErrorKind::Error, msg.clone()),
            OutcomeStatus::Timeout(msg) => (ErrorKind::Timeout, msg.clone()),
        };
        Some(Self {
            id: outcome.id,
            file: file.to_string(),
            local_index: outcome.local_index,
            kind,
            error,
            success: false,
        })
    }
}

/// Contadores de una corrida (o de un archivo). Sólo crecen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_processed: u64,
    pub total_success: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
}

impl RunSummary {
    pub fn record(&mut self, status: &OutcomeStatus) {
        self.total_processed += 1;
        match status {
            OutcomeStatus::Success(_) => self.total_success += 1,
            OutcomeStatus::DomainError(_) => self.total_errors += 1,
            OutcomeStatus::Timeout(_) => self.total_timeouts += 1,
        }
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.total_processed += other.total_processed;
        self.total_success += other.total_success;
        self.total_errors += other.total_errors;
        self.total_timeouts += other.total_timeouts;
    }

    /// processed == success + errors + timeouts
    pub fn is_consistent(&self) -> bool {
        self.total_processed == self.total_success + self.total_errors + self.total_timeouts
    }
}

/// Resumen de un FileJob ya cerrado.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub record_count: usize,
    pub counts: RunSummary,
}

/// Lo que devuelve una corrida completa.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: PathPlan,
    pub files: Vec<FileSummary>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
