use std::{io, path::PathBuf};

use thiserror::Error;

/// Errores de configuración: rutas o flags inválidos.
/// Siempre son fatales y se detectan antes de procesar cualquier registro.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no se encontró la ruta de entrada: {0}")]
    InputNotFound(PathBuf),

    #[error("el archivo de entrada debe terminar en \"{suffix}\": {path}")]
    InputSuffix { path: PathBuf, suffix: &'static str },

    #[error("no hay archivos que terminen en \"{suffix}\" en el directorio: {dir}")]
    NoInputFiles { dir: PathBuf, suffix: &'static str },

    #[error("{label} debe terminar en \".jsonl\": {path}")]
    JsonlSuffix { label: &'static str, path: PathBuf },

    #[error("{a} y {b} deben ser distintos (ambos apuntan a {path})")]
    PathCollision {
        a: &'static str,
        b: &'static str,
        path: PathBuf,
    },

    #[error("{first} y {second} escribirían el mismo archivo de salida: {output}")]
    OutputNameCollision {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },

    #[error("{label} existe pero no es un directorio: {path}")]
    NotADirectory { label: &'static str, path: PathBuf },

    #[error("el log de errores existe pero es un directorio: {0}")]
    ErrorLogIsDirectory(PathBuf),

    #[error("patrón de búsqueda inválido: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("threads debe ser >= 1 (recibido {0})")]
    Concurrency(usize),

    #[error("timeout debe ser > 0 ms")]
    Timeout,

    #[error("options no es JSON válido: {0}")]
    Options(#[from] serde_json::Error),

    #[error("no se pudo resolver el directorio actual: {0}")]
    CurrentDir(io::Error),
}

/// Fallo del procesador de dominio para un registro concreto.
/// Nunca aborta la corrida: se convierte en un Outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DomainError {
    pub message: String,
}

impl DomainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errores a nivel de corrida (los únicos que salen de `run_batch`).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuración inválida: {0}")]
    Config(#[from] ConfigError),

    #[error("error de IO: {0}")]
    Io(#[from] io::Error),

    #[error("sink de resultados: {0}")]
    Sink(String),

    #[error("scheduler: {0}")]
    Scheduler(String),
}
