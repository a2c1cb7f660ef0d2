use chrono::Utc;
use common::{ConfigError, EngineError, IdAllocator, PathPlan, RecordSource, RunReport};
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

use crate::processor::Processor;
use crate::scheduler::Scheduler;
use crate::sink::SinkHandle;

pub const DEFAULT_THREADS: usize = 1;
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Parámetros de una corrida.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub errors: PathBuf,
    /// Límite de unidades concurrentes (C).
    pub concurrency: usize,
    /// Timeout por registro (T).
    pub timeout: Duration,
    /// Se pasa tal cual al procesador.
    pub options: Value,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency < 1 {
            return Err(ConfigError::Concurrency(self.concurrency));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }
        Ok(())
    }
}

/// Corre el batch completo: resuelve rutas, y para cada archivo de entrada
/// lee sus bloques, asigna ids, despacha y cierra su stream de salida.
///
/// Los errores de configuración salen antes de leer cualquier archivo.
/// Los fallos por registro nunca salen como Err: quedan en el log de errores.
pub async fn run_batch(
    config: &RunConfig,
    source: &dyn RecordSource,
    processor: Arc<dyn Processor>,
) -> Result<RunReport, EngineError> {
    config.validate()?;
    let plan = PathPlan::resolve(&config.input, &config.output, &config.errors)?;
    run_with_plan(plan, config, source, processor).await
}

/// Igual que `run_batch` con un plan de rutas ya resuelto.
pub async fn run_with_plan(
    plan: PathPlan,
    config: &RunConfig,
    source: &dyn RecordSource,
    processor: Arc<dyn Processor>,
) -> Result<RunReport, EngineError> {
    config.validate()?;
    let started_at = Utc::now();
    plan.prepare()?;

    let (sink, sink_task) = SinkHandle::spawn(&plan.error_log_path)?;
    let scheduler = Scheduler::new(
        config.concurrency,
        config.timeout,
        processor,
        config.options.clone(),
    );

    let mut ids = IdAllocator::new();
    let mut files = Vec::with_capacity(plan.input_files.len());
    let file_count = plan.input_files.len();

    for (i, input) in plan.input_files.iter().enumerate() {
        let blocks = source.read_blocks(input)?;
        let job = ids.allocate(input.clone(), plan.output_path_for(input), blocks.len());

        info!(
            "procesando archivo {} de {}: {} ({} estructura(s), ids {:?}) -> {}",
            i + 1,
            file_count,
            job.file_name(),
            job.record_count,
            job.ids(),
            job.output_path.display()
        );

        let records = job.records(blocks);
        sink.open_file(job).await?;
        scheduler.run_file(records, &sink).await?;
        let summary = sink.close_file().await?;

        info!(
            "archivo {} listo: ok={} errores={} timeouts={}",
            summary.input_path.display(),
            summary.counts.total_success,
            summary.counts.total_errors,
            summary.counts.total_timeouts
        );
        files.push(summary);
    }

    let summary = sink.finish().await?;
    sink_task
        .await
        .map_err(|e| EngineError::Sink(format!("el actor del sink falló: {e}")))?;

    if !summary.is_consistent() || summary.total_processed != ids.allocated() {
        return Err(EngineError::Sink(format!(
            "totales inconsistentes: {:?} para {} registro(s)",
            summary,
            ids.allocated()
        )));
    }

    info!(
        "corrida completa: {} registro(s), pico de {} unidad(es) concurrentes (límite {})",
        summary.total_processed,
        scheduler.peak_dispatched(),
        scheduler.concurrency()
    );

    Ok(RunReport {
        plan,
        files,
        summary,
        started_at,
        finished_at: Utc::now(),
    })
}
