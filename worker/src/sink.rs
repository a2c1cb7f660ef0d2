use common::{
    results::success_line, EngineError, ErrorLogEntry, FileJob, FileSummary, Outcome,
    OutcomeStatus, RunSummary,
};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

enum SinkCommand {
    Open {
        job: FileJob,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Record(Outcome),
    Close {
        reply: oneshot::Sender<Result<FileSummary, EngineError>>,
    },
    Finish {
        reply: oneshot::Sender<Result<RunSummary, EngineError>>,
    },
}

/// Handle al actor que escribe resultados y lleva los contadores.
/// Todas las mutaciones (archivos, contadores, ids ya resueltos) pasan por él.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkCommand>,
    failed: Arc<AtomicBool>,
}

impl SinkHandle {
    /// Abre (truncando) el log de errores compartido y arranca el actor
    /// en un hilo de bloqueo. Debe llamarse dentro de un runtime de tokio.
    pub fn spawn(error_log_path: &Path) -> Result<(Self, JoinHandle<()>), EngineError> {
        let error_log = BufWriter::new(File::create(error_log_path)?);
        let failed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let sink = ResultSink {
            error_log,
            active: None,
            summary: RunSummary::default(),
            io_error: None,
            failed: failed.clone(),
        };
        let task = tokio::task::spawn_blocking(move || sink.run(rx));

        Ok((Self { tx, failed }, task))
    }

    /// Abre el stream de salida de un FileJob. Va antes del primer despacho.
    pub async fn open_file(&self, job: FileJob) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(SinkCommand::Open { job, reply })?;
        rx.await.map_err(|_| gone())?
    }

    /// Entrega un Outcome. No espera: el orden de llegada es el de finalización.
    pub fn record(&self, outcome: Outcome) {
        if self.tx.send(SinkCommand::Record(outcome)).is_err() {
            warn!("sink cerrado, outcome perdido");
            self.failed.store(true, Ordering::SeqCst);
        }
    }

    /// Cierra el stream del FileJob activo. Falla si algún registro quedó
    /// sin Outcome o si hubo un error de escritura.
    pub async fn close_file(&self) -> Result<FileSummary, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(SinkCommand::Close { reply })?;
        rx.await.map_err(|_| gone())?
    }

    /// Vacía el log de errores y devuelve los totales de la corrida.
    pub async fn finish(self) -> Result<RunSummary, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(SinkCommand::Finish { reply })?;
        rx.await.map_err(|_| gone())?
    }

    /// true después del primer error de IO: no tiene sentido seguir despachando.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn send(&self, cmd: SinkCommand) -> Result<(), EngineError> {
        self.tx.send(cmd).map_err(|_| gone())
    }
}

fn gone() -> EngineError {
    EngineError::Sink("el actor del sink terminó".to_string())
}

struct ActiveFile {
    job: FileJob,
    file_name: String,
    writer: BufWriter<File>,
    /// settled[id - start_id]: ese id ya tiene su Outcome escrito
    settled: Vec<bool>,
    counts: RunSummary,
    progress_step: u64,
}

struct ResultSink {
    error_log: BufWriter<File>,
    active: Option<ActiveFile>,
    summary: RunSummary,
    io_error: Option<io::Error>,
    failed: Arc<AtomicBool>,
}

impl ResultSink {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<SinkCommand>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                SinkCommand::Open { job, reply } => {
                    let _ = reply.send(self.open(job));
                }
                SinkCommand::Record(outcome) => self.record(outcome),
                SinkCommand::Close { reply } => {
                    let _ = reply.send(self.close());
                }
                SinkCommand::Finish { reply } => {
                    let _ = reply.send(self.finish());
                    break;
                }
            }
        }
        debug!("sink terminado");
    }

    fn open(&mut self, job: FileJob) -> Result<(), EngineError> {
        self.check()?;
        if let Some(active) = &self.active {
            return Err(EngineError::Sink(format!(
                "{} sigue abierto",
                active.job.output_path.display()
            )));
        }

        let writer = BufWriter::new(File::create(&job.output_path)?);
        let progress_step = (job.record_count as u64 / 10).max(1);
        self.active = Some(ActiveFile {
            file_name: job.file_name(),
            settled: vec![false; job.record_count],
            writer,
            counts: RunSummary::default(),
            progress_step,
            job,
        });
        Ok(())
    }

    fn record(&mut self, outcome: Outcome) {
        if self.io_error.is_some() {
            return;
        }

        let Some(active) = self.active.as_mut() else {
            warn!("outcome {} sin archivo activo, descartado", outcome.id);
            return;
        };

        if !active.job.contains(outcome.id) {
            warn!(
                "outcome {} fuera del rango de {} ({:?}), descartado",
                outcome.id, active.file_name, active.job.ids()
            );
            return;
        }

        // Un id sólo se escribe una vez; lo que llegue después se descarta
        let slot = (outcome.id - active.job.start_id) as usize;
        if active.settled[slot] {
            debug!("outcome repetido para id {}, descartado", outcome.id);
            return;
        }

        let written = match &outcome.status {
            OutcomeStatus::Success(result) => {
                write_line(&mut active.writer, &success_line(outcome.id, result.clone()))
            }
            _ => match ErrorLogEntry::from_outcome(&outcome, &active.file_name) {
                Some(entry) => write_line(&mut self.error_log, &entry),
                None => Ok(()),
            },
        };

        if let Err(e) = written {
            error!("error escribiendo outcome {}: {}", outcome.id, e);
            self.io_error = Some(e);
            self.failed.store(true, Ordering::SeqCst);
            return;
        }

        active.settled[slot] = true;
        active.counts.record(&outcome.status);
        self.summary.record(&outcome.status);

        debug!("registro {} -> {}", outcome.id, status_label(&outcome.status));

        let done = active.counts.total_processed;
        if done % active.progress_step == 0 || done == active.job.record_count as u64 {
            info!(
                "progreso {}: {}/{} (ok={}, errores={}, timeouts={})",
                active.file_name,
                done,
                active.job.record_count,
                active.counts.total_success,
                active.counts.total_errors,
                active.counts.total_timeouts
            );
        }
    }

    fn close(&mut self) -> Result<FileSummary, EngineError> {
        let active = self
            .active
            .take()
            .ok_or_else(|| EngineError::Sink("no hay archivo abierto".to_string()))?;
        self.check()?;

        let ActiveFile {
            job,
            mut writer,
            settled,
            counts,
            ..
        } = active;
        writer.flush()?;
        drop(writer);

        let missing = settled.iter().filter(|s| !**s).count();
        if missing > 0 {
            return Err(EngineError::Sink(format!(
                "{} registro(s) de {} quedaron sin outcome",
                missing,
                job.input_path.display()
            )));
        }

        Ok(FileSummary {
            input_path: job.input_path,
            output_path: job.output_path,
            record_count: job.record_count,
            counts,
        })
    }

    fn finish(&mut self) -> Result<RunSummary, EngineError> {
        self.check()?;
        if let Some(active) = &self.active {
            return Err(EngineError::Sink(format!(
                "{} quedó abierto al terminar",
                active.job.output_path.display()
            )));
        }
        self.error_log.flush()?;
        Ok(self.summary)
    }

    fn check(&mut self) -> Result<(), EngineError> {
        if let Some(e) = self.io_error.take() {
            return Err(EngineError::Io(e));
        }
        if self.failed.load(Ordering::SeqCst) {
            return Err(EngineError::Sink(
                "detenido por un error de escritura previo".to_string(),
            ));
        }
        Ok(())
    }
}

/// Una línea JSON completa por llamada, y flush inmediato: si el proceso muere,
/// el archivo termina en una línea entera.
fn write_line<T: Serialize>(writer: &mut BufWriter<File>, value: &T) -> io::Result<()> {
    let mut line = serde_json::to_string(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    writer.flush()
}

fn status_label(status: &OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Success(_) => "SUCCESS",
        OutcomeStatus::DomainError(_) => "ERROR",
        OutcomeStatus::Timeout(_) => "TIMEOUT",
    }
}
