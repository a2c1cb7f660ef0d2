use common::{DomainError, EngineError, Outcome, Record, RecordId};
use serde_json::Value;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tokio::{
    sync::{oneshot, Semaphore},
    task::JoinSet,
    time,
};
use tracing::{debug, warn};

use crate::processor::Processor;
use crate::sink::SinkHandle;

/// Pool acotado de unidades de ejecución, compartido por toda la corrida.
///
/// Ciclo de vida de cada registro: Queued -> Dispatched -> {Completed | Failed | TimedOut}.
/// - La admisión es FIFO (el semáforo de tokio es justo).
/// - Cada unidad corre en su propio hilo del sistema; su timer arranca cuando el hilo arranca.
/// - Si el timer gana, el slot se libera en ese momento y el resultado tardío
///   de la unidad se descarta.
pub struct Scheduler {
    permits: Arc<Semaphore>,
    concurrency: usize,
    timeout: Duration,
    processor: Arc<dyn Processor>,
    options: Arc<Value>,
    dispatched: Arc<AtomicUsize>,
    peak_dispatched: Arc<AtomicUsize>,
}

impl Scheduler {
    /// `concurrency` debe ser >= 1 (lo valida RunConfig).
    pub fn new(
        concurrency: usize,
        timeout: Duration,
        processor: Arc<dyn Processor>,
        options: Value,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            timeout,
            processor,
            options: Arc::new(options),
            dispatched: Arc::new(AtomicUsize::new(0)),
            peak_dispatched: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Máximo de unidades en estado Dispatched observado desde que se creó.
    pub fn peak_dispatched(&self) -> usize {
        self.peak_dispatched.load(Ordering::SeqCst)
    }

    /// Despacha todos los registros de un FileJob y espera a que cada uno
    /// tenga su Outcome entregado al sink.
    ///
    /// Se bloquea sólo cuando el pool está lleno. Deja de admitir registros
    /// si el sink reporta un error de escritura (la corrida va a abortar).
    pub async fn run_file(&self, records: Vec<Record>, sink: &SinkHandle) -> Result<(), EngineError> {
        let mut units = JoinSet::new();

        for record in records {
            if sink.has_failed() {
                warn!("sink con error, no se despachan más registros");
                break;
            }

            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Scheduler("pool de ejecución cerrado".to_string()))?;

            let now = self.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_dispatched.fetch_max(now, Ordering::SeqCst);

            let processor = self.processor.clone();
            let options = self.options.clone();
            let limit = self.timeout;
            let dispatched = self.dispatched.clone();
            let sink = sink.clone();

            units.spawn(async move {
                let outcome = dispatch(record, processor, options, limit).await;
                sink.record(outcome);
                // primero el contador, después el permiso: nunca más de C a la vez
                dispatched.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }

        while let Some(res) = units.join_next().await {
            res.map_err(|e| EngineError::Scheduler(format!("tarea de despacho falló: {e}")))?;
        }

        Ok(())
    }
}

/// Corre una unidad y compite contra el timer. Siempre devuelve exactamente un Outcome.
async fn dispatch(
    record: Record,
    processor: Arc<dyn Processor>,
    options: Arc<Value>,
    limit: Duration,
) -> Outcome {
    let Record {
        id,
        local_index,
        payload,
        ..
    } = record;

    let (started_tx, started_rx) = oneshot::channel();
    let (tx, rx) = oneshot::channel();

    // hilo propio por unidad: una unidad abandonada nunca ocupa el pool de bloqueo de tokio
    let spawned = thread::Builder::new()
        .name(format!("unidad-{id}"))
        .spawn(move || {
            let _ = started_tx.send(());
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                processor.process(&payload, &options)
            }))
            .unwrap_or_else(|p| Err(DomainError::new(panic_message(id, p))));

            // si el timer ya disparó, el receptor no existe y el resultado se pierde
            if tx.send(result).is_err() {
                debug!("registro {} terminó después de su timeout; resultado descartado", id);
            }
        });

    if let Err(e) = spawned {
        warn!("no se pudo lanzar la unidad del registro {}: {}", id, e);
        return Outcome::error(id, local_index, format!("no se pudo lanzar la unidad: {e}"));
    }

    // el timer corre desde que la unidad arrancó, no desde que se pidió el hilo
    if started_rx.await.is_err() {
        return Outcome::error(id, local_index, "la unidad de ejecución terminó sin arrancar");
    }

    match time::timeout(limit, rx).await {
        Ok(Ok(Ok(value))) => Outcome::success(id, local_index, value),
        Ok(Ok(Err(e))) => Outcome::error(id, local_index, e.message),
        Ok(Err(_)) => Outcome::error(id, local_index, "la unidad de ejecución terminó sin resultado"),
        Err(_) => {
            warn!("registro {} superó el timeout de {:?}, se abandona", id, limit);
            Outcome::timeout(id, local_index)
        }
    }
}

fn panic_message(id: RecordId, payload: Box<dyn Any + Send>) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic sin mensaje".to_string()
    };
    warn!("panic en el procesador para el registro {}: {}", id, detail);
    format!("panic: {}", detail)
}
