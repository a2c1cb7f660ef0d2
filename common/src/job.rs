use std::{ops::Range, path::PathBuf};

pub type RecordId = u64;

/// Una unidad de trabajo: un bloque extraído de un archivo de entrada.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: RecordId,
    pub source_file: PathBuf,
    pub local_index: usize,
    /// Contenido opaco del bloque; el core nunca lo inspecciona.
    pub payload: String,
}

/// Trabajo por archivo de entrada, dueño de un rango contiguo de ids.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub input_path: PathBuf,
    pub record_count: usize,
    pub output_path: PathBuf,
    pub start_id: RecordId,
    /// Exclusivo: el último id del archivo es `end_id - 1`.
    pub end_id: RecordId,
}

impl FileJob {
    /// Nombre base del archivo de entrada (lo que va al log de errores).
    pub fn file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input_path.to_string_lossy().to_string())
    }

    pub fn ids(&self) -> Range<RecordId> {
        self.start_id..self.end_id
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.ids().contains(&id)
    }

    /// Convierte los bloques del archivo en Records con su id global.
    pub fn records(&self, blocks: Vec<String>) -> Vec<Record> {
        blocks
            .into_iter()
            .enumerate()
            .map(|(local_index, payload)| Record {
                id: self.start_id + local_index as RecordId,
                source_file: self.input_path.clone(),
                local_index,
                payload,
            })
            .collect()
    }
}

/// Asignador global de ids: los FileJobs se piden en orden de entrada y
/// cada uno recibe el rango que sigue al anterior, sin huecos ni reuso.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: RecordId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserva `record_count` ids y devuelve el FileJob correspondiente.
    pub fn allocate(
        &mut self,
        input_path: PathBuf,
        output_path: PathBuf,
        record_count: usize,
    ) -> FileJob {
        let start_id = self.next;
        self.next += record_count as RecordId;
        FileJob {
            input_path,
            record_count,
            output_path,
            start_id,
            end_id: self.next,
        }
    }

    /// Total de ids asignados hasta ahora.
    pub fn allocated(&self) -> RecordId {
        self.next
    }
}
