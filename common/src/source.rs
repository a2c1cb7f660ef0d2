use std::{fs, io, path::Path};

/// Productor de bloques opacos a partir del contenido de un archivo.
/// La secuencia es finita, ordenada y se puede repetir por archivo.
pub trait RecordSource: Send + Sync {
    fn blocks(&self, contents: &str) -> Vec<String>;

    /// Lee el archivo completo a memoria y lo parte en bloques.
    fn read_blocks(&self, path: &Path) -> io::Result<Vec<String>> {
        let contents = fs::read_to_string(path)?;
        Ok(self.blocks(&contents))
    }
}

/// Partidor de archivos CGD: cada bloque va desde una línea con palabra
/// clave (TILING, NET, CRYSTAL, ...) hasta la siguiente línea `END`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CgdSource;

impl RecordSource for CgdSource {
    fn blocks(&self, contents: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current: Option<Vec<&str>> = None;

        for line in contents.lines() {
            let trimmed = line.trim();
            let first = trimmed.split_whitespace().next().unwrap_or("");

            match current.as_mut() {
                None => {
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    // un END suelto fuera de bloque se ignora
                    if first.eq_ignore_ascii_case("END") {
                        continue;
                    }
                    current = Some(vec![line]);
                }
                Some(lines) => {
                    lines.push(line);
                    if first.eq_ignore_ascii_case("END") {
                        if let Some(done) = current.take() {
                            out.push(done.join("\n"));
                        }
                    }
                }
            }
        }

        // bloque sin END al final: se entrega igual, que decida el procesador
        if let Some(rest) = current {
            out.push(rest.join("\n"));
        }

        out
    }
}
