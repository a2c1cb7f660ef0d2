use common::DomainError;
use serde_json::Value;
use std::{
    io::Write,
    process::{Command, Stdio},
    thread,
};

/// Variable de entorno con la que el proceso externo recibe las opciones.
pub const OPTIONS_ENV_VAR: &str = "TILEBATCH_OPTIONS";

/// Cómputo de dominio opaco: bloque -> resultado serializable, o error.
/// Corre dentro de un hilo aislado, sin estado mutable compartido con el scheduler.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, payload: &str, options: &Value) -> Result<Value, DomainError>;
}

impl<F> Processor for F
where
    F: Fn(&str, &Value) -> Result<Value, DomainError> + Send + Sync + 'static,
{
    fn process(&self, payload: &str, options: &Value) -> Result<Value, DomainError> {
        self(payload, options)
    }
}

/// Procesador que delega en un programa externo por registro:
/// - el bloque va por stdin
/// - las opciones van en TILEBATCH_OPTIONS
/// - stdout debe ser un único valor JSON
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    program: String,
    args: Vec<String>,
}

impl CommandProcessor {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Construye el procesador desde `[programa, args...]`.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    pub fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Processor for CommandProcessor {
    fn process(&self, payload: &str, options: &Value) -> Result<Value, DomainError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(OPTIONS_ENV_VAR, options.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DomainError::new(format!("no se pudo lanzar {}: {e}", self.program)))?;

        // stdin se escribe en otro hilo mientras se drena stdout
        let writer = child.stdin.take().map(|mut stdin| {
            let bytes = payload.as_bytes().to_vec();
            thread::spawn(move || {
                // un proceso que no lee stdin lo cierra: cuenta su código de salida
                let _ = stdin.write_all(&bytes);
            })
        });

        let output = child
            .wait_with_output()
            .map_err(|e| DomainError::new(format!("error esperando a {}: {e}", self.program)))?;

        if let Some(writer) = writer {
            let _ = writer.join();
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let msg = if stderr.is_empty() {
                format!("{} terminó con {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(DomainError::new(msg));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DomainError::new(format!("salida no es JSON válido: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closure_implementa_processor() {
        let p = |payload: &str, opts: &Value| -> Result<Value, DomainError> {
            Ok(json!({ "len": payload.len(), "scale": opts["tileScale"] }))
        };
        let out = p.process("abcd", &json!({"tileScale": 2})).unwrap();
        assert_eq!(out, json!({"len": 4, "scale": 2}));
    }

    #[test]
    fn from_argv_requiere_programa() {
        assert!(CommandProcessor::from_argv(&[]).is_none());
        let p = CommandProcessor::from_argv(&["node".into(), "worker.js".into()]).unwrap();
        assert_eq!(p.describe(), "node worker.js");
    }

    #[cfg(unix)]
    #[test]
    fn command_processor_lee_stdin_y_devuelve_json() {
        let p = CommandProcessor::new(
            "sh",
            [
                "-c",
                r#"n=$(wc -c); printf '{"bytes":%d,"opts":%s}' "$n" "$TILEBATCH_OPTIONS""#,
            ],
        );
        let out = p.process("hola", &json!({"tileScale": 1})).unwrap();
        assert_eq!(out["bytes"], json!(4));
        assert_eq!(out["opts"], json!({"tileScale": 1}));
    }

    #[cfg(unix)]
    #[test]
    fn command_processor_convierte_salida_no_cero_en_domain_error() {
        let p = CommandProcessor::new("sh", ["-c", "cat >/dev/null; echo 'bloque inválido' >&2; exit 3"]);
        let err = p.process("x", &json!({})).unwrap_err();
        assert_eq!(err.message, "bloque inválido");

        let p = CommandProcessor::new("sh", ["-c", "cat >/dev/null; echo no-es-json"]);
        assert!(p.process("x", &json!({})).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_processor_no_se_traba_con_bloques_grandes() {
        // más que el buffer de un pipe en ambas direcciones
        let payload = format!("\"{}\"", "x".repeat(200 * 1024));
        let (tx, rx) = std::sync::mpsc::channel();
        let input = payload.clone();
        thread::spawn(move || {
            let p = CommandProcessor::new("cat", Vec::<String>::new());
            let _ = tx.send(p.process(&input, &json!({})));
        });

        let out = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("cat no devolvió a tiempo")
            .unwrap();
        assert_eq!(out.as_str().map(str::len), Some(200 * 1024));
    }

    #[test]
    fn command_processor_programa_inexistente_es_domain_error() {
        let p = CommandProcessor::new("/no/existe/este-programa", Vec::<String>::new());
        assert!(p.process("x", &json!({})).is_err());
    }
}
