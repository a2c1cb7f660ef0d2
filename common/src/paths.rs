use glob::{glob, Pattern};
use std::{
    collections::HashMap,
    fs, io,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Convención de nombre de los archivos de registros.
pub const RECORD_FILE_SUFFIX: &str = "3dt.cgd";
/// Sufijo que reemplaza a RECORD_FILE_SUFFIX en los archivos de salida.
pub const OUTPUT_FILE_SUFFIX: &str = "_output.jsonl";
pub const JSONL_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    File,
    Directory,
}

/// Plan de rutas de la corrida. Se calcula una vez y no cambia.
#[derive(Debug, Clone)]
pub struct PathPlan {
    pub input_mode: InputMode,
    pub output_mode: OutputMode,
    /// Archivos de entrada, en el orden en que se procesan.
    pub input_files: Vec<PathBuf>,
    /// Directorio de salida (modo Directory) o archivo de salida (modo File).
    pub output_location: PathBuf,
    pub error_log_path: PathBuf,
}

impl PathPlan {
    /// Resuelve y valida contra el directorio actual. No toca el disco.
    pub fn resolve(input: &Path, output: &Path, errors: &Path) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
        Self::resolve_from(&cwd, input, output, errors)
    }

    /// Igual que `resolve`, pero las rutas relativas se resuelven contra `base`.
    pub fn resolve_from(
        base: &Path,
        input: &Path,
        output: &Path,
        errors: &Path,
    ) -> Result<Self, ConfigError> {
        let abs_input = absolutize(base, input);
        let abs_output = absolutize(base, output);
        let error_log_path = absolutize(base, errors);

        if !abs_input.exists() {
            return Err(ConfigError::InputNotFound(abs_input));
        }

        // Si la entrada es un archivo, el contexto es su directorio padre
        let (input_mode, input_context) = if abs_input.is_dir() {
            (InputMode::Directory, abs_input.clone())
        } else {
            (InputMode::File, parent_of(&abs_input))
        };

        let output_mode = match input_mode {
            InputMode::Directory => OutputMode::Directory,
            InputMode::File => {
                if abs_output.is_dir() || abs_output.extension().is_none() {
                    OutputMode::Directory
                } else {
                    OutputMode::File
                }
            }
        };

        if output_mode == OutputMode::File && !has_jsonl_extension(&abs_output) {
            return Err(ConfigError::JsonlSuffix {
                label: "el archivo de salida",
                path: abs_output,
            });
        }

        if !has_jsonl_extension(&error_log_path) {
            return Err(ConfigError::JsonlSuffix {
                label: "el log de errores",
                path: error_log_path,
            });
        }
        if error_log_path.is_dir() {
            return Err(ConfigError::ErrorLogIsDirectory(error_log_path));
        }

        let output_dir = match output_mode {
            OutputMode::Directory => abs_output.clone(),
            OutputMode::File => parent_of(&abs_output),
        };
        let error_dir = parent_of(&error_log_path);

        // Unicidad estricta: ninguna corrida lee su propia salida
        let to_check = [
            ("Input Context", &input_context),
            ("Output Directory", &output_dir),
            ("Error Directory", &error_dir),
        ];
        for (i, (a_label, a_path)) in to_check.iter().enumerate() {
            for (b_label, b_path) in to_check.iter().skip(i + 1) {
                if a_path == b_path {
                    return Err(ConfigError::PathCollision {
                        a: *a_label,
                        b: *b_label,
                        path: a_path.to_path_buf(),
                    });
                }
            }
        }

        for (label, dir) in [("Output Directory", &output_dir), ("Error Directory", &error_dir)] {
            if dir.exists() && !dir.is_dir() {
                return Err(ConfigError::NotADirectory {
                    label,
                    path: dir.to_path_buf(),
                });
            }
        }

        let input_files = match input_mode {
            InputMode::Directory => discover_record_files(&abs_input)?,
            InputMode::File => {
                let name = abs_input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !name.ends_with(RECORD_FILE_SUFFIX) {
                    return Err(ConfigError::InputSuffix {
                        path: abs_input,
                        suffix: RECORD_FILE_SUFFIX,
                    });
                }
                vec![abs_input]
            }
        };

        let plan = Self {
            input_mode,
            output_mode,
            input_files,
            output_location: abs_output,
            error_log_path,
        };
        plan.check_output_names()?;

        debug!(
            "plan de rutas: input={:?} output={:?} ({:?}) errores={:?}",
            plan.input_mode, plan.output_location, plan.output_mode, plan.error_log_path
        );

        Ok(plan)
    }

    /// Dos entradas nunca pueden compartir archivo de salida (`a-3dt.cgd` y `a_3dt.cgd`).
    fn check_output_names(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<PathBuf, &PathBuf> = HashMap::new();
        for input in &self.input_files {
            let output = self.output_path_for(input);
            if let Some(first) = seen.get(&output) {
                return Err(ConfigError::OutputNameCollision {
                    first: first.to_path_buf(),
                    second: input.clone(),
                    output,
                });
            }
            seen.insert(output, input);
        }
        Ok(())
    }

    /// Crea el directorio de salida y el padre del log de errores (idempotente).
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.output_dir())?;
        fs::create_dir_all(parent_of(&self.error_log_path))?;
        info!(
            "directorios listos: salida={} errores={}",
            self.output_dir().display(),
            self.error_log_path.display()
        );
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        match self.output_mode {
            OutputMode::Directory => self.output_location.clone(),
            OutputMode::File => parent_of(&self.output_location),
        }
    }

    /// Ruta de salida determinística para un archivo de entrada.
    pub fn output_path_for(&self, input_file: &Path) -> PathBuf {
        match self.output_mode {
            OutputMode::Directory => self.output_location.join(output_file_name(input_file)),
            OutputMode::File => self.output_location.clone(),
        }
    }
}

/// `a_3dt.cgd` -> `a_output.jsonl`. Quita un separador opcional (`.`, `_`, `-`)
/// más el sufijo de registros, sin distinguir mayúsculas.
pub fn output_file_name(input_file: &Path) -> String {
    let name = input_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = name.trim();

    let stem = if name.to_ascii_lowercase().ends_with(RECORD_FILE_SUFFIX) {
        let cut = &name[..name.len() - RECORD_FILE_SUFFIX.len()];
        cut.strip_suffix(&['.', '_', '-'][..]).unwrap_or(cut)
    } else {
        input_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
    };

    format!("{}{}", stem, OUTPUT_FILE_SUFFIX)
}

/// Archivos regulares `<dir>/*3dt.cgd`, ordenados por nombre.
fn discover_record_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern = format!(
        "{}/*{}",
        Pattern::escape(&dir.to_string_lossy()),
        RECORD_FILE_SUFFIX
    );

    let mut files: Vec<PathBuf> = glob(&pattern)?
        .flatten()
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ConfigError::NoInputFiles {
            dir: dir.to_path_buf(),
            suffix: RECORD_FILE_SUFFIX,
        });
    }

    info!("encontrados {} archivo(s) en {}", files.len(), dir.display());
    Ok(files)
}

fn has_jsonl_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(JSONL_EXTENSION))
        .unwrap_or(false)
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Ruta absoluta normalizada léxicamente (sin `.` ni `..`).
/// No usa canonicalize porque la salida puede no existir todavía.
fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("paths_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "").unwrap();
    }

    #[test]
    fn output_file_name_quita_sufijo_y_separador() {
        assert_eq!(output_file_name(Path::new("d/a_3dt.cgd")), "a_output.jsonl");
        assert_eq!(output_file_name(Path::new("b.3DT.CGD")), "b_output.jsonl");
        assert_eq!(output_file_name(Path::new("rcsr-3dt.cgd")), "rcsr_output.jsonl");
        assert_eq!(output_file_name(Path::new("zeo3dt.cgd")), "zeo_output.jsonl");
    }

    #[test]
    fn absolutize_normaliza_puntos() {
        let base = Path::new("/work/run");
        assert_eq!(absolutize(base, Path::new("./data")), PathBuf::from("/work/run/data"));
        assert_eq!(absolutize(base, Path::new("../x/./y")), PathBuf::from("/work/x/y"));
        assert_eq!(absolutize(base, Path::new("/abs/z")), PathBuf::from("/abs/z"));
    }

    #[test]
    fn directorio_de_entrada_genera_una_salida_por_archivo() {
        let tmp = temp_dir("dir_mode");
        let data = tmp.join("data");
        touch(&data.join("b_3dt.cgd"));
        touch(&data.join("a_3dt.cgd"));
        touch(&data.join("notas.txt"));

        let out = tmp.join("O");
        let plan = PathPlan::resolve_from(&tmp, &data, &out, &tmp.join("errs/err.jsonl")).unwrap();

        assert_eq!(plan.input_mode, InputMode::Directory);
        assert_eq!(plan.output_mode, OutputMode::Directory);
        assert_eq!(
            plan.input_files,
            vec![data.join("a_3dt.cgd"), data.join("b_3dt.cgd")]
        );
        assert_eq!(plan.output_path_for(&plan.input_files[0]), out.join("a_output.jsonl"));
        assert_eq!(plan.output_path_for(&plan.input_files[1]), out.join("b_output.jsonl"));

        // resolve no crea nada; prepare sí
        assert!(!out.exists());
        plan.prepare().unwrap();
        assert!(out.is_dir());
        assert!(tmp.join("errs").is_dir());
    }

    #[test]
    fn entradas_con_la_misma_salida_fallan_antes_de_tocar_el_disco() {
        let tmp = temp_dir("same_output");
        let data = tmp.join("data");
        touch(&data.join("a-3dt.cgd"));
        touch(&data.join("a_3dt.cgd"));

        let out = tmp.join("O");
        let err = PathPlan::resolve_from(&tmp, &data, &out, &tmp.join("errs/err.jsonl")).unwrap_err();
        match err {
            ConfigError::OutputNameCollision { first, second, output } => {
                assert_eq!(first, data.join("a-3dt.cgd"));
                assert_eq!(second, data.join("a_3dt.cgd"));
                assert_eq!(output, out.join("a_output.jsonl"));
            }
            other => panic!("error inesperado: {other:?}"),
        }
        assert!(!out.exists());

        // mismo caso sin separador: a3dt.cgd vs a.3dt.cgd
        let data = tmp.join("data2");
        touch(&data.join("a3dt.cgd"));
        touch(&data.join("a.3dt.cgd"));
        assert!(matches!(
            PathPlan::resolve_from(&tmp, &data, &out, &tmp.join("errs/err.jsonl")),
            Err(ConfigError::OutputNameCollision { .. })
        ));
    }

    #[test]
    fn salida_existente_como_archivo_falla() {
        let tmp = temp_dir("out_is_file");
        touch(&tmp.join("data/a_3dt.cgd"));
        touch(&tmp.join("O"));

        let err = PathPlan::resolve_from(
            &tmp,
            Path::new("data"),
            Path::new("O"),
            Path::new("errs/err.jsonl"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotADirectory { .. }), "{err:?}");
        assert!(!tmp.join("errs").exists());
    }

    #[test]
    fn entrada_y_salida_iguales_fallan_sin_escribir() {
        let tmp = temp_dir("collision");
        touch(&tmp.join("data/a_3dt.cgd"));

        let err = PathPlan::resolve_from(
            &tmp,
            Path::new("./data"),
            Path::new("./data"),
            Path::new("./data/err.jsonl"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PathCollision { .. }), "{err:?}");
        assert!(!tmp.join("data/err.jsonl").exists());
    }

    #[test]
    fn salida_y_errores_en_el_mismo_directorio_fallan() {
        let tmp = temp_dir("collision_out_err");
        touch(&tmp.join("data/a_3dt.cgd"));

        let err = PathPlan::resolve_from(
            &tmp,
            Path::new("data"),
            Path::new("out"),
            Path::new("out/err.jsonl"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PathCollision { .. }));
    }

    #[test]
    fn entrada_inexistente_falla() {
        let tmp = temp_dir("missing");
        let err = PathPlan::resolve_from(
            &tmp,
            Path::new("nada"),
            Path::new("out"),
            Path::new("errs/e.jsonl"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InputNotFound(_)));
    }

    #[test]
    fn archivo_de_entrada_elige_modo_de_salida() {
        let tmp = temp_dir("file_mode");
        let input = tmp.join("data/x_3dt.cgd");
        touch(&input);
        let errs = tmp.join("errs/e.jsonl");

        // sin extensión -> directorio
        let plan = PathPlan::resolve_from(&tmp, &input, Path::new("salida"), &errs).unwrap();
        assert_eq!(plan.input_mode, InputMode::File);
        assert_eq!(plan.output_mode, OutputMode::Directory);
        assert_eq!(plan.output_path_for(&input), tmp.join("salida/x_output.jsonl"));

        // .jsonl -> archivo
        let plan =
            PathPlan::resolve_from(&tmp, &input, Path::new("res/final.jsonl"), &errs).unwrap();
        assert_eq!(plan.output_mode, OutputMode::File);
        assert_eq!(plan.output_path_for(&input), tmp.join("res/final.jsonl"));
        assert_eq!(plan.output_dir(), tmp.join("res"));

        // otra extensión -> error
        let err =
            PathPlan::resolve_from(&tmp, &input, Path::new("res/final.json"), &errs).unwrap_err();
        assert!(matches!(err, ConfigError::JsonlSuffix { .. }));

        // un directorio existente con punto en el nombre sigue siendo directorio
        fs::create_dir_all(tmp.join("v1.0")).unwrap();
        let plan = PathPlan::resolve_from(&tmp, &input, Path::new("v1.0"), &errs).unwrap();
        assert_eq!(plan.output_mode, OutputMode::Directory);
    }

    #[test]
    fn log_de_errores_debe_ser_jsonl() {
        let tmp = temp_dir("err_suffix");
        touch(&tmp.join("data/a_3dt.cgd"));

        let err = PathPlan::resolve_from(
            &tmp,
            Path::new("data"),
            Path::new("out"),
            Path::new("errs/errores.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::JsonlSuffix { .. }));
    }

    #[test]
    fn archivo_de_entrada_sin_sufijo_falla() {
        let tmp = temp_dir("bad_input_suffix");
        let input = tmp.join("data/x.cgd");
        touch(&input);

        let err = PathPlan::resolve_from(&tmp, &input, Path::new("out"), Path::new("e/e.jsonl"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InputSuffix { .. }));
    }

    #[test]
    fn directorio_sin_archivos_validos_falla() {
        let tmp = temp_dir("empty_dir");
        touch(&tmp.join("data/readme.md"));

        let err = PathPlan::resolve_from(
            &tmp,
            Path::new("data"),
            Path::new("out"),
            Path::new("e/e.jsonl"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoInputFiles { .. }));
    }
}
