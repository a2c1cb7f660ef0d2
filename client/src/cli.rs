use anyhow::{Context, Result};
use clap::Parser;
use common::{CgdSource, ConfigError, PathPlan, RunReport};
use serde_json::Value;
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use worker::{run_with_plan, CommandProcessor, RunConfig, DEFAULT_THREADS, DEFAULT_TIMEOUT_MS};

/// Opciones que recibe el procesador de dominio si no se pasa --options.
const DEFAULT_OPTIONS: &str = r#"{"xExtent3d":1,"yExtent3d":1,"zExtent3d":1,"tileScale":1}"#;

const DEFAULT_LOG_FILTER: &str = "client=info,worker=info,common=info";

#[derive(Parser, Debug)]
#[command(name = "tilebatch")]
#[command(about = "Procesa en paralelo las estructuras de archivos .cgd con un procesador externo")]
#[command(version)]
struct Cli {
    /// Archivo *3dt.cgd o directorio con archivos *3dt.cgd
    #[arg(short, long, value_name = "ARCHIVO_O_DIR")]
    input: PathBuf,

    /// Directorio de salida, o archivo .jsonl si la entrada es un solo archivo
    #[arg(short, long, default_value = "output_dir")]
    output: PathBuf,

    /// Log de errores compartido (.jsonl)
    #[arg(short, long, default_value = "error_dir/errors.jsonl")]
    errors: PathBuf,

    /// Cantidad máxima de estructuras procesándose a la vez
    #[arg(long, env = "TILEBATCH_THREADS", default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Timeout por estructura, en milisegundos
    #[arg(long, env = "TILEBATCH_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout: u64,

    /// JSON que se pasa sin cambios al procesador
    #[arg(long, default_value = DEFAULT_OPTIONS)]
    options: String,

    /// Programa (y argumentos) que procesa un bloque: lo lee por stdin y escribe JSON
    #[arg(last = true, required = true, value_name = "PROCESADOR")]
    processor: Vec<String>,
}

/// Punto de entrada del binario. Código 0 al completar (aunque haya
/// errores o timeouts por registro), 1 ante cualquier error de setup o IO.
pub fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("No se pudo crear el runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(run(cli));

    // Puede haber unidades abandonadas por timeout todavía corriendo; no las esperamos
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fallo crítico: {e:#}");
            eprintln!("Critical Failure: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<RunConfig, ConfigError> {
    let options: Value = serde_json::from_str(&cli.options)?;
    let config = RunConfig {
        input: cli.input.clone(),
        output: cli.output.clone(),
        errors: cli.errors.clone(),
        concurrency: cli.threads,
        timeout: Duration::from_millis(cli.timeout),
        options,
    };
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let processor =
        CommandProcessor::from_argv(&cli.processor).context("falta el programa procesador")?;

    // Todo lo de configuración falla acá, antes de leer ningún archivo
    let plan = PathPlan::resolve(&config.input, &config.output, &config.errors)?;

    println!("\n=============================================");
    println!("Entrada:         {}", cli.input.display());
    println!("Salida:          {}", plan.output_location.display());
    println!("Log de errores:  {}", plan.error_log_path.display());
    println!("Threads:         {}", config.concurrency);
    println!("Timeout (ms):    {}", cli.timeout);
    println!("Procesador:      {}", processor.describe());
    println!("=============================================\n");
    println!("Encontrados {} archivo(s) para procesar.", plan.input_files.len());

    info!(
        "arrancando corrida con threads={} timeout={}ms",
        config.concurrency, cli.timeout
    );

    let report = run_with_plan(plan, &config, &CgdSource, Arc::new(processor)).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let s = &report.summary;
    println!("\n=============================================");
    println!("Job completo.");
    println!("Tiempo total:      {:.2}s", report.duration_secs());
    println!("Estructuras:       {} (entrada)", s.total_processed);
    println!("Exitosas:          {}", s.total_success);
    println!("Errores:           {}", s.total_errors);
    println!("Timeouts:          {}", s.total_timeouts);
    println!("Salida:            {}", report.plan.output_location.display());
    println!("Log de errores:    {}", report.plan.error_log_path.display());
    println!("=============================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_usa_defaults_y_captura_el_procesador() {
        let cli = Cli::try_parse_from(["tilebatch", "-i", "data", "--", "node", "worker.js"]).unwrap();
        assert_eq!(cli.input, PathBuf::from("data"));
        assert_eq!(cli.output, PathBuf::from("output_dir"));
        assert_eq!(cli.errors, PathBuf::from("error_dir/errors.jsonl"));
        assert_eq!(cli.processor, vec!["node", "worker.js"]);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.concurrency, DEFAULT_THREADS);
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.options["tileScale"], serde_json::json!(1));
    }

    #[test]
    fn cli_acepta_flags_cortos_y_largos() {
        let cli = Cli::try_parse_from([
            "tilebatch", "-i", "a_3dt.cgd", "-o", "res.jsonl", "-e", "e/err.jsonl",
            "--threads", "4", "--timeout", "250", "--", "./proc",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.output, PathBuf::from("res.jsonl"));
    }

    #[test]
    fn cli_exige_input_y_procesador() {
        assert!(Cli::try_parse_from(["tilebatch", "--", "proc"]).is_err());
        assert!(Cli::try_parse_from(["tilebatch", "-i", "data"]).is_err());
    }

    #[test]
    fn build_config_rechaza_valores_invalidos() {
        let cli = Cli::try_parse_from(["tilebatch", "-i", "d", "--threads", "0", "--", "p"]).unwrap();
        assert!(matches!(build_config(&cli), Err(ConfigError::Concurrency(0))));

        let cli = Cli::try_parse_from(["tilebatch", "-i", "d", "--timeout", "0", "--", "p"]).unwrap();
        assert!(matches!(build_config(&cli), Err(ConfigError::Timeout)));

        let cli = Cli::try_parse_from(["tilebatch", "-i", "d", "--options", "{no", "--", "p"]).unwrap();
        assert!(matches!(build_config(&cli), Err(ConfigError::Options(_))));
    }
}
