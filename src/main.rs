mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use analysis_driver::{
    run_exchange, Evaluator, InterfaceError, LinearSurrogate, OutputFormat, Rosenbrock,
    SurrogateEvaluator, TextBook, TrainingData,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ModelKind;

const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Parser, Debug)]
#[command(name = "driver")]
#[command(version)]
#[command(about = "Evaluate a parameter file and write the requested results")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Parameter file written by the optimization engine
    params: Option<PathBuf>,

    /// Results file to write
    results: Option<PathBuf>,

    /// Path to TOML driver configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Evaluator to run (overrides the config)
    #[arg(short, long, value_enum)]
    model: Option<ModelKind>,

    /// Results format (overrides the config)
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Fitted surrogate written by `driver fit` (overrides the config)
    #[arg(long)]
    surrogate: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fit a linear surrogate and save it as JSON
    Fit {
        /// Training data (JSON)
        #[arg(long)]
        training: PathBuf,
        /// Where to write the fitted model
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Validate a configuration file
    Validate,
    /// Print version information
    Version,
}

fn load_config(path: Option<&Path>) -> Result<config::Root> {
    let cfg = match path {
        Some(path) => config::Root::load(path)?,
        None => config::Root::default(),
    };
    cfg.validate().map_err(|e| InterfaceError::Config(format!("{e:#}")))?;
    Ok(cfg)
}

fn load_surrogate(cfg: &config::Root, override_path: Option<&Path>) -> Result<LinearSurrogate> {
    let model_path = override_path.or(cfg.surrogate.model.as_deref());
    if let Some(path) = model_path {
        let model = LinearSurrogate::load(path)
            .with_context(|| format!("failed to load surrogate: {}", path.display()))?;
        info!(path = %path.display(), dims = model.dims(), "loaded surrogate");
        return Ok(model);
    }
    let Some(training) = cfg.surrogate.training.as_deref() else {
        bail!(InterfaceError::Config(
            "surrogate model needs --surrogate or [surrogate] model/training".to_string()
        ));
    };
    let data = TrainingData::load(training)
        .with_context(|| format!("failed to read training data: {}", training.display()))?;
    Ok(LinearSurrogate::fit(&cfg.surrogate.options, &data)?)
}

fn run_evaluation(args: &Args, params: &Path, results: &Path) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let model = args.model.unwrap_or(cfg.driver.model);
    let format = args.format.unwrap_or(cfg.driver.format);

    let surrogate;
    let evaluator: Box<dyn Evaluator + '_> = match model {
        ModelKind::Surrogate => {
            surrogate = load_surrogate(&cfg, args.surrogate.as_deref())?;
            Box::new(SurrogateEvaluator::new(&surrogate))
        }
        ModelKind::Rosenbrock => Box::new(Rosenbrock),
        ModelKind::TextBook => Box::new(TextBook),
    };

    run_exchange(params, results, evaluator.as_ref(), format)
        .with_context(|| format!("evaluation of {} failed", params.display()))?;
    Ok(())
}

fn run_fit(args: &Args, training: &Path, out: &Path) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let data = TrainingData::load(training)
        .with_context(|| format!("failed to read training data: {}", training.display()))?;
    let model = LinearSurrogate::fit(&cfg.surrogate.options, &data)?;
    model.save(out)?;

    eprintln!("[driver] fitted {} inputs from {} samples", model.dims(), data.samples.len());
    eprintln!("  bias:  {:.6e}", model.bias());
    eprintln!("  slope: {:?}", model.slope());
    eprintln!("[driver] model: {}", out.display());
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        bail!(InterfaceError::Config("--config required for validate".to_string()));
    };
    let cfg = load_config(Some(path))?;

    eprintln!("[driver] config valid: {}", path.display());
    eprintln!("  driver: model={:?}, format={}", cfg.driver.model, cfg.driver.format);
    eprintln!(
        "  surrogate: degree={}, singular_tolerance={:e}",
        cfg.surrogate.options.degree, cfg.surrogate.options.singular_tolerance
    );
    if let Some(model) = &cfg.surrogate.model {
        eprintln!("  surrogate model: {}", model.display());
    }
    if let Some(training) = &cfg.surrogate.training {
        eprintln!("  training data: {}", training.display());
    }
    if let Some(labels) = &cfg.surrogate.options.variable_labels {
        eprintln!("  variable labels: {}", labels.join(", "));
    }
    Ok(())
}

fn print_version() {
    eprintln!("driver - parameter/results exchange for external optimization engines");
    eprintln!();
    eprintln!("  Driver Version:    {}", env!("CARGO_PKG_VERSION"));
    eprintln!("  Schema Version:    {}", SCHEMA_VERSION);
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("Models:");
    eprintln!("  - surrogate:  degree-1 least-squares regression");
    eprintln!("  - rosenbrock: 100 (x2 - x1^2)^2 + (1 - x1)^2");
    eprintln!("  - text_book:  sum (xi - 1)^4 with two quadratic constraints");
    eprintln!();
    eprintln!("Results formats:");
    eprintln!("  - legacy: fixed-width text, bracketed gradients and hessians");
    eprintln!("  - json:   functions/gradients/hessians/metadata document");
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "analysis_driver=info,driver=info"
    } else {
        "warn"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Some(Commands::Version) => {
            print_version();
            Ok(())
        }
        Some(Commands::Validate) => validate_config(args.config.as_deref()),
        Some(Commands::Fit { training, out }) => run_fit(args, training, out),
        None => {
            let (Some(params), Some(results)) = (args.params.as_deref(), args.results.as_deref())
            else {
                bail!(InterfaceError::Config(
                    "<params_file> and <results_file> are required".to_string()
                ));
            };
            run_evaluation(args, params, results)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let category = err
                .chain()
                .find_map(|e| e.downcast_ref::<InterfaceError>())
                .map_or("ConfigError", InterfaceError::category);
            eprintln!("error[{category}]: {err:#}");
            ExitCode::FAILURE
        }
    }
}
