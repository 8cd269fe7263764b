use ferret_core::artifact::write_session_report;
use ferret_core::config::{
    ArtifactSettings, FerretConfig, InterpSettings, SessionSettings, TargetSettings,
};
use ferret_core::session::Session;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(short, long)]
    module: Option<String>,
    #[clap(short, long)]
    function: Option<String>,
    #[clap(short = 'p', long = "search-path")]
    search_paths: Vec<PathBuf>,
    #[clap(short, long)]
    timeout: Option<u64>,
    #[clap(short, long)]
    seed: Option<u64>,
    #[clap(long)]
    iterations: Option<u64>,
    #[clap(long)]
    artifact_dir: Option<PathBuf>,
    #[clap(long)]
    report_json: Option<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            FerretConfig::load_from_file(config_path)?
        }
        None => {
            // No config file specified via CLI, try the conventional one
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                FerretConfig::load_from_file(&default_config_path)?
            } else {
                let module = cli.module.clone().ok_or_else(|| {
                    anyhow::anyhow!("Target module missing; pass --module or a config file")
                })?;
                let function = cli.function.clone().ok_or_else(|| {
                    anyhow::anyhow!("Target function missing; pass --function or a config file")
                })?;
                FerretConfig {
                    target: TargetSettings { module, function },
                    search_paths: Vec::new(),
                    session: SessionSettings::default(),
                    interp: InterpSettings::default(),
                    artifacts: ArtifactSettings::default(),
                }
            }
        }
    };

    if let Some(module) = cli.module {
        config.target.module = module;
    }
    if let Some(function) = cli.function {
        config.target.function = function;
    }
    if !cli.search_paths.is_empty() {
        config.search_paths = cli.search_paths;
    }
    if let Some(timeout) = cli.timeout {
        config.session.timeout_secs = timeout;
    }
    if let Some(seed) = cli.seed {
        config.session.seed = Some(seed);
    }
    if let Some(iterations) = cli.iterations {
        config.session.max_iterations = Some(iterations);
    }
    if let Some(dir) = cli.artifact_dir {
        config.artifacts.dir = dir;
    }
    if let Some(path) = cli.report_json {
        config.artifacts.report_json = Some(path);
    }

    println!("Effective configuration: {config:#?}");

    let report_json = config.artifacts.report_json.clone();
    let mut session = Session::new(config)?;
    println!("Running session with seed {}", session.seed());
    let report = session.run()?;

    println!("Seeds found: {}", report.corpus_size);
    println!("Faults found: {}", report.fault_kinds.len());
    println!("Time elapsed: {} ms", report.elapsed_ms);

    if let Some(path) = report_json {
        write_session_report(&path, &report)?;
        println!("Session report written to {}", path.display());
    }

    Ok(())
}
