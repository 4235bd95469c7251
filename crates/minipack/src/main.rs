use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{ArgAction, Parser};
use log::{LevelFilter, debug};
use minipack::{
    config::{Config, normalize_extension},
    orchestrator::{BundleOrchestrator, write_graph_manifest},
};

#[derive(Parser, Debug)]
#[command(name = "minipack", version, about = "Bundle JavaScript modules into a single script")]
struct Cli {
    /// Entry module
    #[arg(short, long)]
    entry: PathBuf,

    /// Output bundle path; the bundle is written to stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file to use instead of ./minipack.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the module graph as JSON to this path
    #[arg(long, value_name = "FILE")]
    emit_graph: Option<PathBuf>,

    /// Re-run module factories on every require instead of caching exports
    #[arg(long)]
    no_module_cache: bool,

    /// Omit the path comment above each module factory
    #[arg(long)]
    no_module_comments: bool,

    /// Fail the build on any circular import
    #[arg(long)]
    reject_cycles: bool,

    /// Resolve directory imports to `<dir>/index<ext>`
    #[arg(long)]
    index_files: bool,

    /// Extension to try for extensionless specifiers (repeatable, in order)
    #[arg(long = "extension", value_name = "EXT")]
    extensions: Vec<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if self.no_module_cache {
            config.module_cache = false;
        }
        if self.no_module_comments {
            config.module_comments = false;
        }
        if self.reject_cycles {
            config.reject_cycles = true;
        }
        if self.index_files {
            config.index_files = true;
        }
        if !self.extensions.is_empty() {
            config.extensions = self
                .extensions
                .iter()
                .cloned()
                .map(normalize_extension)
                .collect();
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    debug!("Effective configuration: {config:?}");

    let orchestrator = BundleOrchestrator::new(config);
    let bundle = match &cli.output {
        Some(output) => orchestrator.bundle_to_file(&cli.entry, output)?,
        None => orchestrator.bundle_to_stdout(&cli.entry)?,
    };

    if let Some(path) = &cli.emit_graph {
        write_graph_manifest(&bundle.graph, path)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
