use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod run;

#[derive(Parser)]
#[command(
    name = "agentprobe",
    about = "agentprobe: run agents over datasets and aggregate run records"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show version information
    Version,
    /// Run an agent over a dataset and write one record per item
    Run(RunArgs),
    /// Summarize one or more run-record files
    Aggregate(AggregateArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Dataset file (.jsonl or .json)
    #[arg(short, long)]
    pub dataset: PathBuf,
    /// Agent profile: direct, echo
    #[arg(short, long, default_value = "direct")]
    pub agent: String,
    /// Agent configuration file (.json, .yaml, .toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Stop after this many items
    #[arg(short, long)]
    pub limit: Option<usize>,
    /// Output file (default: <results-dir>/<dataset>__<date>__<hash>.jsonl)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Base directory for results
    #[arg(long, default_value = "eval_runs")]
    pub results_dir: PathBuf,
    /// Tracer: none, jsonl, otlp, langfuse (default: $AGENTPROBE_TRACER or none)
    #[arg(long)]
    pub tracer: Option<String>,
    /// Span file for the jsonl tracer (default: <results-dir>/spans.jsonl)
    #[arg(long)]
    pub spans_path: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct AggregateArgs {
    /// Run-record files
    #[arg(short, long, num_args = 1.., required = true)]
    pub runs: Vec<PathBuf>,
    /// Comma-separated grouping fields (e.g. agent_name,config_hash or extra.<key>)
    #[arg(short, long, value_delimiter = ',', default_value = "agent_name,config_hash")]
    pub group_by: Vec<String>,
    /// Also write the summary as JSON to this file
    #[arg(long)]
    pub json: Option<PathBuf>,
    /// Reject records with unknown or missing fields
    #[arg(long)]
    pub strict: bool,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agentprobe=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Version => {
            println!("agentprobe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(args) => {
            init_logging();
            run::execute(args).await
        }
        Commands::Aggregate(args) => {
            init_logging();
            aggregate::execute(args)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
