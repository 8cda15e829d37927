mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use kanban_core::KanbanError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kanban",
    about = "File-based kanban board with collision-free IDs synchronised through git",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .kanban/ or .git/)
    #[arg(long, global = true, env = "KANBAN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .kanban/config.yaml and create the work root
    Init {
        /// Item type theme: software or nautical
        #[arg(long, default_value = "software")]
        theme: String,
        /// Directory records live under
        #[arg(long)]
        path: Option<String>,
    },

    /// Allocate the next identifier for a prefix
    NextId(cmd::next_id::NextIdArgs),

    /// Allocate an identifier and write a new record file with it
    Create(cmd::create::CreateArgs),

    /// Report duplicate identifiers and filename mismatches
    Validate {
        /// Rename mismatched files to match their id
        #[arg(long)]
        fix: bool,
    },

    /// Show the identifier ledger
    Ledger,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { theme, path } => cmd::init::run(&root, &theme, path.as_deref(), cli.json),
        Commands::NextId(args) => cmd::next_id::run(&root, args, cli.json),
        Commands::Create(args) => cmd::create::run(&root, args, cli.json),
        Commands::Validate { fix } => cmd::validate::run(&root, fix, cli.json),
        Commands::Ledger => cmd::ledger::run(&root, cli.json),
    };

    if let Err(e) = result {
        if e.downcast_ref::<output::AlreadyReported>().is_some() {
            std::process::exit(1);
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let core = e.downcast_ref::<KanbanError>();
        if cli.json {
            let _ = output::print_json(&output::error_payload(&e, core));
        }
        std::process::exit(exit_code(core));
    }
}

fn exit_code(err: Option<&KanbanError>) -> i32 {
    match err {
        Some(KanbanError::RetryExhausted { .. }) => 2,
        Some(KanbanError::Inconclusive { .. }) => 3,
        _ => 1,
    }
}
