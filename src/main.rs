use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

#[derive(Parser)]
#[command(name = "patchcrew")]
#[command(about = "Multi-agent code review with an iterative, validated fix loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Run without writing any files")]
    dry_run: bool,

    #[arg(long, global = true, help = "Path to patchcrew.yml")]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "warn", help = "Log filter (trace, debug, info, warn, error)")]
    log_level: String,

    #[arg(long, global = true, help = "Replay a recorded review conversation (JSON) instead of running the panel")]
    transcript: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Review a Python file and list the issues found")]
    Review {
        file: PathBuf,

        #[arg(long, help = "Print the full review conversation")]
        show_transcript: bool,
    },

    #[command(about = "Review a Python file and iteratively fix the issues found")]
    Fix {
        file: PathBuf,

        #[arg(long, help = "Iteration budget (default from config)")]
        max_iterations: Option<usize>,

        #[arg(long, help = "JSON issue list from an external analyzer to fix as well")]
        findings: Option<PathBuf>,

        #[arg(long, conflicts_with = "in_place", help = "Write the fixed code here")]
        output: Option<PathBuf>,

        #[arg(long, help = "Overwrite the input file with the fixed code")]
        in_place: bool,
    },

    #[command(about = "Extract issues from a recorded review conversation")]
    Extract { transcript: PathBuf },

    #[command(about = "Check that a Python file parses and avoids disallowed calls")]
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    };
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let config = cli::Config {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        config_path: cli.config,
        transcript: cli.transcript,
    };

    match cli.command {
        Commands::Review {
            file,
            show_transcript,
        } => {
            cli::review(file, show_transcript, &config).await?;
        }
        Commands::Fix {
            file,
            max_iterations,
            findings,
            output,
            in_place,
        } => {
            let options = cli::FixOptions {
                max_iterations,
                findings,
                output,
                in_place,
            };
            cli::fix(file, options, &config).await?;
        }
        Commands::Extract { transcript } => {
            cli::extract(transcript, &config)?;
        }
        Commands::Validate { file } => {
            cli::validate(file)?;
        }
    }

    Ok(())
}
