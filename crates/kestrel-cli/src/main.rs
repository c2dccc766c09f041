use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use kestrel_cli::OutputFormat;
use kestrel_cli::commands::{self, run::RunArgs};
use kestrel_core::Viewport;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Run declarative browser test suites against a real Chrome",
    long_about = "Kestrel drives Chrome through scenarios described in a JSON suite file: \
                  navigate, type, click, then wait for conditions on the page to hold. \
                  Every wait is bounded by a deadline, so a run never depends on fixed sleeps."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test suite in Chrome
    Run {
        /// Path to the suite file
        #[arg(value_name = "SUITE")]
        suite: PathBuf,

        /// Path to the Chrome binary (discovered when omitted)
        #[arg(long, env = "KESTREL_CHROME")]
        chrome_path: Option<PathBuf>,

        /// Show the browser window
        #[arg(long, env = "KESTREL_HEADED")]
        headed: bool,

        /// Launch Chrome without its sandbox (needed in some containers)
        #[arg(long)]
        no_sandbox: bool,

        /// Default timeout for waits and assertions, in milliseconds
        #[arg(long, env = "KESTREL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Number of scenarios to run at once
        #[arg(long, env = "KESTREL_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Browser window size as WIDTHxHEIGHT
        #[arg(long, value_name = "WxH", default_value = "1280x720")]
        window: Viewport,

        /// Only run scenarios whose name contains this text
        #[arg(long)]
        filter: Option<String>,

        /// Write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a suite file without running it
    Validate {
        /// Path to the suite file
        #[arg(value_name = "SUITE")]
        suite: PathBuf,
    },

    /// Generate shell completion scripts
    #[command(after_help = "SUPPORTED SHELLS:
    bash, zsh, fish, powershell, elvish

INSTALLATION:
    Bash:  kestrel completion --shell bash >> ~/.bashrc
    Zsh:   kestrel completion --shell zsh > ~/.zfunc/_kestrel
           (then add `fpath+=~/.zfunc` before `compinit` in ~/.zshrc)
    Fish:  kestrel completion --shell fish > ~/.config/fish/completions/kestrel.fish")]
    Completion {
        /// Shell to generate the script for
        #[arg(long, value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            suite,
            chrome_path,
            headed,
            no_sandbox,
            timeout_ms,
            concurrency,
            window,
            filter,
            output,
        } => {
            let args = RunArgs {
                suite,
                chrome_path,
                headless: !headed,
                no_sandbox,
                timeout_ms,
                concurrency,
                window,
                filter,
                output,
            };
            let passed = commands::run::execute(&args, cli.format)?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Validate { suite } => {
            commands::validate::execute(&suite, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completion { shell } => {
            commands::completion::execute(shell, &mut Cli::command())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("kestrel=debug,kestrel_cli=debug,kestrel_core=debug,kestrel_browser=debug")
        } else {
            EnvFilter::new("kestrel=info,kestrel_cli=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
