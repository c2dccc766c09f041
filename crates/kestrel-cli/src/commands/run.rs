use crate::OutputFormat;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use kestrel_browser::{BrowserSession, LaunchOptions};
use kestrel_core::config::RunConfig;
use kestrel_core::report::{ReportWriter, ScenarioReport, SuiteReport};
use kestrel_core::scenario::{Runner, ScenarioStatus};
use kestrel_core::suite::{Suite, SuiteReader};
use kestrel_core::Viewport;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for `kestrel run`, after flag and environment parsing
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub suite: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub window: Viewport,
    pub filter: Option<String>,
    pub output: Option<PathBuf>,
}

/// Run the suite and print its report. Returns whether every repetition passed.
pub fn execute(args: &RunArgs, format: OutputFormat) -> Result<bool> {
    let suite = load_suite(&args.suite, args.filter.as_deref())?;
    let config = build_config(&suite, args);
    let options = LaunchOptions {
        chrome_path: args.chrome_path.clone(),
        headless: args.headless,
        window: args.window,
        no_sandbox: args.no_sandbox,
        ..Default::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async {
        let session = BrowserSession::launch(&options).await?;

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Received Ctrl+C, cancelling running scenarios");
                interrupt.cancel();
            }
        });

        let progress = (format == OutputFormat::Pretty).then(|| spinner(&suite));
        let runner = Runner::new(session, config);
        let report = runner.run_suite(&suite, &cancel).await;
        if let Some(progress) = progress {
            progress.finish_and_clear();
        }

        if let Err(e) = runner.into_factory().shutdown().await {
            tracing::warn!("Chrome did not shut down cleanly: {}", e);
        }
        Ok::<_, anyhow::Error>(report)
    });

    // Chrome's handler task may still be draining events
    runtime.shutdown_timeout(Duration::from_millis(100));
    let report = result?;

    if let Some(ref path) = args.output {
        ReportWriter::to_file(&report, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => output_json(&report)?,
        OutputFormat::Table => output_table(&report),
        OutputFormat::Pretty => output_pretty(&report, args.output.as_deref()),
    }

    Ok(report.all_passed())
}

pub(crate) fn load_suite(path: &Path, filter: Option<&str>) -> Result<Suite> {
    let suite = SuiteReader::from_file(path)
        .with_context(|| format!("Failed to load suite {}", path.display()))?;
    SuiteReader::validate(&suite)?;

    match filter {
        Some(pattern) => Ok(suite.select(pattern)?),
        None => Ok(suite),
    }
}

/// Defaults, then the suite's settings, then command-line flags
fn build_config(suite: &Suite, args: &RunArgs) -> RunConfig {
    let mut config = RunConfig::default().with_settings(&suite.settings);
    if let Some(ms) = args.timeout_ms {
        config = config.with_default_timeout(Duration::from_millis(ms));
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    tracing::debug!("Run configuration: {:?}", config);
    config
}

fn spinner(suite: &Suite) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!(
        "Running {} ({} repetition(s))",
        suite.name,
        suite.repetitions()
    ));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn output_pretty(report: &SuiteReport, written_to: Option<&Path>) {
    use console::style;

    println!("\n{}", style(format!("Suite: {}", report.suite)).bold().cyan());
    println!();

    for scenario in &report.scenarios {
        let marker = match scenario.status {
            ScenarioStatus::Passed => style("PASS").green().bold(),
            ScenarioStatus::Failed => style("FAIL").red().bold(),
            ScenarioStatus::Errored => style("ERROR").magenta().bold(),
            _ => style("SKIP").dim(),
        };
        println!(
            "  {} {} {}",
            marker,
            scenario.name,
            style(format!("({} ms)", scenario.duration_ms)).dim()
        );

        if let Some(ref failure) = scenario.failure {
            println!("       {}", failure.message);
            if let Some(ref expected) = failure.expected {
                println!("       expected: {}", style(expected).green());
            }
            if let Some(ref observed) = failure.observed {
                println!("       observed: {}", style(observed).red());
            }
            print_recent_actions(scenario);
        }
    }

    println!("\n{}", style("Summary").bold());
    println!("  Passed:   {}", style(report.passed).green());
    println!("  Failed:   {}", style(report.failed).red());
    println!("  Errored:  {}", style(report.errored).magenta());
    println!("  Duration: {} ms", report.duration_ms);

    if let Some(path) = written_to {
        println!("\n{}", style(format!("Report written to {}", path.display())).dim());
    }
    println!();
}

/// The last few actions before a failure, for context
fn print_recent_actions(scenario: &ScenarioReport) {
    let skip = scenario.actions.len().saturating_sub(3);
    for action in &scenario.actions[skip..] {
        let target = action.selector.as_deref().unwrap_or("-");
        match action.error {
            Some(ref error) => println!(
                "       {} {} {} at +{} ms: {}",
                console::style("x").red(),
                action.kind,
                target,
                action.offset_ms,
                error
            ),
            None => println!(
                "       {} {} {} at +{} ms",
                console::style("-").dim(),
                action.kind,
                target,
                action.offset_ms
            ),
        }
    }
}

fn output_json(report: &SuiteReport) -> Result<()> {
    println!("{}", ReportWriter::to_string(report)?);
    Ok(())
}

fn output_table(report: &SuiteReport) {
    println!("Scenario,Status,Duration (ms),Viewport,Message");
    for scenario in &report.scenarios {
        println!(
            "{},{},{},{},{}",
            csv_field(&scenario.name),
            scenario.status,
            scenario.duration_ms,
            scenario
                .viewport
                .map(|v| v.to_string())
                .unwrap_or_default(),
            scenario
                .failure
                .as_ref()
                .map(|f| csv_field(&f.message))
                .unwrap_or_default()
        );
    }
}

/// Quote a value when it would break the CSV row
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
