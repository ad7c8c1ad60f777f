use anyhow::{Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tracking_agent::config::{Config, Provider};
use tracking_agent::hands::BrowserSession;
use tracking_agent::orchestrator::{Orchestrator, TaskReport, title_case_key};
use tracking_agent::page::Page;
use tracking_agent::llm;

/// Looks up cargo tracking details with a browser driven by a language model.
#[derive(Debug, Parser)]
#[command(name = "agent", version, about)]
struct Cli {
    /// Page every lookup starts from.
    #[arg(long)]
    url: Option<String>,

    #[arg(long, value_enum)]
    provider: Option<Provider>,

    #[arg(long)]
    model: Option<String>,

    /// Executor invocations allowed per run.
    #[arg(long)]
    max_cycles: Option<usize>,

    /// Where successful runs are stored for replay.
    #[arg(long)]
    plan: Option<PathBuf>,

    #[arg(long)]
    headless: bool,

    /// Chrome binary to launch instead of the detected one.
    #[arg(long)]
    chrome: Option<PathBuf>,

    #[arg(long)]
    carrier: Option<String>,

    /// Look up a single id and exit.
    #[arg(long)]
    id: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) -> Option<String> {
        if let Some(url) = self.url {
            config.tracker.start_url = url;
        }
        if let Some(provider) = self.provider {
            if provider != config.oracle.provider {
                config.oracle.provider = provider;
                config.oracle.api_key = std::env::var(provider.api_key_var()).unwrap_or_default();
                config.oracle.model = provider.default_model().to_string();
            }
        }
        if let Some(model) = self.model {
            config.oracle.model = model;
        }
        if let Some(max_cycles) = self.max_cycles {
            config.agent.max_cycles = max_cycles;
        }
        if let Some(plan) = self.plan {
            config.agent.plan_path = plan;
        }
        if self.headless {
            config.browser.headless = true;
        }
        if let Some(chrome) = self.chrome {
            config.browser.chrome_path = Some(chrome);
        }
        if let Some(carrier) = self.carrier {
            config.tracker.carrier = carrier;
        }
        self.id
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Flags first, so --help and --version work whatever the environment holds.
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    let one_shot = cli.apply(&mut config);

    if config.oracle.api_key.is_empty() {
        bail!(
            "{} is not set (put it in the environment or a .env file)",
            config.oracle.provider.api_key_var()
        );
    }
    let oracle = llm::from_config(&config.oracle)?;
    info!(provider = ?config.oracle.provider, model = %config.oracle.model, "oracle ready");

    // Launching Chrome blocks for a while.
    let browser_config = config.browser.clone();
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(&browser_config))
        .await
        .map_err(|e| anyhow::anyhow!("Browser launch panicked: {e}"))??;
    let page = session.page();

    let orchestrator = Orchestrator::new(oracle, &config.agent, config.tracker.clone());

    if let Some(id) = one_shot {
        let report = orchestrator.run_task(&page, id.trim()).await?;
        print_report(&report);
        // Returning an error, not exiting, so the browser session is dropped.
        return lookup_status(id.trim(), &report);
    }

    interactive(&orchestrator, &page).await
}

async fn interactive(orchestrator: &Orchestrator, page: &dyn Page) -> Result<()> {
    println!("--- Cargo Tracking Agent ---");
    println!("Type 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nEnter Booking ID: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let booking_id = line.trim();
        if booking_id.eq_ignore_ascii_case("quit") {
            break;
        }
        if booking_id.is_empty() {
            println!("Please enter a valid Booking ID.");
            continue;
        }

        match orchestrator.run_task(page, booking_id).await {
            Ok(report) => print_report(&report),
            Err(err) => {
                tracing::error!(error = %err, "lookup failed");
                println!("\nSorry, we were unable to retrieve the tracking information.");
            }
        }
    }
    println!("Goodbye.");
    Ok(())
}

fn lookup_status(id: &str, report: &TaskReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    bail!("no tracking information found for {id}")
}

fn print_report(report: &TaskReport) {
    if report.is_success() {
        println!("\n--- Tracking Result ---");
        for (key, value) in &report.result {
            println!("{}: {}", title_case_key(key), value);
        }
        println!("-----------------------");
    } else {
        if let Some(error) = report.result.get("error") {
            println!("\nError: {error}");
        }
        println!("\nSorry, we were unable to retrieve the tracking information.");
    }
    println!(
        "(Task completed in {:.2} seconds via {})",
        report.elapsed.as_secs_f64(),
        report.source
    );
}
