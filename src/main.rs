use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use claude_usage_monitor_lib::claude_usage::{
    CredentialStore, UsageClient, UsageMonitor, UsageReport,
};
use claude_usage_monitor_lib::config::{RefreshInterval, Settings};

/// Watch Claude plan usage limits from the terminal
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Refresh interval in seconds (30, 60, 120 or 300); saved for next time
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Fetch once, print the report and exit
    #[arg(long)]
    once: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &UsageReport) {
    for window in &report.windows {
        println!("{window}");
    }
    if let Some(updated) = report.last_updated_at {
        println!("Last updated {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(secs) = args.interval {
        settings.refresh_interval = RefreshInterval::try_from(secs)?;
        settings.save().context("Failed to save settings")?;
    }

    let client = UsageClient::new(CredentialStore::platform_default());

    if args.once {
        let snapshot = client.fetch().await?;
        let now = Utc::now();
        print_report(&UsageReport::from_snapshot(&snapshot, Some(now), now));
        return Ok(());
    }

    let monitor = UsageMonitor::new(client, settings.refresh_interval);
    let mut updates = monitor.subscribe();
    monitor.start();
    log::info!(
        "Polling usage every {}, press Ctrl-C to stop",
        settings.refresh_interval
    );

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = monitor.report();
                if report.is_loading {
                    continue;
                }
                println!("{}", report.status_line());
                if report.token_expired {
                    println!("Run `claude` in a terminal to log in again.");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                monitor.stop();
                break;
            }
        }
    }

    Ok(())
}
