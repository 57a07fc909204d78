//! Command-line entry point for the herald campaign dispatcher
//!
//! - `send`: dispatch draft campaigns, optionally retrying failures once
//! - `attempts`: print the recorded delivery attempts
//! - `preview`: send a single test message

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use herald::{Herald, controller::Report};
use herald_common::{CampaignId, CampaignStatus, DeliveryAttempt};

/// Dispatch email campaigns
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Dispatch email campaigns", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, instead of `HERALD_CONFIG` or the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch campaigns and wait for them to finish
    Send {
        /// Campaign to dispatch, may be repeated (default: every draft)
        #[arg(long = "campaign")]
        campaigns: Vec<u64>,

        /// Retry failed recipients once after the first run
        #[arg(long)]
        retry_failed: bool,
    },
    /// Print recorded delivery attempts
    Attempts {
        /// Only this campaign
        #[arg(long)]
        campaign: Option<u64>,
    },
    /// Send one test message, recording nothing
    Preview {
        /// Campaign whose template is used
        #[arg(long)]
        campaign: u64,

        /// Address to send to
        #[arg(long)]
        to: String,

        /// Value used for every placeholder
        #[arg(long, default_value = "Test")]
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let herald = Herald::load(cli.config)?;
    herald.init();

    match cli.command {
        Commands::Send {
            campaigns,
            retry_failed,
        } => {
            let campaigns: Vec<CampaignId> = campaigns.into_iter().map(CampaignId).collect();
            let reports = herald.send(&campaigns, retry_failed).await?;
            print_reports(&reports);

            let unfinished = reports
                .iter()
                .filter(|report| report.status() != Some(CampaignStatus::Completed))
                .count();
            if unfinished > 0 {
                anyhow::bail!("{unfinished} campaign(s) did not complete");
            }
        }
        Commands::Attempts { campaign } => {
            let attempts = herald.attempts(campaign.map(CampaignId)).await?;
            print_attempts(&attempts);
        }
        Commands::Preview {
            campaign,
            to,
            value,
        } => {
            let delivered = herald.preview(CampaignId(campaign), &to, &value).await?;
            println!("Test message for campaign {campaign} to {to}: {delivered:?}");
        }
    }

    Ok(())
}

fn print_reports(reports: &[Report]) {
    println!(
        "{:<10} {:<18} {:>6} {:>10} {:>7} {:>8}",
        "CAMPAIGN", "STATUS", "SENT", "SIMULATED", "FAILED", "PENDING"
    );
    println!("{}", "-".repeat(64));

    for report in reports {
        match &report.result {
            Ok(result) => {
                let status = result.settled_status();
                let status = if report.retried {
                    format!("{status} (retried)")
                } else {
                    status.to_string()
                };
                println!(
                    "{:<10} {:<18} {:>6} {:>10} {:>7} {:>8}",
                    report.campaign.to_string(),
                    status,
                    result.sent,
                    result.simulated,
                    result.failed,
                    result.pending.len()
                );

                for recipient in &result.failing {
                    println!("    failed: {recipient}");
                }
                for warning in &result.render_warnings {
                    println!(
                        "    warning: {} is missing {}",
                        warning.recipient,
                        warning.missing.join(", ")
                    );
                }
            }
            Err(e) => println!("{:<10} {e}", report.campaign.to_string()),
        }
    }
}

fn print_attempts(attempts: &[DeliveryAttempt]) {
    println!(
        "{:<10} {:<32} {:>7} {:<10} {:<25} ERROR",
        "CAMPAIGN", "RECIPIENT", "ATTEMPT", "OUTCOME", "AT"
    );
    println!("{}", "-".repeat(96));

    for attempt in attempts {
        println!(
            "{:<10} {:<32} {:>7} {:<10} {:<25} {}",
            attempt.campaign_id().to_string(),
            attempt.recipient().to_string(),
            attempt.attempt(),
            attempt.outcome().as_str(),
            attempt.at().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            attempt.error().unwrap_or("-")
        );
    }

    println!("\nTotal: {} attempt(s)", attempts.len());
}
