//! coretester gNB
//!
//! Connects to the configured AMFs, runs NG Setup and optionally registers
//! a batch of simulated UEs, then serves until interrupted.
//!
//! # Usage
//!
//! ```bash
//! coretester -c config/gnb.yaml -u config/ue.yaml -n 10
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use coretester_common::{init_logging, GnbConfig, LogLevel, UeConfig};
use coretester_gnb::Gnb;
use tokio::signal;
use tracing::{error, info};

const NG_SETUP_TIMEOUT: Duration = Duration::from_secs(5);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// coretester - 5G core tester acting as gNB and UEs
#[derive(Parser, Debug)]
#[command(name = "coretester")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the gNB configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: String,

    /// Path to the UE configuration file (YAML)
    #[arg(short = 'u', long = "ue-config", value_name = "FILE")]
    ue_config_file: Option<String>,

    /// Number of UEs to register; MSINs count up from the configured one
    #[arg(short = 'n', long = "ues", default_value_t = 0)]
    ues: u32,

    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level);

    match run(args).await {
        Ok(()) => {
            info!("coretester exited successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("coretester failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Loading configuration from: {}", args.config_file);
    let config = GnbConfig::from_yaml_file(&args.config_file)
        .with_context(|| format!("Failed to load configuration from {}", args.config_file))?;
    info!(
        "Configuration loaded: NCI={:#x}, PLMN={}-{}, TAC={}",
        config.nci,
        config.plmn.mcc_string(),
        config.plmn.mnc_string(),
        config.tac
    );

    let gnb = Gnb::connect(config).await.context("Failed to connect to AMFs")?;
    gnb.ng_setup_all(NG_SETUP_TIMEOUT).await.context("NG Setup failed")?;

    if args.ues > 0 {
        let path = args
            .ue_config_file
            .as_deref()
            .context("--ue-config is required when --ues is set")?;
        let base = UeConfig::from_yaml_file(path).with_context(|| format!("Failed to load UE configuration from {path}"))?;
        register_ues(&gnb, &base, args.ues).await?;
    }

    info!("gNB started, waiting for shutdown signal...");
    signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Received Ctrl+C, shutting down...");
    gnb.close().await;
    Ok(())
}

async fn register_ues(gnb: &std::sync::Arc<Gnb>, base: &UeConfig, count: u32) -> Result<()> {
    let mut ues = Vec::with_capacity(count as usize);
    for n in 0..count {
        let config = nth_ue_config(base, n)?;
        let ue = gnb.attach_ue(config).context("Failed to attach UE")?;
        ue.register().await.with_context(|| format!("Registration of {} failed to start", ue.supi()))?;
        ues.push(ue);
    }
    for ue in &ues {
        let guti = ue
            .wait_for_registration(REGISTRATION_TIMEOUT)
            .await
            .with_context(|| format!("{} did not register", ue.supi()))?;
        info!(supi = %ue.supi(), guti = ?guti, "UE registered");
    }
    Ok(())
}

/// `base` with its MSIN advanced by `n`, keeping the digit count.
fn nth_ue_config(base: &UeConfig, n: u32) -> Result<UeConfig> {
    let mut config = base.clone();
    let msin: u64 = base.msin.parse().context("MSIN is not numeric")?;
    config.msin = format!("{:0width$}", msin + u64::from(n), width = base.msin.len());
    Ok(config)
}
