//! CLI command implementations

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use kytin_core::encoding::from_hex;
use kytin_core::types::unix_timestamp;
use kytin_core::{AuditEntry, AuditOperation, AuditOutcome, HeartbeatMode, PolicyLimits, PolicyUpdate};

use kytin_sentinel::SentinelConfig;

use crate::client::{ClientError, KytinClient};

/// Kytin CLI - talk to a running Kytin Sentinel
#[derive(Parser, Debug)]
#[command(name = "kytin")]
#[command(about = "Hardware-gated signing for autonomous agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the Sentinel socket (defaults to $XDG_RUNTIME_DIR/kytin.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Path to the Sentinel admin socket, used by `policy`
    /// (defaults to $XDG_RUNTIME_DIR/kytin-admin.sock)
    #[arg(long, global = true)]
    pub admin_socket: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show hardware, Resin and policy status
    Status,

    /// Send a single heartbeat
    Heartbeat {
        /// ECO or TURBO
        #[arg(long, default_value = "ECO")]
        mode: HeartbeatMode,

        /// Payload to sign (defaults to a timestamped liveness marker)
        #[arg(long)]
        payload: Option<String>,
    },

    /// Send heartbeats on the cadence of the chosen mode
    Pulse {
        /// ECO or TURBO
        #[arg(long, default_value = "ECO")]
        mode: HeartbeatMode,

        /// Stop after this many heartbeats
        #[arg(long)]
        count: Option<u64>,

        /// Override the interval between heartbeats
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Sign a transfer under the spend policy
    Sign {
        /// Transaction bytes (hex encoded)
        #[arg(long)]
        tx: String,

        /// Amount moved, e.g. 0.25
        #[arg(long)]
        amount: Decimal,

        /// Target program identifier
        #[arg(long)]
        program: Option<String>,
    },

    /// Open a new daily window for Resin and spend
    Reset,

    /// Show recent audit entries
    Audit {
        /// Number of entries to show
        #[arg(short = 'n', long)]
        last: Option<usize>,
    },

    /// Show the signer public key
    Pubkey,

    /// Manage the spend policy
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Replace the spend limits (attested over the admin socket)
    Set {
        /// Ceiling on the sum of transfers per day
        #[arg(long)]
        daily_limit: Decimal,

        /// Per-transaction cap
        #[arg(long)]
        max_tx: Option<Decimal>,

        /// Allowed program identifier; repeat for several
        #[arg(long = "program")]
        programs: Vec<String>,

        /// Report over-cap transfers as needing approval
        #[arg(long)]
        require_approval: bool,
    },
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = match cli.socket {
        Some(path) => KytinClient::with_socket_path(path),
        None => KytinClient::new(),
    };

    match cli.command {
        Commands::Status => {
            let version = match client.ping().await {
                Ok(version) => version,
                Err(ClientError::DaemonNotRunning) => {
                    println!("Kytin Sentinel is not running");
                    println!("Start it with: kytin-sentinel");
                    return Err(ClientError::DaemonNotRunning);
                }
                Err(e) => return Err(e),
            };
            let status = client.status().await?;

            println!("Kytin Sentinel v{} is running", version);
            println!();
            println!("Hardware:");
            println!("  Backend:   {}", status.hardware.device_type);
            println!("  ID:        {}", status.hardware.info.hardware_id);
            println!(
                "  Available: {}",
                if status.hardware.available { "Yes" } else { "No" }
            );
            println!(
                "  Device:    {} (firmware {})",
                status.hardware.info.manufacturer, status.hardware.info.firmware_version
            );
            println!("Resin:");
            println!("  Balance:   {}", status.resin.balance);
            println!(
                "  Today:     {}/{} used",
                status.resin.daily_consumed, status.resin.daily_limit
            );
            println!("  Burned:    {}", status.resin.lifetime_burned);
            println!("  Reset at:  {}", status.resin.last_reset.to_rfc3339());
            println!("Policy:");
            println!(
                "  Spent:     {}/{} today",
                status.policy.daily_spent, status.policy.daily_limit
            );
            match status.policy.max_transaction_amount {
                Some(max) => println!("  Max tx:    {}", max),
                None => println!("  Max tx:    none"),
            }
        }

        Commands::Heartbeat { mode, payload } => {
            let payload = payload.unwrap_or_else(default_payload);
            let result = client.heartbeat(mode, payload.as_bytes()).await?;

            println!("Signature: {}", result.signature);
            println!("Algorithm: {}", result.algorithm);
            println!("Hardware:  {}", result.hardware_id);
            println!(
                "Resin:     {} left, {} today",
                result.resin_balance, result.daily_remaining
            );
        }

        Commands::Pulse {
            mode,
            count,
            interval_secs,
        } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| mode.expected_interval());
            pulse(&client, mode, count, interval).await?;
        }

        Commands::Sign {
            tx,
            amount,
            program,
        } => {
            let tx = parse_tx(&tx)?;
            let result = client.sign_transfer(&tx, amount, program).await?;

            println!("Signature: {}", result.signature);
            println!("Algorithm: {}", result.algorithm);
            println!("Hardware:  {}", result.hardware_id);
            println!(
                "Spent:     {} today, {} remaining",
                result.daily_spent, result.daily_remaining
            );
        }

        Commands::Reset => {
            client.reset_daily().await?;
            println!("Daily window reset");
        }

        Commands::Audit { last } => {
            let entries = client.audit(last).await?;
            if entries.is_empty() {
                println!("No audit entries");
            }
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }

        Commands::Pubkey => {
            let (public_key, fingerprint) = client.public_key().await?;
            println!("Public key:  {}", public_key);
            println!("Fingerprint: {}", fingerprint);
        }

        Commands::Policy { command } => match command {
            PolicyCommands::Set {
                daily_limit,
                max_tx,
                programs,
                require_approval,
            } => {
                let limits = PolicyLimits {
                    max_transaction_amount: max_tx,
                    daily_spend_limit: daily_limit,
                    allowed_programs: programs.into_iter().collect(),
                    require_user_approval_above: require_approval,
                };
                let update = PolicyUpdate::new(limits, unix_timestamp());

                let admin = KytinClient::with_socket_path(
                    cli.admin_socket
                        .unwrap_or_else(SentinelConfig::default_admin_ipc_path),
                );
                let attestation = match admin.attest_policy(&update).await {
                    Err(ClientError::DaemonNotRunning) => {
                        println!("Admin socket is not reachable");
                        println!("Set admin_socket_path in the Sentinel config to enable it");
                        return Err(ClientError::DaemonNotRunning);
                    }
                    other => other?,
                };
                debug!("Policy update attested at {}", attestation.timestamp);
                admin.update_policy(update, attestation).await?;
                println!("Policy updated");
            }
        },
    }

    Ok(())
}

/// Heartbeat loop; stops quietly once Resin runs out
async fn pulse(
    client: &KytinClient,
    mode: HeartbeatMode,
    count: Option<u64>,
    interval: Duration,
) -> Result<(), ClientError> {
    let mut sent = 0u64;
    loop {
        match client.heartbeat(mode, default_payload().as_bytes()).await {
            Ok(result) => {
                sent += 1;
                println!(
                    "[{}] {} heartbeat signed, Resin {} ({} today)",
                    sent, mode, result.resin_balance, result.daily_remaining
                );
            }
            Err(e) if e.rejection_code() == Some("RESIN_DEPLETED") => {
                warn!("Resin depleted after {} heartbeats", sent);
                println!("Resin depleted, stopping");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if count.is_some_and(|count| sent >= count) {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

/// Hex transaction bytes from the command line, `0x` prefix allowed
fn parse_tx(tx: &str) -> Result<Vec<u8>, ClientError> {
    from_hex(tx).map_err(|e| ClientError::InvalidArgument(format!("tx: {}", e)))
}

fn default_payload() -> String {
    format!("kytin-heartbeat:{}", unix_timestamp())
}

fn format_entry(entry: &AuditEntry) -> String {
    let when = DateTime::<Utc>::from_timestamp(entry.timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| entry.timestamp.to_string());

    let operation = match &entry.operation {
        AuditOperation::Heartbeat { mode } => format!("heartbeat {}", mode),
        AuditOperation::SignTransfer {
            amount,
            program_id: Some(program),
        } => format!("transfer {} to {}", amount, program),
        AuditOperation::SignTransfer { amount, .. } => format!("transfer {}", amount),
        AuditOperation::PolicyAttestation { issued_at } => {
            format!("policy attestation @{}", issued_at)
        }
        AuditOperation::PolicyUpdate => "policy update".to_string(),
        AuditOperation::DailyReset => "daily reset".to_string(),
    };

    let outcome = match &entry.outcome {
        AuditOutcome::Signed { .. } => "signed".to_string(),
        AuditOutcome::Rejected { code } => format!("rejected {}", code),
        AuditOutcome::Applied => "applied".to_string(),
    };

    format!(
        "#{:<5} {}  {:<28} {:<28} resin={} spent={}",
        entry.sequence, when, operation, outcome, entry.resin_balance, entry.daily_spent
    )
}
