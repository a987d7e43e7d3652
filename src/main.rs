// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use voxbridge_agent::{AgentBridge, AgentRuntime, BridgeOptions, HttpAgentRuntime};
use voxbridge_config::{list_account_ids, normalize_account_id, resolve_account, Config};
use voxbridge_monitor::{ChannelMonitor, StatusHandle};
use voxbridge_session::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // tokio-tungstenite's rustls backend needs a process-wide crypto
    // provider once more than one is linked in.
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let config = voxbridge_config::load(cli.config.as_deref())?;

    match &cli.command {
        Some(Commands::Accounts) => {
            print_accounts(&config, &cli.channel);
            Ok(())
        }
        Some(Commands::ShowConfig) => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Run { account }) => run_channel(&config, &cli.channel, account.as_deref()).await,
        None => run_channel(&config, &cli.channel, None).await,
    }
}

fn print_accounts(config: &Config, channel: &str) {
    for id in list_account_ids(config, channel) {
        let acc = resolve_account(config, channel, Some(&id));
        println!(
            "{id}  enabled={} configured={} url={} phone={}",
            acc.enabled,
            acc.configured,
            acc.url.as_deref().unwrap_or("-"),
            acc.phone.as_deref().unwrap_or("-"),
        );
    }
}

/// Spawn one monitor per runnable account and serve until Ctrl-C.
async fn run_channel(config: &Config, channel: &str, only: Option<&str>) -> anyhow::Result<()> {
    let ids = match only {
        Some(id) => vec![normalize_account_id(id)],
        None => list_account_ids(config, channel),
    };

    let registry = Arc::new(SessionRegistry::new(channel));
    let cancel = CancellationToken::new();
    let mut monitors = Vec::new();

    for id in ids {
        let account = resolve_account(config, channel, Some(&id));
        if !account.enabled {
            info!(account = %id, "skipping disabled account");
            continue;
        }
        if !account.configured {
            // Fatal for this account: never dialed.
            error!(
                account = %id,
                "account is not configured (valid ws/wss url and E.164 phone required)"
            );
            continue;
        }
        let runtime: Arc<dyn AgentRuntime> = match HttpAgentRuntime::from_config(&account.agent) {
            Ok(runtime) => Arc::new(runtime),
            Err(e) => {
                error!(account = %id, "agent back-end not configured: {e}");
                continue;
            }
        };

        let bridge = AgentBridge::new(
            runtime,
            BridgeOptions {
                channel: channel.to_string(),
                account_id: account.account_id.clone(),
                markdown: account.markdown.clone(),
            },
        );
        let store = registry.store_for(&account.account_id).await;
        let (status, _status_rx) = StatusHandle::new();
        let monitor = ChannelMonitor::new(
            account,
            store,
            Arc::new(bridge),
            status,
            cancel.child_token(),
        );
        monitors.push(tokio::spawn(monitor.run()));
    }

    if monitors.is_empty() {
        bail!("no account of channel `{channel}` is enabled and configured");
    }

    info!(channel, monitors = monitors.len(), "bridge running, Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    cancel.cancel();
    for handle in monitors {
        let _ = handle.await;
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
