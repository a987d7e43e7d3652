// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "voxbridge")]
#[command(about = "Bridge between a voice-telephony front-end and an agent back-end")]
#[command(
    long_about = "voxbridge connects a voice-telephony peer (which terminates calls and \
performs speech-to-text / text-to-speech) to an agent back-end. It dials the peer's \
WebSocket endpoint per configured account, answers session traffic, and turns agent \
replies into voice actions (speak / collect / end)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Explicit config file, merged over the default search paths
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Channel name (selects `channels.<name>` in the config)
    #[arg(long, global = true, default_value = "fortivoice")]
    pub channel: String,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect the configured accounts and serve until Ctrl-C
    Run {
        /// Only run this account instead of every enabled one
        #[arg(long, value_name = "ID")]
        account: Option<String>,
    },
    /// List the channel's accounts with their resolved state
    Accounts,
    /// Print the merged configuration as YAML
    ShowConfig,
}
