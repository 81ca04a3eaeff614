//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// reelsmith - scheduled movie video pipeline
#[derive(Parser, Debug)]
#[command(name = "reelsmith")]
#[command(about = "Scheduled movie video pipeline: research, script, narrate, caption, compose, publish", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Override the run store root (REEL_WORK_DIR)
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start one run now and wait for it to finish
    RunOnce,

    /// Trigger runs on the configured cadence until interrupted
    RunScheduled {
        /// Stop after this many triggers
        #[arg(long)]
        max_triggers: Option<u32>,
    },

    /// Probe every adapter and the compositor toolchain
    TestAdapters,

    /// Continue an interrupted run from its first incomplete stage
    Resume {
        /// Run identifier as shown by `status`
        run_id: String,
    },

    /// List runs with their status and failure reason
    Status,
}
