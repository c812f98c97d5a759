use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::core::control::ControlHandle;
use crate::core::dispatcher::StartRequest;
use crate::core::error::{DispatchError, TransportError};
use crate::core::job::{ChannelSelector, JobStatus, Task};
use crate::core::liveness::{InhibitLiveness, Liveness, NoopLiveness};
use crate::core::runner::{CommandCarrier, LogCarrier};
use crate::core::transport::{CarrierTransport, Transport};

#[derive(Debug, Parser)]
#[command(name = "smsflow", version, about = "Paced bulk SMS dispatch")]
pub struct Cli {
    /// SQLite database holding tasks and jobs
    #[arg(long, global = true, value_name = "PATH", default_value = "smsflow.db")]
    pub db: PathBuf,
    /// Log filter, e.g. `info` or `smsflow=debug`
    #[arg(long = "log-level", global = true, default_value = "info")]
    pub log_level: String,
    /// Write logs to this file instead of stderr
    #[arg(long = "log-file", global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build a task from a recipients file
    Enqueue(EnqueueArgs),
    /// Dispatch the pending jobs of a task
    Run(RunArgs),
    /// List tasks, or the jobs of one task
    History(HistoryArgs),
}

#[derive(Debug, Parser)]
pub struct EnqueueArgs {
    /// Lines of `address[,name[,company[,amount]]]`
    #[arg(short = 'r', long = "recipients", value_name = "FILE")]
    pub recipients: PathBuf,
    /// Message text; `{name}`, `{company}`, `{amount}` and `{date}` are filled per recipient
    #[arg(short = 'm', long = "message")]
    pub message: String,
    /// Seconds between two sends
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub interval: u32,
    /// Channel slot, 0 for the default path
    #[arg(long, default_value_t = 0)]
    pub channel: u32,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    pub task_id: i64,
    /// Seconds between two sends; defaults to the task's own setting
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub interval: Option<u32>,
    /// Channel slot; defaults to the task's own setting
    #[arg(long)]
    pub channel: Option<u32>,
    /// Sender command, invoked as `<cmd> [--channel ID] <address> <part>...`
    #[arg(long, value_name = "CMD")]
    pub sender: Option<String>,
    /// Channel ids, slot 1 first
    #[arg(long = "channels", value_name = "ID", value_delimiter = ',')]
    pub channels: Vec<String>,
    /// Seconds before a hung sender is killed
    #[arg(long = "send-timeout", default_value_t = 30)]
    pub send_timeout: u64,
    /// Log messages instead of sending them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Print progress lines instead of opening the terminal UI
    #[arg(long)]
    pub headless: bool,
    /// Hold a systemd-inhibit lock while sending
    #[arg(long = "inhibit-sleep")]
    pub inhibit_sleep: bool,
}

#[derive(Debug, Parser)]
pub struct HistoryArgs {
    pub task_id: Option<i64>,
    /// Only jobs with this status
    #[arg(long)]
    pub status: Option<JobStatus>,
}

pub fn run_args_to_request(args: &RunArgs, task: &Task) -> StartRequest {
    StartRequest {
        task_id: task.id,
        interval_secs: args.interval.unwrap_or(task.interval_secs),
        channel: args.channel.map(ChannelSelector).unwrap_or(task.channel),
    }
}

pub fn build_transport(args: &RunArgs) -> Result<Arc<dyn Transport>, DispatchError> {
    if args.dry_run {
        return Ok(Arc::new(CarrierTransport::new(LogCarrier::new(
            args.channels.clone(),
        ))));
    }
    let Some(sender) = args.sender.as_deref() else {
        return Err(TransportError::InvalidCommand {
            message: "either --sender or --dry-run is required".to_string(),
        }
        .into());
    };
    let carrier = CommandCarrier::new(
        sender,
        args.channels.clone(),
        Duration::from_secs(args.send_timeout.max(1)),
    )?;
    Ok(Arc::new(CarrierTransport::new(carrier)))
}

pub fn build_liveness(args: &RunArgs) -> Arc<dyn Liveness> {
    if args.inhibit_sleep {
        Arc::new(InhibitLiveness::default())
    } else {
        Arc::new(NoopLiveness)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// The run was asked to stop after the in-flight send.
    Cancel,
    /// A stop is already under way, or nothing is running: leave now.
    Exit,
}

/// What Ctrl-C does in headless mode. The first press cancels the run so
/// the summary still gets written; a second one gives up on waiting.
pub fn on_interrupt(control: &ControlHandle) -> InterruptAction {
    if control.cancel() {
        InterruptAction::Cancel
    } else {
        InterruptAction::Exit
    }
}

pub fn install_interrupt_handler(control: ControlHandle) -> Result<(), DispatchError> {
    ctrlc::set_handler(move || match on_interrupt(&control) {
        InterruptAction::Cancel => {
            eprintln!("cancelling after the current message, press Ctrl-C again to quit now")
        }
        InterruptAction::Exit => std::process::exit(130),
    })?;
    Ok(())
}
