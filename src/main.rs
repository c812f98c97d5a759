mod cli;
mod core;
mod logging;
mod tui;

use std::sync::Arc;

use clap::Parser;

use crate::cli::{Cli, Commands, HistoryArgs, RunArgs};
use crate::core::dispatcher::Dispatcher;
use crate::core::error::DispatchError;
use crate::core::event::DispatchEvent;
use crate::core::formatter::{
    format_estimate, format_job_line, format_progress_line, format_report_line, format_task_line,
};
use crate::core::job::ChannelSelector;
use crate::core::store::{JobStore, SqliteJobStore};
use crate::logging::LogTarget;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), DispatchError> {
    let cli = Cli::parse();
    let target = match &cli.command {
        Commands::Run(args) if !args.headless => LogTarget::FileOnly,
        _ => LogTarget::Stderr,
    };
    logging::init(&cli.log_level, cli.log_file.as_deref(), target)?;

    let store = SqliteJobStore::open(&cli.db)?;
    match cli.command {
        Commands::Enqueue(args) => {
            let (task_id, count) = crate::core::enqueue_task(
                &store,
                &args.recipients,
                &args.message,
                args.interval,
                ChannelSelector(args.channel),
            )?;
            println!(
                "Task {task_id} created with {count} jobs (about {} at {}s intervals).",
                format_estimate(count, args.interval),
                args.interval
            );
            Ok(())
        }
        Commands::Run(args) => run_task(Arc::new(store), args),
        Commands::History(args) => print_history(&store, args),
    }
}

fn run_task(store: Arc<SqliteJobStore>, args: RunArgs) -> Result<(), DispatchError> {
    let task = store
        .task(args.task_id)?
        .ok_or(DispatchError::TaskNotFound {
            task_id: args.task_id,
        })?;
    let request = cli::run_args_to_request(&args, &task);
    let transport = cli::build_transport(&args)?;

    let dispatcher = Dispatcher::new(store, transport).with_liveness(cli::build_liveness(&args));
    if args.headless {
        cli::install_interrupt_handler(dispatcher.control())?;
    }
    let events = dispatcher.subscribe();
    dispatcher.start(request)?;

    let ui = if args.headless {
        for event in events.iter() {
            match event {
                DispatchEvent::Progress(progress) => println!("{}", format_progress_line(&progress)),
                DispatchEvent::Degraded { job_id, error } => {
                    eprintln!("warning: store write failed (job {job_id:?}): {error}")
                }
                DispatchEvent::Completed(_) => break,
            }
        }
        Ok(())
    } else {
        tui::run(&dispatcher, events, &task, request.interval_secs)
    };
    if ui.is_err() {
        dispatcher.cancel();
    }

    if let Some(report) = dispatcher.wait() {
        println!("{}", format_report_line(&report));
    }
    ui
}

fn print_history(store: &SqliteJobStore, args: HistoryArgs) -> Result<(), DispatchError> {
    let Some(task_id) = args.task_id else {
        for task in store.list_tasks()? {
            println!("{}", format_task_line(&task));
        }
        return Ok(());
    };

    let task = store
        .task(task_id)?
        .ok_or(DispatchError::TaskNotFound { task_id })?;
    println!("{}", format_task_line(&task));
    let jobs = match args.status {
        Some(status) => store.jobs_with_status(task_id, status)?,
        None => store.jobs_for_task(task_id)?,
    };
    for job in &jobs {
        println!("{}", format_job_line(job));
    }
    Ok(())
}
