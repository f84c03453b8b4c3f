//! MPI+threads put message-rate and bandwidth benchmark using a shared
//! lock-all epoch and a flush after every window of puts.
//!
//! Always runs with two processes; thread i on rank 0 writes into slot i of
//! the window exposed by rank 1:
//!
//!   mpiexec -n 2 -ppn 1 -bind-to core:<#threads> -hosts <sender>,<receiver> \
//!       put_lock_flush_mbw_mr -T <#threads>
//!
//! With `--loopback` both peers run as threads of this process instead.
use clap::{Parser, ValueEnum};
use rma_mr::loopback::Fabric;
use rma_mr::{defaults, run, BenchError, BenchParams, Outcome, RateReport, ReportFormat, Result};
use std::process::ExitCode;
use std::thread;

#[derive(Parser, Debug)]
#[command(name = "put_lock_flush_mbw_mr")]
#[command(about = "One-sided put message rate and bandwidth with lock_all/flush")]
struct Cli {
    /// Number of sender threads
    #[arg(short = 'T', long, default_value_t = defaults::NUM_THREADS)]
    threads: usize,

    /// Total number of messages, split across the threads; 640000 becomes
    /// 64000 above 16384-byte messages
    #[arg(short = 'M', long, default_value_t = defaults::NUM_MESSAGES)]
    num_messages: usize,

    /// Size of each message in bytes
    #[arg(short = 'S', long, default_value_t = defaults::MESSAGE_SIZE)]
    message_size: usize,

    /// Puts issued between two flushes
    #[arg(short = 'W', long, default_value_t = defaults::WINDOW_SIZE)]
    window_size: usize,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Run both peers in this process instead of under an MPI launcher
    #[arg(long)]
    loopback: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Text,
    Json,
}

impl From<Format> for ReportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => ReportFormat::Text,
            Format::Json => ReportFormat::Json,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    rma_mr::logging::init(&cli.log_level);

    let num_messages = defaults::num_messages_for(cli.message_size, cli.num_messages);
    let params = match BenchParams::new(cli.threads, cli.message_size, num_messages, cli.window_size)
    {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?params, loopback = cli.loopback, "parameters");

    let outcome = if cli.loopback {
        run_loopback(&params)
    } else {
        run_mpi(&params)
    };

    match outcome {
        Ok(Some(report)) => match ReportFormat::from(cli.format).render(&report) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error rendering report: {e}");
                ExitCode::FAILURE
            }
        },
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error in running bench: {e}");
            ExitCode::FAILURE
        }
    }
}

fn sender_report(outcome: Outcome) -> Option<RateReport> {
    match outcome {
        Outcome::Sender(report) => Some(report),
        Outcome::Target(_) => None,
    }
}

fn run_loopback(params: &BenchParams) -> Result<Option<RateReport>> {
    let fabric = Fabric::new(2);
    let (sent, received) = thread::scope(|s| {
        let target = fabric.peer(1);
        let handle = s.spawn(move || run(&target, params));
        let sent = run(&fabric.peer(0), params);
        let received = handle
            .join()
            .unwrap_or(Err(BenchError::WorkerPanicked(1)));
        (sent, received)
    });
    let report = sent.map(sender_report)?;
    received?;
    Ok(report)
}

#[cfg(feature = "mpi")]
fn run_mpi(params: &BenchParams) -> Result<Option<RateReport>> {
    use rma_mr::OneSided;

    let world = rma_mr::init_standard_mpi()?;
    tracing::info!(rank = world.rank(), size = world.size(), "MPI ready");
    run(&world, params).map(sender_report)
}

#[cfg(not(feature = "mpi"))]
fn run_mpi(_params: &BenchParams) -> Result<Option<RateReport>> {
    Err(BenchError::InvalidParams(
        "built without the `mpi` feature, rerun with --loopback".to_string(),
    ))
}
