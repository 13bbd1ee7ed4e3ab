//! nfqueue command - NFQUEUE verdicts and NFLOG entries from the shell.
//!
//! `nfqueue queue` binds a queue and answers every packet with a fixed
//! verdict; `nfqueue log` prints entries from NFLOG groups.

mod output;

use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use nfnl::nflog::{self, LogConfig};
use nfnl::nfqueue::{self, Disposition, Flow, NFQA_CFG_F_FAIL_OPEN, QueueConfig};
use tokio_stream::StreamExt;

use output::{OutputFormat, print_entry, print_packet};

#[derive(Parser)]
#[command(name = "nfqueue", version, about = "Netfilter queue and log utility")]
struct Cli {
    /// Verbose logging (repeat for more).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output in JSON format.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bind a queue and issue verdicts.
    Queue(QueueArgs),
    /// Print entries from NFLOG groups.
    Log(LogArgs),
}

#[derive(Args)]
struct QueueArgs {
    /// Queue number.
    #[arg(short = 'n', long)]
    num: u16,

    /// Packets the kernel holds waiting for a verdict.
    #[arg(long, default_value_t = nfqueue::DEFAULT_MAX_QUEUE_LEN)]
    max_len: u32,

    /// Packet bytes copied to user space.
    #[arg(long, default_value_t = nfqueue::DEFAULT_COPY_RANGE)]
    copy_range: u32,

    /// Verdict applied to every packet.
    #[arg(long, value_enum, default_value_t = VerdictArg::Accept)]
    verdict: VerdictArg,

    /// Set this mark along with the verdict.
    #[arg(long)]
    mark: Option<u32>,

    /// Accept packets instead of dropping them when the queue is full.
    #[arg(long)]
    fail_open: bool,
}

#[derive(Args)]
struct LogArgs {
    /// Log group to bind (repeatable).
    #[arg(short = 'g', long = "group", required = true)]
    groups: Vec<u16>,

    /// Packet bytes copied into each entry.
    #[arg(long, default_value_t = nflog::DEFAULT_LOG_COPY_RANGE)]
    copy_range: u32,

    /// Print only the rule prefix.
    #[arg(long)]
    prefix_only: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum VerdictArg {
    Accept,
    Drop,
}

impl From<VerdictArg> for Disposition {
    fn from(arg: VerdictArg) -> Self {
        match arg {
            VerdictArg::Accept => Disposition::Accept,
            VerdictArg::Drop => Disposition::Drop,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Queue(args) => run_queue(args, format).await,
        Command::Log(args) => run_log(args, format).await,
    }
}

async fn run_queue(args: QueueArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = QueueConfig::new(args.num)
        .max_queue_len(args.max_len)
        .copy_range(args.copy_range);
    if args.fail_open {
        config = config.flags(NFQA_CFG_F_FAIL_OPEN);
    }

    let disposition = Disposition::from(args.verdict);
    let mark = args.mark;
    let handle = nfqueue::create_and_start(
        config,
        move |packet| {
            print_packet(&packet, format);
            let result = match mark {
                Some(mark) => packet.set_verdict_with_mark(disposition, mark),
                None => packet.set_verdict(disposition),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "verdict failed");
            }
            Flow::Continue
        },
        |err| tracing::warn!(error = %err, "queue error"),
    )
    .await
    .with_context(|| format!("failed to start queue {}", args.num))?;

    let mut check = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = check.tick() => {
                if !handle.is_running() {
                    tracing::error!(queue = args.num, "receive loop ended");
                    break;
                }
            }
        }
    }

    handle
        .stop_queue()
        .await
        .with_context(|| format!("failed to unbind queue {}", args.num))
}

async fn run_log(args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = LogConfig::new(args.groups.iter().copied()).copy_range(args.copy_range);
    let mut logs = nflog::listen(config)
        .await
        .with_context(|| format!("failed to bind log groups {:?}", args.groups))?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            entry = logs.next() => match entry {
                Some(Ok(entry)) => print_entry(&entry, format, args.prefix_only)?,
                Some(Err(e)) if e.is_no_buffers() => {
                    tracing::warn!("log entries lost");
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
        }
    }

    logs.close();
    Ok(())
}
