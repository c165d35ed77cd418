//! Echo worker: replies to every payload with the same bytes.
//!
//! Used to exercise worker channels end to end. Flags make it misbehave in
//! the ways a real worker can.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use procchan_channel::{run_worker, PayloadHandler, WorkerExit};
use procchan_config::{LogLevel, LoggingConfig};
use procchan_ipc::StdioTransport;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "procchan-echo-worker", about = "Echo worker for procchan channels")]
struct Args {
    /// Keep running after the terminate directive
    #[arg(long)]
    ignore_terminate: bool,

    /// Swallow SIGINT so only a hard kill stops the worker (Unix only)
    #[arg(long)]
    ignore_interrupt: bool,

    /// Exit after echoing this many payloads (0 exits at startup)
    #[arg(long)]
    exit_after: Option<usize>,

    /// Exit code used with --exit-after
    #[arg(long, default_value_t = 0)]
    exit_code: i32,

    /// Delay before each reply, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Log level for stderr output
    #[arg(long, default_value = "warn")]
    log_level: String,
}

struct Echo {
    delay: Duration,
    ignore_terminate: bool,
    exit_after: Option<usize>,
    echoed: usize,
}

#[async_trait]
impl PayloadHandler for Echo {
    async fn handle(&mut self, payload: Bytes) -> Option<Bytes> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.echoed += 1;
        Some(payload)
    }

    fn accept_terminate(&mut self) -> bool {
        !self.ignore_terminate
    }

    fn finished(&self) -> bool {
        self.exit_after.is_some_and(|limit| self.echoed >= limit)
    }
}

#[cfg(unix)]
fn swallow_interrupts() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupts =
        signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
    tokio::spawn(async move {
        while interrupts.recv().await.is_some() {
            info!("Ignoring interrupt");
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn swallow_interrupts() -> Result<()> {
    tracing::warn!("--ignore-interrupt has no effect on this platform");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = LoggingConfig {
        level: args.log_level.parse::<LogLevel>().unwrap_or_default(),
        ..Default::default()
    };
    procchan_logging::init_worker_logging(&logging)?;

    if args.ignore_interrupt {
        swallow_interrupts()?;
    }

    if args.exit_after == Some(0) {
        info!("Exiting at startup with code {}", args.exit_code);
        std::process::exit(args.exit_code);
    }

    let mut handler = Echo {
        delay: Duration::from_millis(args.delay_ms),
        ignore_terminate: args.ignore_terminate,
        exit_after: args.exit_after,
        echoed: 0,
    };

    let mut transport = StdioTransport::stdio();
    let exit = run_worker(&mut transport, &mut handler)
        .await
        .context("Worker control channel failed")?;

    info!("Echo worker done: {:?} after {} payloads", exit, handler.echoed);

    // Exit directly: a blocking stdin read must not hold up runtime shutdown
    let code = match exit {
        WorkerExit::Finished => args.exit_code,
        WorkerExit::Terminated | WorkerExit::Disconnected => 0,
    };
    std::process::exit(code);
}
