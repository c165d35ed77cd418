//! Worker process channel
//!
//! A [`WorkerChannel`] owns exactly one worker process. All of its state lives
//! in a single driver task that reacts to commands from the handle, frames
//! from the worker, write completions and the process exit, so nothing here is
//! locked. The owner observes the channel only through [`ChannelEvent`]s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use procchan_config::ChannelConfig;
use procchan_ipc::WireMessage;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::event::{ChannelEvent, ChannelEvents, ExitInfo};
use crate::kill;
use crate::launch::LaunchOptions;
use crate::pipe::{self, InboundFrame, StdinSink, WriteCompletion};
use crate::queue::{Flow, SendQueue};

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Starting,
    Running(Flow),
    Stopping,
    /// Terminal
    Exited,
}

impl ChannelState {
    pub fn is_exited(&self) -> bool {
        matches!(self, ChannelState::Exited)
    }
}

enum Command {
    Send(Bytes),
    Stop(oneshot::Sender<()>),
}

/// Everything the driver takes over when the channel starts
struct Startup {
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
}

/// Handle to one worker process
pub struct WorkerChannel {
    entry: PathBuf,
    launch: LaunchOptions,
    config: ChannelConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    startup: Option<Startup>,
    pid: Option<u32>,
}

impl WorkerChannel {
    /// Create a channel for the worker at `entry`. Nothing is spawned until
    /// [`start`](Self::start).
    pub fn new(
        entry: impl Into<PathBuf>,
        launch: LaunchOptions,
        config: ChannelConfig,
    ) -> (Self, ChannelEvents) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Created);

        let channel = Self {
            entry: entry.into(),
            launch,
            config,
            commands: commands_tx,
            state: state_rx,
            startup: Some(Startup {
                commands: commands_rx,
                events: events_tx,
                state: state_tx,
            }),
            pid: None,
        };

        (channel, events_rx)
    }

    /// Spawn the worker and attach its listeners.
    ///
    /// Returns once the driver is running; it does not wait for the worker to
    /// be ready. Spawn failures are reported as a [`ChannelEvent::Error`] and
    /// leave the channel exited. Must be called inside a Tokio runtime.
    pub fn start(&mut self) {
        let Some(startup) = self.startup.take() else {
            warn!("Worker {} already started", self.entry.display());
            return;
        };
        startup.state.send_replace(ChannelState::Starting);

        let mut child = match self.launch.command(&self.entry).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn worker {}: {}", self.entry.display(), e);
                let _ = startup
                    .events
                    .send(ChannelEvent::Error(ChannelError::SpawnError(e.to_string())));
                startup.state.send_replace(ChannelState::Exited);
                return;
            }
        };

        self.pid = child.id();
        let label = match self.pid {
            Some(pid) => format!("{}[{}]", worker_name(&self.entry), pid),
            None => worker_name(&self.entry),
        };

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                // Unreachable with piped stdio, but never leave a process behind
                let _ = startup.events.send(ChannelEvent::Error(ChannelError::SpawnError(
                    "worker stdio was not captured".to_string(),
                )));
                let _ = kill::kill(&mut child);
                startup.state.send_replace(ChannelState::Exited);
                return;
            }
        };

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let sink = pipe::spawn_writer(
            label.clone(),
            stdin,
            self.config.high_water_mark,
            completions_tx,
        );
        let inbound = pipe::spawn_reader(label.clone(), stdout);

        info!("Started worker {}", label);

        let driver = Driver {
            label,
            child,
            sink,
            queue: SendQueue::new(self.config.throttle_policy),
            config: self.config.clone(),
            commands: startup.commands,
            completions: completions_rx,
            inbound,
            events: startup.events,
            state: startup.state,
            stop_waiters: Vec::new(),
            stopping: false,
            force_kill_at: None,
            hard_kill_at: None,
        };

        // Detached: the channel never keeps the runtime alive on its own
        tokio::spawn(driver.run());
    }

    /// Queue `payload` for the worker. Never fails; problems surface as events.
    ///
    /// Payloads sent before [`start`](Self::start) are delivered once the
    /// worker is up. Payloads sent after exit are dropped.
    pub fn send(&self, payload: impl Into<Bytes>) {
        if self.commands.send(Command::Send(payload.into())).is_err() {
            debug!("Dropping payload for exited worker {}", self.entry.display());
        }
    }

    /// Ask the worker to terminate and wait until it has exited.
    ///
    /// If the worker does not exit within the shutdown timeout it is
    /// interrupted, and killed if it still lingers after the kill grace period.
    /// Returns immediately when the worker has already exited.
    pub async fn stop(&self) {
        if self.state.borrow().is_exited() {
            return;
        }
        if self.startup.is_some() {
            debug!("Stop requested for worker {} that never started", self.entry.display());
            return;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(reply_tx)).is_err() {
            return;
        }

        // A dropped reply also means the driver has finished
        let _ = reply_rx.await;
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// OS process id, once started
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

fn worker_name(entry: &Path) -> String {
    entry
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.display().to_string())
}

/// Sole owner of the worker process and the channel's mutable state
struct Driver {
    label: String,
    child: Child,
    sink: StdinSink,
    queue: SendQueue,
    config: ChannelConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<WriteCompletion>,
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
    stop_waiters: Vec<oneshot::Sender<()>>,
    stopping: bool,
    force_kill_at: Option<Instant>,
    hard_kill_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        self.state
            .send_replace(ChannelState::Running(self.queue.flow()));

        let mut commands_open = true;
        let mut completions_open = true;
        let mut inbound_open = true;

        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,

                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Send(payload)) => self.handle_send(payload),
                    Some(Command::Stop(reply)) => self.begin_stop(Some(reply)),
                    None => {
                        commands_open = false;
                        debug!("Handle for worker {} dropped, shutting it down", self.label);
                        self.begin_stop(None);
                    }
                },

                completion = self.completions.recv(), if completions_open => match completion {
                    Some(result) => {
                        self.queue.on_write_complete(result, &mut self.sink);
                        self.publish_flow();
                    }
                    None => completions_open = false,
                },

                frame = self.inbound.recv(), if inbound_open => match frame {
                    Some(frame) => self.forward_inbound(frame),
                    None => inbound_open = false,
                },

                _ = sleep_until_opt(self.force_kill_at) => self.force_kill(),

                _ = sleep_until_opt(self.hard_kill_at) => self.hard_kill(),
            }
        };

        // Exit wins the race: the kill timers die with this loop
        self.force_kill_at = None;
        self.hard_kill_at = None;

        if inbound_open {
            self.drain_inbound().await;
        }

        let info = match status {
            Ok(status) => ExitInfo::from(status),
            Err(e) => {
                self.emit(ChannelEvent::Error(ChannelError::from(e)));
                ExitInfo::default()
            }
        };

        info!(
            "Worker {} exited (code: {:?}, signal: {:?})",
            self.label, info.code, info.signal
        );
        self.emit(ChannelEvent::Exit(info));
        self.state.send_replace(ChannelState::Exited);

        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn handle_send(&mut self, payload: Bytes) {
        if self.stopping {
            debug!("Dropping payload for stopping worker {}", self.label);
            return;
        }
        self.queue.send(payload, &mut self.sink);
        self.publish_flow();
    }

    fn begin_stop(&mut self, reply: Option<oneshot::Sender<()>>) {
        if let Some(reply) = reply {
            self.stop_waiters.push(reply);
        }
        if self.stopping {
            return;
        }

        self.stopping = true;
        self.state.send_replace(ChannelState::Stopping);

        let discarded = self.queue.discard_pending();
        if discarded > 0 {
            debug!(
                "Discarding {} queued payloads for stopping worker {}",
                discarded, self.label
            );
        }

        debug!("Sending terminate directive to worker {}", self.label);
        if !self.sink.write_control(WireMessage::Terminate) {
            debug!("Worker {} stdin already closed", self.label);
        }

        self.force_kill_at = deadline_after(self.config.shutdown_timeout);
        if self.force_kill_at.is_none() {
            debug!("Shutdown timeout for worker {} is unbounded, waiting for exit", self.label);
        }
    }

    fn force_kill(&mut self) {
        self.force_kill_at = None;
        warn!(
            "Worker {} did not exit within {:?}, interrupting",
            self.label, self.config.shutdown_timeout
        );

        if let Err(e) = kill::interrupt(&mut self.child) {
            self.emit(ChannelEvent::Error(e));
        }
        self.hard_kill_at = deadline_after(self.config.kill_grace);
    }

    fn hard_kill(&mut self) {
        self.hard_kill_at = None;
        warn!("Worker {} ignored the interrupt, killing", self.label);

        if let Err(e) = kill::kill(&mut self.child) {
            self.emit(ChannelEvent::Error(e));
        }
    }

    fn forward_inbound(&self, frame: InboundFrame) {
        match frame {
            Ok(payload) => self.emit(ChannelEvent::Message(payload)),
            Err(e) => self.emit(ChannelEvent::Error(ChannelError::Ipc(e))),
        }
    }

    /// Deliver what the worker wrote before it died, within the drain budget
    async fn drain_inbound(&mut self) {
        let budget = self.config.exit_drain_timeout;
        let drain = async {
            while let Some(frame) = self.inbound.recv().await {
                self.forward_inbound(frame);
            }
        };

        if timeout(budget, drain).await.is_err() {
            debug!("Worker {} stdout still open after exit, not waiting", self.label);
        }
    }

    fn publish_flow(&self) {
        if self.stopping {
            return;
        }
        let next = ChannelState::Running(self.queue.flow());
        self.state.send_if_modified(|state| {
            if *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    fn emit(&self, event: ChannelEvent) {
        // The owner may have stopped listening; that is not our problem
        let _ = self.events.send(event);
    }
}

/// `None` when the delay is too large to be represented, i.e. never
fn deadline_after(delay: Duration) -> Option<Instant> {
    Instant::now().checked_add(delay)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
