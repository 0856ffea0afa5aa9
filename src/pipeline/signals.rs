//! Runtime statistics on demand and the double Ctrl+C shutdown.
//!
//! OS signals are mapped to [`ControlSignal`]s by [`os_signals`]. A [`SignalMonitor`] reacts to
//! them: a status signal prints every processor's statistics, and a first interrupt does the
//! same and arms an [`InterruptGate`]. Only a second interrupt inside the gate's window ends the
//! run. When the window lapses the gate disarms and says so.

use crate::error::{ActionError, AppResult};
use crate::pipeline::processor::StatsHandle;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::Instant;

/// How long a first interrupt waits for a confirming second one.
pub const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(5);

pub const CONFIRM_PROMPT: &str = "Press Ctrl+C again to end the process";
pub const REARM_PROMPT: &str = "Press Ctrl+C to view statistics";

/// Signals the monitor understands, independent of the platform that delivered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Print statistics and carry on (SIGUSR1, or SIGINFO where the platform has it).
    Status,
    /// Ctrl+C / SIGINT.
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    ShowStats,
    /// First interrupt: show stats and wait for confirmation.
    Armed,
    Shutdown,
}

/// Debounce for interrupt-to-shutdown.
#[derive(Debug, Clone)]
pub struct InterruptGate {
    window: Duration,
    armed_until: Option<Instant>,
}

impl Default for InterruptGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_WINDOW)
    }
}

impl InterruptGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed_until: None,
        }
    }

    pub fn on_signal(&mut self, signal: ControlSignal, now: Instant) -> GateDecision {
        match signal {
            ControlSignal::Status => GateDecision::ShowStats,
            ControlSignal::Interrupt => match self.armed_until {
                Some(deadline) if now < deadline => GateDecision::Shutdown,
                _ => {
                    self.armed_until = Some(now + self.window);
                    GateDecision::Armed
                }
            },
        }
    }

    /// When the current confirmation window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.armed_until
    }

    /// Closes the window if it has lapsed. Returns `true` exactly once per lapsed window.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.armed_until {
            Some(deadline) if now >= deadline => {
                self.armed_until = None;
                true
            }
            _ => false,
        }
    }
}

/// Turns control signals into printed status lines and, eventually, a shutdown.
pub struct SignalMonitor {
    handles: Vec<StatsHandle>,
    gate: InterruptGate,
}

impl SignalMonitor {
    pub fn new(handles: Vec<StatsHandle>) -> Self {
        Self::with_gate(handles, InterruptGate::default())
    }

    pub fn with_gate(handles: Vec<StatsHandle>, gate: InterruptGate) -> Self {
        Self { handles, gate }
    }

    /// One `"{name} {stats}"` line per processor.
    pub fn status_lines(&self) -> Vec<String> {
        self.handles
            .iter()
            .map(|handle| format!("{} {}", handle.name(), handle.stats()))
            .collect()
    }

    /// Lines to print for `signal`, and whether the run should now end.
    pub fn respond(&mut self, signal: ControlSignal, now: Instant) -> (Vec<String>, bool) {
        match self.gate.on_signal(signal, now) {
            GateDecision::ShowStats => (self.status_lines(), false),
            GateDecision::Armed => {
                let mut lines = self.status_lines();
                lines.push(CONFIRM_PROMPT.to_string());
                (lines, false)
            }
            GateDecision::Shutdown => (Vec::new(), true),
        }
    }

    /// Reacts to `signals` until a confirmed interrupt arrives.
    ///
    /// If the signal stream ends, this never resolves.
    pub async fn run(mut self, mut signals: BoxStream<'static, ControlSignal>) {
        let mut signals_open = true;
        loop {
            let rearm = self.gate.deadline();
            tokio::select! {
                signal = signals.next(), if signals_open => {
                    let Some(signal) = signal else {
                        signals_open = false;
                        continue;
                    };
                    let (lines, shutdown) = self.respond(signal, Instant::now());
                    for line in lines {
                        println!("{}", line);
                    }
                    if shutdown {
                        tracing::info!("Interrupt confirmed, shutting down");
                        return;
                    }
                }
                _ = sleep_until_some(rearm) => {
                    if self.gate.expire(Instant::now()) {
                        println!("{}", REARM_PROMPT);
                    }
                }
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// Control signals delivered to this process.
#[cfg(unix)]
pub fn os_signals() -> AppResult<BoxStream<'static, ControlSignal>> {
    use tokio::signal::unix::{signal, SignalKind};
    use tokio_stream::wrappers::SignalStream;

    let install = |kind: SignalKind, name: &str| {
        signal(kind)
            .map(SignalStream::new)
            .map_err(|e| ActionError::Signal(format!("{}: {}", name, e)))
    };

    let interrupts =
        install(SignalKind::interrupt(), "SIGINT")?.map(|_| ControlSignal::Interrupt);
    let status =
        install(SignalKind::user_defined1(), "SIGUSR1")?.map(|_| ControlSignal::Status);

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    let signals = {
        let info = install(SignalKind::info(), "SIGINFO")?.map(|_| ControlSignal::Status);
        futures::stream::select_all([interrupts.boxed(), status.boxed(), info.boxed()]).boxed()
    };

    #[cfg(not(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )))]
    let signals = futures::stream::select(interrupts, status).boxed();

    Ok(signals)
}

/// Control signals delivered to this process. Only Ctrl+C is available here.
#[cfg(not(unix))]
pub fn os_signals() -> AppResult<BoxStream<'static, ControlSignal>> {
    Ok(futures::stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some((ControlSignal::Interrupt, ())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                None
            }
        }
    })
    .boxed())
}
