//! Process signals that stop the scan and poll loops.
//!
//! The loops observe a [`CancellationToken`]; a signal only cancels it, so
//! the file in flight always reaches its terminal location.

use std::future::Future;
use std::io;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM.
pub async fn cancel_on_signal(cancel: CancellationToken) -> StopSignal {
    cancel_on_first(tokio::signal::ctrl_c(), terminate(), cancel).await
}

#[cfg(unix)]
async fn terminate() -> io::Result<()> {
    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    stream.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> io::Result<()> {
    std::future::pending().await
}

/// Wait for whichever source fires first, then cancel. A source whose
/// handler cannot be installed is logged and never fires.
pub async fn cancel_on_first<I, T>(interrupt: I, terminate: T, cancel: CancellationToken) -> StopSignal
where
    I: Future<Output = io::Result<()>>,
    T: Future<Output = io::Result<()>>,
{
    let signal = tokio::select! {
        s = listen(interrupt, StopSignal::Interrupt) => s,
        s = listen(terminate, StopSignal::Terminate) => s,
    };
    tracing::info!(signal = signal.as_str(), "Shutdown requested, finishing current file");
    cancel.cancel();
    signal
}

async fn listen<F>(source: F, signal: StopSignal) -> StopSignal
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = source.await {
        tracing::warn!(signal = signal.as_str(), error = %e, "Cannot install signal handler");
        std::future::pending::<()>().await;
    }
    signal
}
