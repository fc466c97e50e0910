//! Engine lifecycle: `Stopped → Starting → Running → Stopping → Stopped`.
//!
//! One mutex holds the authoritative [`Phase`]. A serving adapter claims the
//! lifecycle with [`Lifecycle::begin`], reports the bound address with
//! [`Serving::running`] and hands back its [`Drain`] outcome with
//! [`Serving::finish`]. `stop` callers cancel the run's token and wait for
//! that outcome on a `watch` channel, so any number of them can wait at once.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Capability;
use crate::error::{Error, Result};

/// Extra time `stop` waits past the grace period for the adapter to report.
const REPORT_SLACK: Duration = Duration::from_secs(1);

/// How a serving run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Drain {
    /// Every in-flight connection finished within the grace period.
    Clean,
    /// The grace period elapsed and the adapter closed what was left.
    Forced { connections: usize },
    /// The grace period elapsed and the backend cannot close what was left.
    Abandoned,
}

#[derive(Debug)]
enum Phase {
    Stopped,
    Starting(Run),
    Running(Run, SocketAddr),
    Stopping(Run),
}

#[derive(Clone, Debug)]
struct Run {
    token: CancellationToken,
    done: watch::Receiver<Option<Drain>>,
}

pub(crate) struct Lifecycle {
    adapter: &'static str,
    phase: Mutex<Phase>,
    grace: Mutex<Duration>,
}

impl Lifecycle {
    pub(crate) fn new(adapter: &'static str, grace: Duration) -> Self {
        Self { adapter, phase: Mutex::new(Phase::Stopped), grace: Mutex::new(grace) }
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(*self.phase(), Phase::Running(..))
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match *self.phase() {
            Phase::Running(_, addr) => Some(addr),
            _ => None,
        }
    }

    /// Grace period of the current (or last) stop request.
    pub(crate) fn grace(&self) -> Duration {
        *self.grace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the lifecycle for one serving run.
    ///
    /// # Errors
    ///
    /// [`Error::Shutdown`] unless the engine is stopped.
    pub(crate) fn begin(&self) -> Result<Serving<'_>> {
        let mut phase = self.phase();
        if !matches!(*phase, Phase::Stopped) {
            return Err(Error::Shutdown(format!("{} engine is already running", self.adapter)));
        }

        let token = CancellationToken::new();
        let (tx, done) = watch::channel(None);
        *phase = Phase::Starting(Run { token: token.clone(), done });
        debug!(adapter = self.adapter, "starting");

        Ok(Serving { lifecycle: self, token, tx: Some(tx) })
    }

    /// Cancels the current run and waits for it to drain.
    ///
    /// Returns `Ok(())` straight away when already stopped. A drain that had
    /// to force connections closed is reported as [`Error::Shutdown`]; one
    /// that had to leave them running as [`Error::AdapterLimitation`].
    pub(crate) async fn stop(&self, grace: Duration) -> Result<()> {
        let mut done = {
            let mut phase = self.phase();
            let run = match &*phase {
                Phase::Stopped => return Ok(()),
                Phase::Starting(run) | Phase::Running(run, _) | Phase::Stopping(run) => run.clone(),
            };
            if !matches!(*phase, Phase::Stopping(_)) {
                *self.grace.lock().unwrap_or_else(PoisonError::into_inner) = grace;
                info!(adapter = self.adapter, ?grace, "stopping");
            }
            run.token.cancel();
            *phase = Phase::Stopping(run.clone());
            run.done
        };

        let drain = match tokio::time::timeout(grace + REPORT_SLACK, done.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => (*outcome).unwrap_or(Drain::Clean),
            Ok(Err(_)) => Drain::Clean,
            Err(_) => {
                return Err(Error::Shutdown(format!("{} engine did not stop within {grace:?}", self.adapter)));
            }
        };

        match drain {
            Drain::Clean => Ok(()),
            Drain::Forced { connections } => Err(Error::Shutdown(format!(
                "grace period of {grace:?} elapsed, force-closed {connections} connection(s)"
            ))),
            Drain::Abandoned => {
                Err(Error::AdapterLimitation { adapter: self.adapter, capability: Capability::ForceClose })
            }
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An adapter's claim on a running lifecycle.
///
/// Dropping it without calling [`finish`](Serving::finish) (for example when
/// binding fails) returns the engine to `Stopped` with a clean drain.
pub(crate) struct Serving<'a> {
    lifecycle: &'a Lifecycle,
    token: CancellationToken,
    tx: Option<watch::Sender<Option<Drain>>>,
}

impl Serving<'_> {
    /// Cancelled once `stop` has been called.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Records the bound address. A run that is already stopping stays so.
    pub(crate) fn running(&self, addr: SocketAddr) {
        let mut phase = self.lifecycle.phase();
        if let Phase::Starting(run) = &*phase {
            let run = run.clone();
            *phase = Phase::Running(run, addr);
        }
        info!(adapter = self.lifecycle.adapter, %addr, "listening");
    }

    pub(crate) fn finish(mut self, drain: Drain) {
        self.complete(drain);
    }

    fn complete(&mut self, drain: Drain) {
        let Some(tx) = self.tx.take() else { return };
        *self.lifecycle.phase() = Phase::Stopped;
        tx.send_replace(Some(drain));
        info!(adapter = self.lifecycle.adapter, ?drain, "stopped");
    }
}

impl Drop for Serving<'_> {
    fn drop(&mut self) {
        self.complete(Drain::Clean);
    }
}
