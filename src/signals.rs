use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::session::Connection;

/// What the operator asked for from outside the process.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Lifecycle {
    Disconnect,
    Quit,
}

/// The process signals the harness listens to.
///
/// SIGUSR1 disconnects; SIGINT, SIGTERM and SIGUSR2 quit. Installing these
/// replaces the default action, so SIGINT no longer kills the process.
pub struct Signals {
    interrupt: Signal,
    terminate: Signal,
    user1: Signal,
    user2: Signal,
}

impl Signals {
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
        })
    }

    /// Waits for the next signal. `None` once the signal driver is gone.
    pub async fn next(&mut self) -> Option<Lifecycle> {
        tokio::select! {
            got = self.user1.recv() => got.map(|_| {
                debug!(signal = "SIGUSR1", "signal received");
                Lifecycle::Disconnect
            }),
            got = self.interrupt.recv() => got.map(|_| {
                debug!(signal = "SIGINT", "signal received");
                Lifecycle::Quit
            }),
            got = self.terminate.recv() => got.map(|_| {
                debug!(signal = "SIGTERM", "signal received");
                Lifecycle::Quit
            }),
            got = self.user2.recv() => got.map(|_| {
                debug!(signal = "SIGUSR2", "signal received");
                Lifecycle::Quit
            }),
        }
    }

    /// Feeds every signal into `events` until either side goes away.
    pub async fn forward(mut self, events: mpsc::Sender<Lifecycle>) {
        while let Some(event) = self.next().await {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}

/// Applies each lifecycle request to the connection, one at a time, until the
/// sender side is dropped.
pub async fn route<C: Connection + ?Sized>(connection: &C, mut events: mpsc::Receiver<Lifecycle>) {
    while let Some(event) = events.recv().await {
        handle(connection, event);
    }
}

pub fn handle<C: Connection + ?Sized>(connection: &C, event: Lifecycle) {
    match event {
        Lifecycle::Disconnect => {
            connection.debugln("Disconnecting...");
            connection.disconnect();
        }
        Lifecycle::Quit => {
            connection.debugln("Quitting...");
            connection.quit();
        }
    }
}
