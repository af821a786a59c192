use std::sync::Arc;

use tokio::io::{self, AsyncBufRead, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::input;
use crate::observer;
use crate::session::{Connection, Session};
use crate::signals::{self, Signals};

const SIGNAL_BUFFER: usize = 8;

/// Runs the harness against stdin.
pub async fn run(config: Config) -> Result<()> {
    run_with(config, BufReader::new(io::stdin())).await
}

/// Connects, then relays `input` to the server until it runs out, with
/// signals and session errors handled on the side.
///
/// Only a failed connect (or signal setup) is an error here; anything that
/// goes wrong with the session afterwards is printed by the error observer.
pub async fn run_with<R>(config: Config, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut session = Session::create(config.nick, config.user, config.address);
    session
        .set_real_name(config.real_name)
        .set_debug(true)
        .set_use_tls(config.tls);

    session.connect().await?;
    let session = Arc::new(session);

    tokio::spawn({
        let session = session.clone();
        async move { session.run_loop().await }
    });

    let (events, lifecycle) = mpsc::channel(SIGNAL_BUFFER);
    tokio::spawn(Signals::install()?.forward(events));
    tokio::spawn({
        let session = session.clone();
        async move { signals::route(session.as_ref(), lifecycle).await }
    });

    if let Some(errors) = session.take_errors() {
        tokio::spawn(observer::observe_first(errors, std::io::stderr()));
    }

    let pumped = input::pump(input, session.as_ref()).await;

    info!("input closed, quitting");
    session.quit();
    session.closed().await;

    pumped
}
