use std::io::Write;

use tokio::sync::mpsc;

use crate::error::Error;

/// Waits for the first session error and prints it. Only ever reports one:
/// once a session has failed, whatever follows is noise.
///
/// Returns whether anything was printed.
pub async fn observe_first<W: Write>(mut errors: mpsc::Receiver<Error>, mut out: W) -> bool {
    let Some(err) = errors.recv().await else {
        return false;
    };

    // Nowhere left to report a broken stderr to.
    let _ = writeln!(out, "[Error] {}", err);
    true
}
