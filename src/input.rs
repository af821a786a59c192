use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::error::Result;
use crate::session::Connection;
use crate::translate::translate;

/// Reads operator commands line by line and sends each one.
///
/// Returns once the input runs dry. Lines that do not parse are skipped, and
/// bytes that are not UTF-8 are replaced rather than rejected.
pub async fn pump<R, C>(mut input: R, connection: &C) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    C: Connection + ?Sized,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf).await? == 0 {
            debug!("end of input");
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        match translate(&line) {
            Some(message) => connection.send(message),
            None => debug!("skipping blank or unparsable line"),
        }
    }
}
