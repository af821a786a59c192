use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{
    self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ctcp;
use crate::error::{Error, Result};
use crate::message::{Message, ERROR, NICK, NOTICE, PING, PONG, PRIVMSG, QUIT, RPL_WELCOME, USER};

pub const WIRE_TARGET: &str = "lmitest::wire";

const ERROR_BUFFER: usize = 16;

/// The control surface the input pump and the signal router drive.
///
/// Every method takes `&self` and none of them block, so one connection can
/// be shared between tasks without any extra locking.
pub trait Connection: Send + Sync {
    /// Queue a message for the server. Failures show up on the error channel.
    fn send(&self, message: Message);

    /// Drop the socket without saying goodbye.
    fn disconnect(&self);

    /// Send `QUIT` and close once it is written. Does nothing when the
    /// connection is already gone.
    fn quit(&self);

    fn debugln(&self, line: &str);
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

type Stream = Box<dyn Transport>;

enum Outbound {
    Message(Message),
    /// Written last; the writer closes the connection right after it.
    Quit(Message),
}

struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: Option<BufReader<ReadHalf<Stream>>>,
    closed: CancellationToken,
    /// Set once `QUIT` is queued. The server hanging up after that is expected.
    leaving: CancellationToken,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

pub struct Session {
    nick: String,
    user: String,
    real_name: String,
    address: Address,
    use_tls: bool,
    debug: bool,

    status: Mutex<ConnectionStatus>,
    link: Mutex<Option<Link>>,

    errors: mpsc::Sender<Error>,
    errors_rx: Mutex<Option<mpsc::Receiver<Error>>>,
}

impl Session {
    pub fn create<N: Into<String>, U: Into<String>>(nick: N, user: U, address: Address) -> Self {
        let nick = nick.into();
        let (errors, errors_rx) = mpsc::channel(ERROR_BUFFER);

        Self {
            real_name: nick.clone(),
            nick,
            user: user.into(),
            address,
            use_tls: false,
            debug: false,

            status: Mutex::new(ConnectionStatus::Disconnected),
            link: Mutex::new(None),

            errors,
            errors_rx: Mutex::new(Some(errors_rx)),
        }
    }

    pub fn set_real_name<R: Into<String>>(&mut self, real_name: R) -> &mut Self {
        self.real_name = real_name.into();
        self
    }

    /// Trace every line sent and received.
    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    pub fn set_use_tls(&mut self, use_tls: bool) -> &mut Self {
        self.use_tls = use_tls;
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.link().as_ref() {
            Some(link) if link.is_open() => *self.lock_status(),
            _ => ConnectionStatus::Disconnected,
        }
    }

    /// The receiving end of the error channel. Handed out once.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<Error>> {
        self.errors_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Opens the socket and queues registration. Inbound traffic is not read
    /// until [`Session::run_loop`] is running.
    pub async fn connect(&self) -> Result<()> {
        info!(address = %self.address, tls = self.use_tls, "connecting");
        *self.lock_status() = ConnectionStatus::Connecting;

        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(err) => {
                *self.lock_status() = ConnectionStatus::Disconnected;
                return Err(err);
            }
        };

        let (reader, writer) = io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        for message in self.registration() {
            // Nothing has taken the queue yet, so this cannot fail.
            let _ = outbound.send(Outbound::Message(message));
        }

        tokio::spawn(write_loop(
            writer,
            queue,
            closed.clone(),
            self.errors.clone(),
            self.debug,
        ));

        *self.link() = Some(Link {
            outbound,
            reader: Some(BufReader::new(reader)),
            closed,
            leaving: CancellationToken::new(),
        });

        info!(address = %self.address, "connected");
        Ok(())
    }

    /// Reads from the server until the connection closes, answering the bits
    /// of protocol that need no operator (PING, CTCP VERSION/PING).
    pub async fn run_loop(&self) {
        let Some((mut reader, outbound, closed, leaving)) = self.take_reader() else {
            warn!("event loop started without a connection");
            return;
        };

        let mut buf = Vec::new();
        loop {
            buf.clear();

            let read = tokio::select! {
                _ = closed.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => {
                    if !closed.is_cancelled() && !leaving.is_cancelled() {
                        self.report(Error::ConnectionClosed);
                    }
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    self.handle_line(&line, &outbound, &leaving);
                }
                Err(err) => {
                    if !closed.is_cancelled() && !leaving.is_cancelled() {
                        self.report(err.into());
                    }
                    break;
                }
            }
        }

        closed.cancel();
        debug!("event loop finished");
    }

    /// Resolves once the current connection has closed. Returns straight
    /// away if there never was one.
    pub async fn closed(&self) {
        let closed = self.link().as_ref().map(|link| link.closed.clone());

        if let Some(closed) = closed {
            closed.cancelled().await;
        }
    }

    async fn open(&self) -> Result<Stream> {
        let tcp = TcpStream::connect((self.address.host.as_str(), self.address.port)).await?;

        if !self.use_tls {
            return Ok(Box::new(tcp));
        }

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(self.address.host.clone())
            .map_err(|_| Error::InvalidServerName(self.address.host.clone()))?;

        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await?;

        debug!(host = %self.address.host, "TLS handshake complete");
        Ok(Box::new(tls))
    }

    fn registration(&self) -> Vec<Message> {
        vec![
            Message::new(NICK).with_params([self.nick.as_str()]),
            Message::new(USER)
                .with_params([self.user.as_str(), "0", "*"])
                .with_trailing(self.real_name.as_str()),
        ]
    }

    fn take_reader(
        &self,
    ) -> Option<(
        BufReader<ReadHalf<Stream>>,
        mpsc::UnboundedSender<Outbound>,
        CancellationToken,
        CancellationToken,
    )> {
        let mut link = self.link();
        let link = link.as_mut()?;
        let reader = link.reader.take()?;

        Some((
            reader,
            link.outbound.clone(),
            link.closed.clone(),
            link.leaving.clone(),
        ))
    }

    fn handle_line(
        &self,
        line: &str,
        outbound: &mpsc::UnboundedSender<Outbound>,
        leaving: &CancellationToken,
    ) {
        let line = line.trim_end_matches(['\r', '\n']);
        self.debugln(&format!("<- {line}"));

        let Some(message) = Message::parse(line) else {
            return;
        };

        let reply = match message.command.as_str() {
            PING => Some(Message {
                params: message.params.clone(),
                trailing: message.trailing.clone(),
                ..Message::new(PONG)
            }),
            RPL_WELCOME => {
                *self.lock_status() = ConnectionStatus::Connected;
                info!(nick = %self.nick, "registered");
                None
            }
            ERROR if leaving.is_cancelled() => {
                debug!("server acknowledged quit");
                None
            }
            ERROR => {
                self.report(Error::Server(message.trailing.clone().unwrap_or_default()));
                None
            }
            PRIVMSG => ctcp_reply(&message),
            _ => None,
        };

        if let Some(reply) = reply {
            // The writer is gone only once the connection is closing.
            let _ = outbound.send(Outbound::Message(reply));
        }
    }

    fn report(&self, err: Error) {
        report(&self.errors, err);
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, ConnectionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connection for Session {
    fn send(&self, message: Message) {
        let queued = match self.link().as_ref() {
            Some(link) if link.is_open() => link.outbound.send(Outbound::Message(message)).is_ok(),
            _ => false,
        };

        if !queued {
            self.report(Error::NotConnected);
        }
    }

    fn disconnect(&self) {
        if let Some(link) = self.link().as_mut() {
            if link.is_open() {
                info!(address = %self.address, "disconnecting");
            }
            link.closed.cancel();
            link.reader = None;
        }
    }

    fn quit(&self) {
        match self.link().as_ref() {
            Some(link) if link.is_open() => {
                link.leaving.cancel();
                if link.outbound.send(Outbound::Quit(Message::new(QUIT))).is_err() {
                    link.closed.cancel();
                }
            }
            _ => debug!("quit requested but the connection is already closed"),
        }
    }

    fn debugln(&self, line: &str) {
        if self.debug {
            info!(target: WIRE_TARGET, "{}", line);
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<Stream>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    closed: CancellationToken,
    errors: mpsc::Sender<Error>,
    debug: bool,
) {
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = queue.recv() => next,
        };

        let (message, last) = match next {
            Some(Outbound::Message(message)) => (message, false),
            Some(Outbound::Quit(message)) => (message, true),
            None => break,
        };

        let line = message.to_string();
        if debug {
            info!(target: WIRE_TARGET, "-> {}", line);
        }

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await
        };

        if let Err(err) = written.await {
            if !closed.is_cancelled() {
                report(&errors, err.into());
            }
            break;
        }

        if last {
            break;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!("socket shutdown failed: {}", err);
    }
    closed.cancel();
}

fn ctcp_reply(message: &Message) -> Option<Message> {
    let (tag, text) = ctcp::decode(message.trailing.as_deref()?)?;
    let nick = message.source_nick()?;

    let answer = match tag {
        ctcp::VERSION => format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        ctcp::PING => text.to_string(),
        _ => return None,
    };

    Some(
        Message::new(NOTICE)
            .with_params([nick])
            .with_trailing(ctcp::encode(tag, &answer)),
    )
}

fn report(errors: &mpsc::Sender<Error>, err: Error) {
    warn!("session error: {}", err);

    if errors.try_send(err).is_err() {
        debug!("error channel full or closed, dropping error");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use super::*;

    async fn listen() -> (TcpListener, Address) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Address::new("127.0.0.1", port))
    }

    async fn started(address: Address) -> (Arc<Session>, JoinHandle<()>) {
        let mut session = Session::create("tester", "tester", address);
        session.set_real_name("harness tester").set_debug(true);
        session.connect().await.unwrap();

        let session = Arc::new(session);
        let event_loop = tokio::spawn({
            let session = session.clone();
            async move { session.run_loop().await }
        });
        (session, event_loop)
    }

    async fn connected(address: Address) -> Arc<Session> {
        started(address).await.0
    }

    #[tokio::test]
    async fn registers_and_answers_ping() {
        let (listener, address) = listen().await;
        let session = connected(address).await;

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "NICK tester");
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "USER tester 0 * :harness tester"
        );
        assert_eq!(session.status(), ConnectionStatus::Connecting);

        write.write_all(b"PING :irc.example.net\r\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "PONG :irc.example.net"
        );

        write
            .write_all(b":irc.example.net 001 tester :Welcome\r\nPING :again\r\n")
            .await
            .unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PONG :again");
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn answers_ctcp_version() {
        let (listener, address) = listen().await;
        let _session = connected(address).await;

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap();
        lines.next_line().await.unwrap();

        write
            .write_all(b":bob!b@host PRIVMSG tester :\x01VERSION\x01\r\n")
            .await
            .unwrap();

        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with("NOTICE bob :\x01VERSION lmitest "), "{reply:?}");
    }

    #[tokio::test]
    async fn answers_ctcp_ping_with_the_same_payload() {
        let (listener, address) = listen().await;
        let _session = connected(address).await;

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap();
        lines.next_line().await.unwrap();

        write
            .write_all(b":bob!b@host PRIVMSG tester :\x01PING 1700000000 123\x01\r\n")
            .await
            .unwrap();

        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "NOTICE bob :\x01PING 1700000000 123\x01"
        );
    }

    #[tokio::test]
    async fn server_error_line_is_reported() {
        let (listener, address) = listen().await;
        let session = connected(address).await;
        let mut errors = session.take_errors().unwrap();

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap();
        lines.next_line().await.unwrap();

        write
            .write_all(b"ERROR :Closing Link: tester (Excess Flood)\r\n")
            .await
            .unwrap();
        drop(write);
        drop(lines);

        let err = timeout(Duration::from_secs(5), errors.recv())
            .await
            .unwrap()
            .unwrap();
        match err {
            Error::Server(reason) => assert_eq!(reason, "Closing Link: tester (Excess Flood)"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn server_goodbye_after_quit_is_not_an_error() {
        let (listener, address) = listen().await;
        let (session, event_loop) = started(address).await;
        let mut errors = session.take_errors().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                if line == "QUIT" {
                    write
                        .write_all(b"ERROR :Closing Link: tester (Quit)\r\n")
                        .await
                        .unwrap();
                    break;
                }
            }
        });

        session.quit();
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        timeout(Duration::from_secs(5), event_loop).await.unwrap().unwrap();
        timeout(Duration::from_secs(5), session.closed()).await.unwrap();

        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn quit_writes_quit_then_closes() {
        let (listener, address) = listen().await;
        let session = connected(address).await;

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut seen = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                seen.push(line);
            }
            seen
        });

        session.send(Message::new("JOIN").with_params(["#test"]));
        session.quit();
        timeout(Duration::from_secs(5), session.closed()).await.unwrap();

        let seen = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
        assert!(seen.contains(&"JOIN #test".to_string()));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        // Again, and after a disconnect: both are harmless.
        session.quit();
        session.disconnect();
        session.quit();
    }

    #[tokio::test]
    async fn server_hangup_is_reported() {
        let (listener, address) = listen().await;
        let session = connected(address).await;
        let mut errors = session.take_errors().unwrap();
        assert!(session.take_errors().is_none());

        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        lines.next_line().await.unwrap();
        lines.next_line().await.unwrap();
        drop(lines);

        let err = timeout(Duration::from_secs(5), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, Error::ConnectionClosed), "{err}");

        timeout(Duration::from_secs(5), session.closed()).await.unwrap();
        session.send(Message::new("PRIVMSG").with_params(["#test"]));
        let err = errors.recv().await.unwrap();
        assert!(matches!(err, Error::NotConnected), "{err}");
    }

    #[tokio::test]
    async fn disconnect_closes_without_error() {
        let (listener, address) = listen().await;
        let session = connected(address).await;
        let mut errors = session.take_errors().unwrap();
        let (_socket, _) = listener.accept().await.unwrap();

        session.disconnect();
        session.disconnect();
        timeout(Duration::from_secs(5), session.closed()).await.unwrap();

        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn controls_before_connect_are_harmless() {
        let session = Session::create("tester", "tester", Address::new("127.0.0.1", 6667));
        session.quit();
        session.disconnect();
        session.closed().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn connect_failure() {
        let (listener, address) = listen().await;
        drop(listener);

        let session = Session::create("tester", "tester", address);
        assert!(matches!(session.connect().await, Err(Error::Io(_))));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }
}
