use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("Logging error: {0}")]
    Logging(#[from] tracing_subscriber::filter::ParseError),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by server")]
    ConnectionClosed,

    /// An `ERROR` line sent by the server before it drops us.
    #[error("Server error: {0}")]
    Server(String),
}
