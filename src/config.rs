use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::session::Address;

pub const DEFAULT_CONFIG_FILE: &str = "lmitest.toml";

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6667;
pub const DEFAULT_NICK: &str = "lmitest";
pub const DEFAULT_REAL_NAME: &str = "lmitest tester";

/// lmitest - A simple program to test an IRC connection.
///
/// Lines typed on stdin are sent to the server as-is; `CTCP_<TAG> <target>
/// :<text>` sends a CTCP request. SIGUSR1 disconnects, SIGINT/SIGTERM/SIGUSR2
/// quit.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "lmitest", version, about)]
pub struct Args {
    /// The address to connect to.
    #[arg(short, long)]
    pub address: Option<String>,

    /// The port to connect to.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Whether or not to enable TLS.
    #[arg(short = 's', long = "ssl", visible_alias = "tls")]
    pub tls: bool,

    /// Nickname to register with.
    #[arg(short, long)]
    pub nick: Option<String>,

    /// Username (ident) to register with. Defaults to the nickname.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Real name sent with USER.
    #[arg(short, long)]
    pub real_name: Option<String>,

    /// TOML file with defaults for any of the above.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub identity: IdentitySection,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentitySection {
    pub nick: Option<String>,
    pub user: Option<String>,
    pub real_name: Option<String>,
}

impl FileConfig {
    /// Loads the given file, or `lmitest.toml` from the working directory when
    /// it exists, or nothing at all.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading configuration from file: {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;

        let config = toml::from_str(&content)?;
        tracing::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

/// Everything the harness needs, settled once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub address: Address,
    pub tls: bool,
    pub nick: String,
    pub user: String,
    pub real_name: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let file = FileConfig::load(args.config.as_deref())?;
        Self::merge(args, file)
    }

    /// Flags win over the file, the file wins over the defaults.
    pub fn merge(args: Args, file: FileConfig) -> Result<Self> {
        let host = args
            .address
            .or(file.server.address)
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let port = args.port.or(file.server.port).unwrap_or(DEFAULT_PORT);
        let tls = args.tls || file.server.tls.unwrap_or(false);

        let nick = args
            .nick
            .or(file.identity.nick)
            .unwrap_or_else(|| DEFAULT_NICK.to_string());
        let user = args
            .user
            .or(file.identity.user)
            .unwrap_or_else(|| nick.clone());
        let real_name = args
            .real_name
            .or(file.identity.real_name)
            .unwrap_or_else(|| DEFAULT_REAL_NAME.to_string());

        if host.trim().is_empty() {
            return Err(Error::InvalidArgument("address must not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidArgument("port must not be 0".to_string()));
        }
        for (what, value) in [("nick", &nick), ("user", &user)] {
            if value.is_empty() || value.contains(char::is_whitespace) {
                return Err(Error::InvalidArgument(format!(
                    "{what} must be a single word, got {value:?}"
                )));
            }
        }

        Ok(Self {
            address: Address::new(host, port),
            tls,
            nick,
            user,
            real_name,
        })
    }
}
