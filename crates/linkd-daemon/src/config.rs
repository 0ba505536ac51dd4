//! Command-line options and session configuration.
//!
//! [`Args`] is the clap surface of the `linkd` binary. It converts into a
//! [`Config`], which is all the session needs and has a [`Default`] usable
//! from tests.

use std::{path::PathBuf, time::Duration};

use clap::Parser;

/// Default directory for pid files.
pub const DEFAULT_RUN_DIR: &str = "/var/run";

/// Default script run once the interface unit is known.
pub const DEFAULT_NET_INIT: &str = "/etc/ppp/net-init";

/// Default script run when entering the network phase.
pub const DEFAULT_NET_PRE_UP: &str = "/etc/ppp/net-pre-up";

/// Default script run when entering the disconnect phase.
pub const DEFAULT_NET_DOWN: &str = "/etc/ppp/net-down";

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Restart the session after it ends
    pub persist: bool,
    /// Delay before a restart
    pub holdoff: Duration,
    /// Stop after this many consecutive unsuccessful attempts (0 = never)
    pub maxfail: u32,
    /// Bring the link up only when outbound traffic appears
    pub demand: bool,
    /// Start with debug logging
    pub debug: bool,
    /// How long to wait for children at exit before terminating them
    pub child_timeout: Duration,
    /// Requested interface name
    pub ifname: Option<String>,
    /// Interface unit number
    pub unit: u32,
    /// Device name passed to scripts
    pub device: String,
    /// Extra parameter passed to scripts
    pub ipparam: Option<String>,
    /// Line speed passed to scripts
    pub baud_rate: u32,
    /// Logical link name, used for the link pid file
    pub linkname: Option<String>,
    /// Number of the remote end, exported to scripts
    pub remote_number: Option<String>,
    /// Directory for pid files
    pub run_dir: PathBuf,
    /// Script run when the interface unit is assigned
    pub net_init: Option<PathBuf>,
    /// Script run before the network phase begins
    pub net_pre_up: Option<PathBuf>,
    /// Script run on disconnect
    pub net_down: Option<PathBuf>,
    /// Realm-to-server map for authentication
    pub realms_file: Option<PathBuf>,
    /// User name for realm lookup
    pub user: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persist: false,
            holdoff: Duration::from_secs(30),
            maxfail: 10,
            demand: false,
            debug: false,
            child_timeout: Duration::from_secs(5),
            ifname: None,
            unit: 0,
            device: String::new(),
            ipparam: None,
            baud_rate: 0,
            linkname: None,
            remote_number: None,
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
            net_init: Some(PathBuf::from(DEFAULT_NET_INIT)),
            net_pre_up: Some(PathBuf::from(DEFAULT_NET_PRE_UP)),
            net_down: Some(PathBuf::from(DEFAULT_NET_DOWN)),
            realms_file: None,
            user: None,
        }
    }
}

impl Config {
    /// Interface name the session starts with.
    pub fn interface_name(&self) -> String {
        self.ifname.clone().unwrap_or_else(|| format!("ppp{}", self.unit))
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "linkd")]
#[command(version, about = "Point-to-point link session daemon", long_about = None)]
pub struct Args {
    /// Local datagram socket to bind
    #[arg(long)]
    pub local_socket: PathBuf,

    /// Peer datagram socket to connect to
    #[arg(long)]
    pub peer_socket: PathBuf,

    /// Shell command run before each connect
    #[arg(long)]
    pub connector: Option<String>,

    /// Restart the session after it ends
    #[arg(long)]
    pub persist: bool,

    /// Seconds to wait before restarting
    #[arg(long, default_value = "30")]
    pub holdoff: u64,

    /// Give up after this many failed attempts (0 = never)
    #[arg(long, default_value = "10")]
    pub maxfail: u32,

    /// Bring the link up on outbound traffic only
    #[arg(long)]
    pub demand: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Seconds to wait for scripts at exit
    #[arg(long, default_value = "5")]
    pub child_timeout: u64,

    /// Interface name (default ppp<unit>)
    #[arg(long)]
    pub ifname: Option<String>,

    /// Interface unit number
    #[arg(long, default_value = "0")]
    pub unit: u32,

    /// Parameter passed to scripts
    #[arg(long)]
    pub ipparam: Option<String>,

    /// Line speed passed to scripts
    #[arg(long, default_value = "0")]
    pub baud_rate: u32,

    /// Logical link name
    #[arg(long)]
    pub linkname: Option<String>,

    /// Remote number exported to scripts
    #[arg(long)]
    pub remote_number: Option<String>,

    /// Directory for pid files
    #[arg(long, default_value = DEFAULT_RUN_DIR)]
    pub run_dir: PathBuf,

    /// Script run when the interface unit is assigned
    #[arg(long, default_value = DEFAULT_NET_INIT)]
    pub net_init: PathBuf,

    /// Script run before the network phase
    #[arg(long, default_value = DEFAULT_NET_PRE_UP)]
    pub net_pre_up: PathBuf,

    /// Script run on disconnect
    #[arg(long, default_value = DEFAULT_NET_DOWN)]
    pub net_down: PathBuf,

    /// Realms file for authentication server selection
    #[arg(long)]
    pub realms_file: Option<PathBuf>,

    /// User name for realm lookup
    #[arg(long)]
    pub user: Option<String>,

    /// Negotiate authentication before the network phase
    #[arg(long)]
    pub auth: bool,

    /// Run without root privileges
    #[arg(long, hide = true)]
    pub allow_unprivileged: bool,
}

impl Args {
    /// Session configuration from these arguments.
    pub fn config(&self) -> Config {
        Config {
            persist: self.persist,
            holdoff: Duration::from_secs(self.holdoff),
            maxfail: self.maxfail,
            demand: self.demand,
            debug: self.debug,
            child_timeout: Duration::from_secs(self.child_timeout),
            ifname: self.ifname.clone(),
            unit: self.unit,
            device: self.peer_socket.display().to_string(),
            ipparam: self.ipparam.clone(),
            baud_rate: self.baud_rate,
            linkname: self.linkname.clone(),
            remote_number: self.remote_number.clone(),
            run_dir: self.run_dir.clone(),
            net_init: Some(self.net_init.clone()),
            net_pre_up: Some(self.net_pre_up.clone()),
            net_down: Some(self.net_down.clone()),
            realms_file: self.realms_file.clone(),
            user: self.user.clone(),
        }
    }
}
