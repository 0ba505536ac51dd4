//! Per-realm authentication server selection.
//!
//! The realms file is a flat list of entries:
//!
//! ```text
//! # kind       realm      host:port
//! authserver   example.net radius1.example.net:1812
//! acctserver   DEFAULT     10.0.0.1:1813
//! ```
//!
//! A user's realm is whatever follows the last `@` in the user name. Users
//! without a realm, or with an empty one, match the `DEFAULT` entries. At
//! most [`SERVER_MAX`] servers of each kind are kept; later entries of a
//! full kind are ignored without being checked.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::RealmError;

/// Maximum servers of one kind.
pub const SERVER_MAX: usize = 8;

/// Realm name matched by users without a realm.
pub const DEFAULT_REALM: &str = "DEFAULT";

/// One server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Host name or address
    pub host: String,
    /// UDP port
    pub port: u16,
}

/// Servers selected for a realm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmServers {
    /// Authentication servers, in file order
    pub auth: Vec<ServerAddress>,
    /// Accounting servers, in file order
    pub acct: Vec<ServerAddress>,
}

impl RealmServers {
    /// Whether no server matched.
    pub fn is_empty(&self) -> bool {
        self.auth.is_empty() && self.acct.is_empty()
    }
}

/// Realm of `user`, or `None` for the default realm.
pub fn realm_of(user: &str) -> Option<&str> {
    user.rsplit_once('@').map(|(_, realm)| realm).filter(|realm| !realm.is_empty())
}

/// Read `path` and select the servers for `user`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or any considered line is
/// malformed. A malformed file selects no servers at all.
pub fn lookup_realm(path: &Path, user: &str) -> Result<RealmServers, RealmError> {
    match realm_of(user) {
        Some(realm) => tracing::info!("Looking up servers for realm '{realm}'"),
        None => tracing::info!("Looking up servers for DEFAULT realm"),
    }

    let contents = fs::read_to_string(path)
        .map_err(|err| RealmError::Read { path: path.to_path_buf(), reason: err.to_string() })?;
    tracing::info!("Reading {}", path.display());

    parse_realms(&contents, path, user)
}

/// Select the servers for `user` from realms file `contents`.
///
/// `path` is only used in error messages.
pub fn parse_realms(contents: &str, path: &Path, user: &str) -> Result<RealmServers, RealmError> {
    let wanted = realm_of(user).unwrap_or(DEFAULT_REALM);
    let mut servers = RealmServers::default();

    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let error = |reason: &str| RealmError::Parse {
            path: PathBuf::from(path),
            line: line_no,
            reason: format!("{reason}: {line}"),
        };

        let mut fields = line.split([' ', '\t']).filter(|field| !field.is_empty());
        let list = match fields.next() {
            Some("authserver") => &mut servers.auth,
            Some("acctserver") => &mut servers.acct,
            _ => return Err(error("invalid line")),
        };
        if list.len() >= SERVER_MAX {
            continue;
        }

        let realm = fields.next().ok_or_else(|| error("realm name missing"))?;
        if realm != wanted {
            tracing::debug!(" - Skipping realm '{realm}'");
            continue;
        }
        tracing::debug!(" - Matched realm {realm}");

        let address = fields.next().ok_or_else(|| error("server address missing"))?;
        let (host, port) = match address.split_once(':') {
            Some((host, port)) if !host.is_empty() => (host, port),
            _ => return Err(error("server port missing")),
        };
        let port = port.parse::<u16>().map_err(|_| error("invalid server port"))?;

        list.push(ServerAddress { host: host.to_string(), port });
    }

    Ok(servers)
}
