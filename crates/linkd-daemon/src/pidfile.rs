//! Pid files under the run directory.
//!
//! - `<run_dir>/<ifname>.pid`: our pid
//! - `<run_dir>/ppp-<linkname>.pid`: our pid, then the interface name once
//!   known
//!
//! Both are removed at shutdown. A file that is already gone is not an
//! error.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::error::PidFileError;

/// Tracks the pid files this process created.
#[derive(Debug, Clone)]
pub struct PidFiles {
    run_dir: PathBuf,
    interface: Option<PathBuf>,
    link: Option<PathBuf>,
}

impl PidFiles {
    /// Pid files rooted at `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self { run_dir: run_dir.into(), interface: None, link: None }
    }

    /// Path of the interface pid file, if written.
    pub fn interface_path(&self) -> Option<&Path> {
        self.interface.as_deref()
    }

    /// Path of the link pid file, if written.
    pub fn link_path(&self) -> Option<&Path> {
        self.link.as_deref()
    }

    /// Write `<ifname>.pid`.
    pub fn write_interface(&mut self, ifname: &str, pid: u32) -> Result<(), PidFileError> {
        let path = self.run_dir.join(format!("{ifname}.pid"));
        write_file(&path, &format!("{pid}\n"))?;
        self.interface = Some(path);
        Ok(())
    }

    /// Write `ppp-<linkname>.pid`, including the interface name if known.
    pub fn write_link(&mut self, linkname: &str, pid: u32, ifname: Option<&str>) -> Result<(), PidFileError> {
        let path = self.run_dir.join(format!("ppp-{linkname}.pid"));
        let mut contents = format!("{pid}\n");
        if let Some(ifname) = ifname {
            contents.push_str(ifname);
            contents.push('\n');
        }
        write_file(&path, &contents)?;
        self.link = Some(path);
        Ok(())
    }

    /// Remove every pid file we created.
    pub fn remove_all(&mut self) {
        for path in [self.interface.take(), self.link.take()].into_iter().flatten() {
            match fs::remove_file(&path) {
                Ok(()) => {},
                Err(err) if err.kind() == ErrorKind::NotFound => {},
                Err(err) => tracing::warn!("unable to delete pid file {}: {err}", path.display()),
            }
        }
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), PidFileError> {
    fs::write(path, contents).map_err(|source| PidFileError::Write { path: path.to_path_buf(), source })
}
