//! Interface name and index resolution.
//!
//! The network pre-up script may rename the interface. The session records
//! the kernel index before running it and maps the index back to a name
//! afterwards.

use std::{fs, path::PathBuf};

/// Maps interface names to kernel indices and back.
pub trait InterfaceResolver {
    /// Kernel index of `name`.
    fn index_of(&self, name: &str) -> Option<u32>;

    /// Current name of the interface with `index`.
    fn name_of(&self, index: u32) -> Option<String>;
}

/// Resolver backed by `/sys/class/net`.
#[derive(Debug, Clone)]
pub struct SysfsResolver {
    root: PathBuf,
}

impl SysfsResolver {
    /// Resolve against `/sys/class/net`.
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    /// Resolve against a different directory laid out like
    /// `/sys/class/net`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_index(&self, name: &str) -> Option<u32> {
        let text = fs::read_to_string(self.root.join(name).join("ifindex")).ok()?;
        text.trim().parse().ok()
    }
}

impl Default for SysfsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceResolver for SysfsResolver {
    fn index_of(&self, name: &str) -> Option<u32> {
        if name.is_empty() || name.contains('/') {
            return None;
        }
        self.read_index(name)
    }

    fn name_of(&self, index: u32) -> Option<String> {
        fs::read_dir(&self.root)
            .ok()?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .find(|name| self.read_index(name) == Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(interfaces: &[(&str, u32)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, index) in interfaces {
            let path = dir.path().join(name);
            fs::create_dir(&path).unwrap();
            fs::write(path.join("ifindex"), format!("{index}\n")).unwrap();
        }
        dir
    }

    #[test]
    fn resolves_both_directions() {
        let dir = fake_sysfs(&[("lo", 1), ("ppp0", 7)]);
        let resolver = SysfsResolver::with_root(dir.path());

        assert_eq!(resolver.index_of("ppp0"), Some(7));
        assert_eq!(resolver.name_of(7).as_deref(), Some("ppp0"));
    }

    #[test]
    fn unknown_name_and_index_resolve_to_none() {
        let dir = fake_sysfs(&[("lo", 1)]);
        let resolver = SysfsResolver::with_root(dir.path());

        assert_eq!(resolver.index_of("ppp9"), None);
        assert_eq!(resolver.index_of("../lo"), None);
        assert_eq!(resolver.name_of(42), None);
    }

    #[test]
    fn rename_is_visible_through_index() {
        let dir = fake_sysfs(&[("ppp0", 7)]);
        let resolver = SysfsResolver::with_root(dir.path());
        let index = resolver.index_of("ppp0").unwrap();

        fs::rename(dir.path().join("ppp0"), dir.path().join("wan0")).unwrap();

        assert_eq!(resolver.name_of(index).as_deref(), Some("wan0"));
    }
}
