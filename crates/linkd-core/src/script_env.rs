//! Environment handed to child scripts.
//!
//! Child processes never inherit the daemon's own environment. They get
//! exactly the variables exported here, in insertion order. Variables marked
//! as keys are additionally indexed in the status store so external tools
//! can find a running daemon by, say, its interface name.

/// One exported variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    name: String,
    value: String,
    is_key: bool,
}

impl EnvEntry {
    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variable value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the status store indexes this variable.
    pub fn is_key(&self) -> bool {
        self.is_key
    }

    /// `NAME=value` form.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// What [`ScriptEnv::set`] changed, for mirroring into the status store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvUpdate {
    /// `NAME=value` of a replaced key entry whose index must be dropped
    pub stale_key: Option<String>,
    /// `NAME=value` of the new entry if it is a key
    pub new_key: Option<String>,
}

/// Ordered set of exported variables.
#[derive(Debug, Clone, Default)]
pub struct ScriptEnv {
    entries: Vec<EnvEntry>,
}

impl ScriptEnv {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `name=value`, replacing an existing entry in place.
    pub fn set(&mut self, name: &str, value: &str, is_key: bool) -> EnvUpdate {
        let entry = EnvEntry { name: name.to_string(), value: value.to_string(), is_key };
        let new_key = is_key.then(|| entry.pair());

        match self.entries.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => {
                let stale_key = existing.is_key.then(|| existing.pair());
                *existing = entry;
                EnvUpdate { stale_key, new_key }
            },
            None => {
                self.entries.push(entry);
                EnvUpdate { stale_key: None, new_key }
            },
        }
    }

    /// Remove `name`, returning the removed entry.
    pub fn unset(&mut self, name: &str) -> Option<EnvEntry> {
        let index = self.entries.iter().position(|entry| entry.name == name)?;
        Some(self.entries.remove(index))
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|entry| entry.name == name).map(|entry| entry.value.as_str())
    }

    /// Exported entries in insertion order.
    pub fn entries(&self) -> &[EnvEntry] {
        &self.entries
    }

    /// `(name, value)` pairs for spawning a child.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|entry| (entry.name.as_str(), entry.value.as_str()))
    }

    /// `NAME=value` of every key entry.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().filter(|entry| entry.is_key).map(EnvEntry::pair)
    }

    /// Status record: every entry as `NAME=value;`, concatenated.
    pub fn record(&self) -> String {
        self.entries.iter().map(|entry| format!("{};", entry.pair())).collect()
    }

    /// Number of exported variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_appends_then_replaces_in_place() {
        let mut env = ScriptEnv::new();
        env.set("A", "1", false);
        env.set("B", "2", false);
        env.set("A", "3", false);

        assert_eq!(env.record(), "A=3;B=2;");
        assert_eq!(env.get("A"), Some("3"));
    }

    #[test]
    fn replacing_key_reports_stale_and_new_pairs() {
        let mut env = ScriptEnv::new();
        let first = env.set("IFNAME", "ppp0", true);
        assert_eq!(first, EnvUpdate { stale_key: None, new_key: Some("IFNAME=ppp0".into()) });

        let second = env.set("IFNAME", "ppp1", true);
        assert_eq!(second.stale_key.as_deref(), Some("IFNAME=ppp0"));
        assert_eq!(second.new_key.as_deref(), Some("IFNAME=ppp1"));
    }

    #[test]
    fn unset_removes_entry() {
        let mut env = ScriptEnv::new();
        env.set("A", "1", false);
        env.set("B", "2", true);

        let removed = env.unset("B").unwrap();
        assert!(removed.is_key());
        assert!(env.unset("B").is_none());
        assert_eq!(env.record(), "A=1;");
    }

    #[test]
    fn keys_lists_only_key_entries() {
        let mut env = ScriptEnv::new();
        env.set("IFNAME", "ppp0", true);
        env.set("DEVICE", "/dev/ttyS0", false);

        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["IFNAME=ppp0".to_string()]);
    }
}
