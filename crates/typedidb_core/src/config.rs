//! Database configuration.

use typedidb_storage::Durability;

/// How an existing object store is judged against its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreCompatibility {
    /// Keep the store if its key path matches or its auto-increment flag
    /// matches.
    #[default]
    KeyPathOrAutoIncrement,
    /// Keep the store only if both match.
    Exact,
}

impl StoreCompatibility {
    /// Whether a store with the given physical shape may be kept.
    #[must_use]
    pub fn accepts(self, key_path_matches: bool, auto_increment_matches: bool) -> bool {
        match self {
            Self::KeyPathOrAutoIncrement => key_path_matches || auto_increment_matches,
            Self::Exact => key_path_matches && auto_increment_matches,
        }
    }
}

/// Configuration for a [`DatabaseFactory`](crate::DatabaseFactory).
#[derive(Debug, Clone)]
pub struct Config {
    /// Durability for transactions that do not name one.
    pub default_durability: Durability,

    /// Whether a connection closes itself when another connection needs a
    /// version change.
    pub close_on_version_change: bool,

    /// Whether a blocked delete keeps waiting for the connections to close
    /// instead of failing.
    pub wait_on_blocked_delete: bool,

    /// Whether writes check key paths and explicit keys before reaching the
    /// engine.
    pub check_keys_before_write: bool,

    /// Rule for keeping existing object stores during an upgrade.
    pub store_compatibility: StoreCompatibility,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_durability: Durability::Default,
            close_on_version_change: true,
            wait_on_blocked_delete: false,
            check_keys_before_write: true,
            store_compatibility: StoreCompatibility::KeyPathOrAutoIncrement,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default transaction durability.
    #[must_use]
    pub const fn default_durability(mut self, durability: Durability) -> Self {
        self.default_durability = durability;
        self
    }

    /// Sets whether connections close on a version change.
    #[must_use]
    pub const fn close_on_version_change(mut self, value: bool) -> Self {
        self.close_on_version_change = value;
        self
    }

    /// Sets whether a blocked delete waits instead of failing.
    #[must_use]
    pub const fn wait_on_blocked_delete(mut self, value: bool) -> Self {
        self.wait_on_blocked_delete = value;
        self
    }

    /// Sets whether writes check keys before reaching the engine.
    #[must_use]
    pub const fn check_keys_before_write(mut self, value: bool) -> Self {
        self.check_keys_before_write = value;
        self
    }

    /// Sets the store compatibility rule.
    #[must_use]
    pub const fn store_compatibility(mut self, rule: StoreCompatibility) -> Self {
        self.store_compatibility = rule;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.default_durability, Durability::Default);
        assert!(config.close_on_version_change);
        assert!(!config.wait_on_blocked_delete);
        assert!(config.check_keys_before_write);
        assert_eq!(
            config.store_compatibility,
            StoreCompatibility::KeyPathOrAutoIncrement
        );
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .default_durability(Durability::Strict)
            .close_on_version_change(false)
            .wait_on_blocked_delete(true)
            .check_keys_before_write(false)
            .store_compatibility(StoreCompatibility::Exact);

        assert_eq!(config.default_durability, Durability::Strict);
        assert!(!config.close_on_version_change);
        assert!(config.wait_on_blocked_delete);
        assert!(!config.check_keys_before_write);
        assert_eq!(config.store_compatibility, StoreCompatibility::Exact);
    }

    #[test]
    fn compatibility_rules() {
        let loose = StoreCompatibility::KeyPathOrAutoIncrement;
        assert!(loose.accepts(true, false));
        assert!(loose.accepts(false, true));
        assert!(!loose.accepts(false, false));

        let exact = StoreCompatibility::Exact;
        assert!(exact.accepts(true, true));
        assert!(!exact.accepts(true, false));
    }
}
