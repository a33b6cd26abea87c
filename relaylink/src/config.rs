//! Configuration boundary.
//!
//! The persistent store is an external collaborator that only speaks string
//! key/values. Everything is parsed into typed values at this boundary; no
//! internal logic ever touches the delimited strings directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Keys the relay owns inside the shared store.
pub mod keys {
    pub const ROUTES: &str = "relay.routes";
    pub const SUBSTITUTIONS: &str = "relay.substitutions";
}

/// Callback invoked with the new value when a watched key changes.
pub type ChangeCallback = Box<dyn Fn(&str) + Send + Sync>;

/// The persistent key/value store collaborator.
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    /// Writes the value and notifies watchers of that key.
    fn set_string(&self, key: &str, value: &str);
    fn on_change(&self, key: &str, callback: ChangeCallback);
}

/// In-memory store. Used by embedders that keep relay config alongside
/// their own, and by the test suite. Watchers fire synchronously on set.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    watchers: Mutex<HashMap<String, Vec<ChangeCallback>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ConfigStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
        // Callbacks run outside the value lock so they can read other keys.
        let watchers = self.watchers.lock();
        if let Some(cbs) = watchers.get(key) {
            for cb in cbs {
                cb(value);
            }
        }
    }

    fn on_change(&self, key: &str, callback: ChangeCallback) {
        self.watchers.lock().entry(key.to_string()).or_default().push(callback);
    }
}

/// Per-target display toggles.
#[derive(Debug, Clone)]
pub struct DisplayOptions {
    /// Colorize nicks (and the network prefix) with mIRC color codes.
    pub color: bool,
    /// Include the `user@host` segment on join/part/kick/mode lines.
    pub hostmasks: bool,
    /// Prepend `[networkname] ` to every relayed line.
    pub network_prefix: bool,
    /// Prefix relayed nicks with a zero-width marker so relayed mentions
    /// don't ping the named user on the target network.
    pub no_highlight: bool,
    /// Relay presence events (join/part/kick/mode/nick/quit/topic) at all.
    /// When off the formatter yields nothing for those kinds and only
    /// messages cross the link.
    pub relay_presence: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            color: true,
            hostmasks: false,
            network_prefix: true,
            no_highlight: false,
            relay_presence: true,
        }
    }
}

/// Sliding-window flood policy for one category.
#[derive(Debug, Clone, Copy)]
pub struct FloodPolicy {
    /// Events allowed inside `window` before suppression latches.
    pub threshold: usize,
    pub window: Duration,
}

impl FloodPolicy {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold, window }
    }
}

/// Static relay options, fixed at construction. Routes and substitutions
/// live in the [`ConfigStore`] and reload on change; these do not.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Global display defaults.
    pub display: DisplayOptions,
    /// Per-target-channel overrides (keys lowercase).
    pub channel_display: HashMap<String, DisplayOptions>,
    pub privmsg_flood: FloodPolicy,
    pub presence_flood: FloodPolicy,
    /// Upper bound on `addall` endpoints. 8 endpoints already means 56
    /// directional routes; anything bigger is almost always an operator typo.
    pub max_fanout_endpoints: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            display: DisplayOptions::default(),
            channel_display: HashMap::new(),
            privmsg_flood: FloodPolicy::new(60, Duration::from_secs(20)),
            presence_flood: FloodPolicy::new(30, Duration::from_secs(20)),
            max_fanout_endpoints: 8,
        }
    }
}

impl RelayOptions {
    /// Display options for a target channel, falling back to the global
    /// defaults when no per-channel override exists.
    pub fn display_for(&self, channel: &str) -> &DisplayOptions {
        self.channel_display
            .get(&channel.to_lowercase())
            .unwrap_or(&self.display)
    }
}
