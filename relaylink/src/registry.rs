//! Connection handles and per-network membership bookkeeping.
//!
//! The registry caches a membership snapshot per network, refreshed
//! opportunistically as events arrive. The snapshot is a display/formatting
//! cache, not a delivery gate: deliverability of a route is always checked
//! against the live handle at send time, because the snapshot may lag the
//! connection's real state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Delivery kind handed to the connection layer's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Privmsg,
    Notice,
}

/// Role flags for one channel member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberRoles {
    pub op: bool,
    pub halfop: bool,
    pub voice: bool,
}

/// One member as the connection layer currently sees them.
#[derive(Debug, Clone, Default)]
pub struct Member {
    /// `user@host`, when the protocol has revealed it.
    pub userhost: Option<String>,
    pub roles: MemberRoles,
}

/// Membership of a single channel: nick → member info.
#[derive(Debug, Clone, Default)]
pub struct ChannelRoster {
    pub members: HashMap<String, Member>,
}

impl ChannelRoster {
    pub fn contains(&self, nick: &str) -> bool {
        self.member(nick).is_some()
    }

    /// Case-insensitive member lookup.
    pub fn member(&self, nick: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(nick))
            .map(|(_, m)| m)
    }
}

/// Capability interface the connection-layer collaborator implements, one
/// per network. The relay only ever talks to connections through this.
pub trait ConnectionHandle: Send + Sync {
    fn network(&self) -> &str;
    fn is_ready(&self) -> bool;
    /// A zombied handle still exists but is known to be non-functional.
    fn is_zombied(&self) -> bool;
    /// Live channel membership, keyed by channel name.
    fn current_channels(&self) -> HashMap<String, ChannelRoster>;
    /// Non-blocking enqueue onto the connection's own outbound path.
    fn enqueue_send(&self, channel: &str, text: &str, kind: SendKind);
}

/// Point-in-time membership view of one network.
#[derive(Debug, Clone, Default)]
pub struct NetworkSnapshot {
    pub channels: HashMap<String, ChannelRoster>,
}

impl NetworkSnapshot {
    /// Every channel the nick is currently (or was last) seen in. This is
    /// the fan-out set for NICK and QUIT, which are not channel-scoped.
    pub fn channels_with(&self, nick: &str) -> Vec<String> {
        let mut channels: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, roster)| roster.contains(nick))
            .map(|(name, _)| name.clone())
            .collect();
        channels.sort();
        channels
    }

    /// Resolve a nick's `user@host` anywhere on the network.
    pub fn userhost_of(&self, nick: &str) -> Option<String> {
        self.channels
            .values()
            .find_map(|roster| roster.member(nick).and_then(|m| m.userhost.clone()))
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(channel))
            .map(|(_, roster)| roster.members.len())
            .unwrap_or(0)
    }
}

struct NetworkEntry {
    handle: Arc<dyn ConnectionHandle>,
    snapshot: NetworkSnapshot,
}

/// Tracks which networks have been scraped (a live handle observed at
/// least once) and their cached membership snapshots.
///
/// A network's own event path is the only writer for its entry; any
/// network's fan-out may read it, so entries live behind a `RwLock`.
#[derive(Default)]
pub struct NetworkRegistry {
    networks: RwLock<HashMap<String, NetworkEntry>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a live handle for its network and takes a fresh snapshot.
    /// Networks move `unknown` → scraped here and never back; a dead
    /// handle is detected at send time, not unregistered.
    pub fn observe(&self, handle: Arc<dyn ConnectionHandle>) {
        let network = handle.network().to_lowercase();
        let snapshot = NetworkSnapshot { channels: handle.current_channels() };
        let mut networks = self.networks.write();
        if networks.insert(network.clone(), NetworkEntry { handle, snapshot }).is_none() {
            debug!(%network, "scraped new network connection");
        }
    }

    /// Re-pulls the membership snapshot from the network's handle, if the
    /// network has been scraped.
    pub fn refresh(&self, network: &str) {
        let key = network.to_lowercase();
        let handle = {
            let networks = self.networks.read();
            networks.get(&key).map(|e| e.handle.clone())
        };
        // The pull happens outside the lock; current_channels() belongs to
        // the connection layer and must not run under our write lock.
        if let Some(handle) = handle {
            let snapshot = NetworkSnapshot { channels: handle.current_channels() };
            if let Some(entry) = self.networks.write().get_mut(&key) {
                entry.snapshot = snapshot;
            }
        }
    }

    pub fn is_scraped(&self, network: &str) -> bool {
        self.networks.read().contains_key(&network.to_lowercase())
    }

    pub fn handle(&self, network: &str) -> Option<Arc<dyn ConnectionHandle>> {
        self.networks
            .read()
            .get(&network.to_lowercase())
            .map(|e| e.handle.clone())
    }

    pub fn snapshot(&self, network: &str) -> Option<NetworkSnapshot> {
        self.networks
            .read()
            .get(&network.to_lowercase())
            .map(|e| e.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(members: &[(&str, Option<&str>)]) -> ChannelRoster {
        ChannelRoster {
            members: members
                .iter()
                .map(|(nick, uh)| {
                    (
                        nick.to_string(),
                        Member { userhost: uh.map(str::to_string), roles: MemberRoles::default() },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn channels_with_finds_every_channel_case_insensitively() {
        let snapshot = NetworkSnapshot {
            channels: HashMap::from([
                ("#x".to_string(), roster(&[("Alice", None), ("Bob", None)])),
                ("#y".to_string(), roster(&[("alice", None)])),
                ("#z".to_string(), roster(&[("Carol", None)])),
            ]),
        };
        assert_eq!(snapshot.channels_with("ALICE"), vec!["#x", "#y"]);
        assert!(snapshot.channels_with("nobody").is_empty());
    }

    #[test]
    fn userhost_resolves_from_any_channel() {
        let snapshot = NetworkSnapshot {
            channels: HashMap::from([
                ("#x".to_string(), roster(&[("Bob", None)])),
                ("#y".to_string(), roster(&[("Bob", Some("b@host"))])),
            ]),
        };
        assert_eq!(snapshot.userhost_of("bob").as_deref(), Some("b@host"));
        assert_eq!(snapshot.userhost_of("eve"), None);
    }
}
