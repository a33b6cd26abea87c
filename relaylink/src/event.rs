//! Inbound event model.
//!
//! The connection layer hands the router one [`RelayEvent`] per protocol
//! event. Events are plain data: the router and formatter never reach back
//! into the connection that produced one.

/// Where an event originated, for relay-loop prevention.
///
/// Lines the relay itself enqueued must come back tagged [`Relayed`] if the
/// connection layer echoes its own outbound traffic into the event stream;
/// the router drops those instead of fanning them out a second time.
///
/// [`Relayed`]: EventOrigin::Relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// A remote user on the network produced this event.
    Network,
    /// The bot's own outbound message (e.g. a command reply). Relayed
    /// normally, but never back to the channel it was sent on.
    SelfBot,
    /// Echo of a line this relay already delivered. Never re-relayed.
    Relayed,
}

/// Flood accounting splits traffic into two independently latched windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodCategory {
    /// PRIVMSG and NOTICE traffic.
    Privmsg,
    /// Joins, parts, kicks, modes, nick changes, quits, topic changes.
    Presence,
}

impl FloodCategory {
    /// The other window, for the notice double-count coupling.
    pub fn other(self) -> FloodCategory {
        match self {
            FloodCategory::Privmsg => FloodCategory::Presence,
            FloodCategory::Presence => FloodCategory::Privmsg,
        }
    }
}

/// What happened. Field names follow the protocol's vocabulary; the actor
/// (sender, joiner, kicker, old nick, quitter) lives on [`RelayEvent::nick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Privmsg { text: String, action: bool },
    Notice { text: String },
    Join,
    Part { reason: Option<String> },
    /// `nick` on the event is the kicker; `kicked` is the removed user.
    Kick { kicked: String, reason: Option<String> },
    Mode { modes: String, args: Vec<String> },
    /// `nick` on the event is the old nick.
    Nick { new_nick: String },
    Quit { reason: Option<String> },
    Topic { text: String },
}

impl EventKind {
    pub fn flood_category(&self) -> FloodCategory {
        match self {
            EventKind::Privmsg { .. } | EventKind::Notice { .. } => FloodCategory::Privmsg,
            _ => FloodCategory::Presence,
        }
    }
}

/// One inbound protocol event, normalized by the connection layer.
#[derive(Debug, Clone)]
pub struct RelayEvent {
    /// Name of the network the event arrived on.
    pub network: String,
    /// Channel the event is scoped to. `None` for NICK and QUIT, which are
    /// not channel-scoped on the wire; the router expands those across the
    /// actor's last-known channels.
    pub channel: Option<String>,
    /// The acting nick (sender, joiner, kicker, old nick, quitter).
    pub nick: String,
    /// `user@host` of the actor, when the protocol supplied one.
    pub userhost: Option<String>,
    pub kind: EventKind,
    pub origin: EventOrigin,
}

impl RelayEvent {
    /// Convenience constructor for the common network-originated case.
    pub fn from_network(
        network: impl Into<String>,
        channel: Option<&str>,
        nick: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            network: network.into(),
            channel: channel.map(str::to_string),
            nick: nick.into(),
            userhost: None,
            kind,
            origin: EventOrigin::Network,
        }
    }

    pub fn with_userhost(mut self, userhost: impl Into<String>) -> Self {
        self.userhost = Some(userhost.into());
        self
    }
}
