//! Multi-network message relay with flood control.
//!
//! Bridges messages and presence events (joins, parts, kicks, modes, nick
//! changes, quits, topics) between independently-connected chat networks
//! according to a configurable routing table, while guarding against
//! feedback loops, event floods, and partially-initialized connections.
//!
//! The embedding bot framework supplies two collaborators:
//!
//! - a [`ConnectionHandle`] per network (inbound events, membership state,
//!   a non-blocking outbound queue), and
//! - a [`ConfigStore`] for the persisted routing table and nick
//!   substitutions.
//!
//! One [`RelayRouter`] per process is shared by every network's event
//! handler:
//!
//! ```
//! use std::sync::Arc;
//! use relaylink::{MemoryStore, RelayOptions, RelayRouter, Endpoint};
//!
//! let router = RelayRouter::new(MemoryStore::new(), RelayOptions::default());
//! router.add_route(
//!     Endpoint::new("#dev", "libera"),
//!     Endpoint::new("#dev", "oftc"),
//!     None,
//!     true,
//! ).unwrap();
//! // connection layer: router.attach(handle) per network, then
//! // router.on_event(event) for every inbound event.
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod flood;
pub mod format;
pub mod registry;
pub mod router;
pub mod routes;

pub use config::{ConfigStore, DisplayOptions, FloodPolicy, MemoryStore, RelayOptions};
pub use error::CommandError;
pub use event::{EventKind, EventOrigin, FloodCategory, RelayEvent};
pub use flood::{FloodGuard, FloodVerdict};
pub use registry::{
    ChannelRoster, ConnectionHandle, Member, MemberRoles, NetworkRegistry, NetworkSnapshot,
    SendKind,
};
pub use router::{AddReport, BatchReport, CommandContext, RelayRouter, RemoveReport, handle_command};
pub use routes::{
    AddOutcome, ContentFilter, Endpoint, RemoveOutcome, Route, RoutingTable, SubstitutionRule,
};
