//! The relay orchestrator.
//!
//! One `RelayRouter` per process owns the routing table, the flood guard,
//! and the network registry; every network's event handler shares it by
//! `Arc`. Table reloads swap an `Arc` so readers never observe a
//! half-rebuilt table, and nothing here blocks on network I/O — a send is
//! a non-blocking enqueue onto the target connection's own outbound path.

mod commands;

pub use commands::{CommandContext, handle_command};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{ConfigStore, RelayOptions, keys};
use crate::error::CommandError;
use crate::event::{EventKind, EventOrigin, RelayEvent};
use crate::flood::{FloodGuard, FloodVerdict};
use crate::format::{FormatContext, format_event};
use crate::registry::{ConnectionHandle, NetworkRegistry, NetworkSnapshot, SendKind};
use crate::routes::{
    AddOutcome, ContentFilter, Endpoint, RemoveOutcome, Route, RoutingTable,
};

/// Result of an add, with the mirrored direction when `reciprocal` was
/// requested. Partial success (one direction added, one already present)
/// is visible to the operator, not collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddReport {
    pub forward: AddOutcome,
    pub mirrored: Option<AddOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveReport {
    pub forward: RemoveOutcome,
    pub mirrored: Option<RemoveOutcome>,
}

/// Counts for a batch add/remove; a single collision never fails the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub failures: usize,
    pub total: usize,
}

pub struct RelayRouter {
    store: Arc<dyn ConfigStore>,
    options: RelayOptions,
    table: RwLock<Arc<RoutingTable>>,
    /// Serializes operator mutations: without it, two concurrent
    /// clone-modify-commit sequences would start from the same snapshot
    /// and the later commit would overwrite the earlier one's changes.
    edit: Mutex<()>,
    flood: FloodGuard,
    registry: NetworkRegistry,
}

impl RelayRouter {
    /// Loads the table from the store and wires reload callbacks so that
    /// external edits to the persisted strings take effect immediately.
    pub fn new(store: Arc<dyn ConfigStore>, options: RelayOptions) -> Arc<Self> {
        let table = Self::load(store.as_ref());
        let flood = FloodGuard::new(options.privmsg_flood, options.presence_flood);
        let router = Arc::new(Self {
            store: store.clone(),
            options,
            table: RwLock::new(Arc::new(table)),
            edit: Mutex::new(()),
            flood,
            registry: NetworkRegistry::new(),
        });
        for key in [keys::ROUTES, keys::SUBSTITUTIONS] {
            let weak = Arc::downgrade(&router);
            store.on_change(
                key,
                Box::new(move |_| {
                    if let Some(router) = weak.upgrade() {
                        router.reload();
                    }
                }),
            );
        }
        router
    }

    fn load(store: &dyn ConfigStore) -> RoutingTable {
        RoutingTable::parse(
            &store.get_string(keys::ROUTES).unwrap_or_default(),
            &store.get_string(keys::SUBSTITUTIONS).unwrap_or_default(),
        )
    }

    /// Discards the current table and reparses the persisted strings.
    pub fn reload(&self) {
        let table = Self::load(self.store.as_ref());
        debug!(routes = table.routes().len(), "reloaded routing table");
        *self.table.write() = Arc::new(table);
    }

    /// Current table snapshot. Holders keep a consistent view across a
    /// concurrent reload.
    pub fn table(&self) -> Arc<RoutingTable> {
        self.table.read().clone()
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Flood-window introspection, mainly for diagnostics.
    pub fn flood(&self) -> &FloodGuard {
        &self.flood
    }

    /// Registers a live connection handle. Called by the connection layer
    /// when a network comes up; also happens implicitly the first time an
    /// event arrives through a handle-supplying integration.
    pub fn attach(&self, handle: Arc<dyn ConnectionHandle>) {
        self.registry.observe(handle);
    }

    // ── Event processing ────────────────────────────────────────────

    /// Entry point for every inbound event from every network.
    ///
    /// Never panics and never returns an error: per-route failures are
    /// logged and skipped so one broken target cannot abort delivery to
    /// the rest.
    pub fn on_event(&self, event: &RelayEvent) {
        if event.origin == EventOrigin::Relayed {
            debug!(network = %event.network, "ignoring echo of a relayed line");
            return;
        }

        // NICK and QUIT fan out over the actor's last-known channels, so
        // the pre-event snapshot is taken before the refresh below.
        let prior = self.registry.snapshot(&event.network);
        self.registry.refresh(&event.network);

        let category = event.kind.flood_category();
        let flood_notice = match self.flood.record_and_check(category) {
            FloodVerdict::Ok => None,
            FloodVerdict::Suppressed { notice: Some(notice) } => {
                // The notice replaces the payload but still fans out like
                // the event it suppressed, and counts toward the other
                // category's window. Documented current behavior.
                self.flood.record_at(category.other(), Instant::now());
                info!(?category, "flood detected, suppressing relay output");
                Some(notice)
            }
            FloodVerdict::Suppressed { notice: None } => {
                debug!(?category, "flood still active, dropping event");
                return;
            }
        };

        let channels: Vec<String> = match &event.kind {
            EventKind::Nick { .. } | EventKind::Quit { .. } => prior
                .as_ref()
                .map(|s| s.channels_with(&event.nick))
                .unwrap_or_default(),
            _ => event.channel.iter().cloned().collect(),
        };
        if channels.is_empty() {
            debug!(network = %event.network, nick = %event.nick, "no channels to relay from");
            return;
        }

        let table = self.table();
        for channel in &channels {
            for route in table.matching_routes(channel, &event.network) {
                self.deliver(event, channel, route, &table, flood_notice.as_deref(), prior.as_ref());
            }
        }
    }

    /// Delivers one event along one route. Every failure here is a soft
    /// skip: missing handle, zombied handle, unjoined channel, disabled
    /// formatting, filtered content.
    fn deliver(
        &self,
        event: &RelayEvent,
        channel: &str,
        route: &Route,
        table: &RoutingTable,
        flood_notice: Option<&str>,
        source_members: Option<&NetworkSnapshot>,
    ) {
        // Never bounce an event back onto the channel it came from.
        let source = Endpoint::new(channel, event.network.clone());
        if route.target.same_as(&source) {
            return;
        }

        let Some(handle) = self.registry.handle(&route.target.network) else {
            info!(target = %route.target, "target network not yet scraped, skipping route");
            return;
        };
        if handle.is_zombied() || !handle.is_ready() {
            info!(target = %route.target, "target connection not usable, skipping route");
            return;
        }
        // A named channel must currently be joined on the live connection;
        // anything else is a private-message target and goes through as-is.
        if is_channel(&route.target.channel) {
            let joined = handle
                .current_channels()
                .keys()
                .any(|c| c.eq_ignore_ascii_case(&route.target.channel));
            if !joined {
                info!(target = %route.target, "not in target channel, skipping route");
                return;
            }
        }

        let display = self.options.display_for(&route.target.channel);
        let (text, kind) = match flood_notice {
            Some(notice) => (notice.to_string(), SendKind::Notice),
            None => {
                let ctx = FormatContext {
                    display,
                    substitutions: table.substitutions(),
                    source_members,
                };
                let Some(text) = format_event(event, channel, &ctx) else {
                    return;
                };
                let kind = match event.kind {
                    EventKind::Notice { .. } => SendKind::Notice,
                    _ => SendKind::Privmsg,
                };
                (text, kind)
            }
        };

        if let Some(ref filter) = route.filter
            && !filter.is_match(&text)
        {
            return;
        }

        handle.enqueue_send(&route.target.channel, &text, kind);
    }

    // ── Table mutations (operator surface) ──────────────────────────

    pub fn add_route(
        &self,
        from: Endpoint,
        to: Endpoint,
        pattern: Option<&str>,
        reciprocal: bool,
    ) -> Result<AddReport, CommandError> {
        let filter = compile_filter(pattern)?;
        Ok(self.mutate(|next| {
            let forward =
                next.insert_route(Route::new(from.clone(), to.clone(), filter.clone()));
            let mirrored = reciprocal.then(|| next.insert_route(Route::new(to, from, filter)));
            AddReport { forward, mirrored }
        }))
    }

    pub fn remove_route(
        &self,
        from: Endpoint,
        to: Endpoint,
        pattern: Option<&str>,
        reciprocal: bool,
    ) -> Result<RemoveReport, CommandError> {
        let filter = compile_filter(pattern)?;
        Ok(self.mutate(|next| {
            let forward =
                next.delete_route(&Route::new(from.clone(), to.clone(), filter.clone()));
            let mirrored = reciprocal.then(|| next.delete_route(&Route::new(to, from, filter)));
            RemoveReport { forward, mirrored }
        }))
    }

    /// Adds every ordered pair among the endpoints — permutations, since
    /// direction matters. Collisions count as failures, not errors.
    pub fn add_all_pairs(
        &self,
        endpoints: &[Endpoint],
        pattern: Option<&str>,
    ) -> Result<BatchReport, CommandError> {
        self.check_fanout(endpoints)?;
        let filter = compile_filter(pattern)?;
        Ok(self.mutate(|next| {
            let mut failures = 0;
            let mut total = 0;
            for (i, from) in endpoints.iter().enumerate() {
                for (j, to) in endpoints.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    total += 1;
                    let route = Route::new(from.clone(), to.clone(), filter.clone());
                    if next.insert_route(route) == AddOutcome::AlreadyExists {
                        failures += 1;
                    }
                }
            }
            BatchReport { failures, total }
        }))
    }

    /// With one endpoint, removes every route touching it in either
    /// direction; with two or more, removes every ordered pair.
    pub fn remove_all_pairs(
        &self,
        endpoints: &[Endpoint],
        pattern: Option<&str>,
    ) -> Result<BatchReport, CommandError> {
        if endpoints.is_empty() {
            return Err(CommandError::TooFewEndpoints);
        }
        let filter = compile_filter(pattern)?;
        Ok(self.mutate(|next| {
            if let [endpoint] = endpoints {
                let removed = next.delete_touching(endpoint);
                BatchReport { failures: 0, total: removed }
            } else {
                let mut failures = 0;
                let mut total = 0;
                for (i, from) in endpoints.iter().enumerate() {
                    for (j, to) in endpoints.iter().enumerate() {
                        if i == j {
                            continue;
                        }
                        total += 1;
                        let route = Route::new(from.clone(), to.clone(), filter.clone());
                        if next.delete_route(&route) == RemoveOutcome::NotFound {
                            failures += 1;
                        }
                    }
                }
                BatchReport { failures, total }
            }
        }))
    }

    pub fn set_substitution(&self, pattern: &str, replacement: &str) {
        self.mutate(|next| next.set_substitution(pattern, replacement));
    }

    pub fn clear_substitution(&self, pattern: &str) -> RemoveOutcome {
        self.mutate(|next| next.remove_substitution(pattern))
    }

    fn check_fanout(&self, endpoints: &[Endpoint]) -> Result<(), CommandError> {
        if endpoints.len() < 2 {
            return Err(CommandError::TooFewEndpoints);
        }
        let limit = self.options.max_fanout_endpoints;
        if endpoints.len() > limit {
            return Err(CommandError::TooManyEndpoints { given: endpoints.len(), limit });
        }
        Ok(())
    }

    /// Runs one clone-modify-commit sequence under the edit lock. Readers
    /// stay on lock-free snapshots; mutations queue here so a commit can
    /// never overwrite another mutation's freshly-committed table.
    fn mutate<T>(&self, apply: impl FnOnce(&mut RoutingTable) -> T) -> T {
        let _guard = self.edit.lock();
        let mut next = (*self.table()).clone();
        let out = apply(&mut next);
        self.commit(next);
        out
    }

    /// Swaps in the mutated table, then writes it back to the store. The
    /// store's change callback re-parses to the same table, so external
    /// and internal edits share one authoritative path.
    fn commit(&self, next: RoutingTable) {
        let routes = next.serialize_routes();
        let substitutions = next.serialize_substitutions();
        *self.table.write() = Arc::new(next);
        if self.store.get_string(keys::ROUTES).as_deref() != Some(routes.as_str()) {
            self.store.set_string(keys::ROUTES, &routes);
        }
        if self.store.get_string(keys::SUBSTITUTIONS).as_deref()
            != Some(substitutions.as_str())
        {
            self.store.set_string(keys::SUBSTITUTIONS, &substitutions);
        }
    }
}

fn compile_filter(pattern: Option<&str>) -> Result<Option<ContentFilter>, CommandError> {
    pattern
        .filter(|p| !p.is_empty())
        .map(ContentFilter::compile)
        .transpose()
}

fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}
