//! Routing table: relay links and nick substitutions.
//!
//! Persisted form is the store's flat string format — `|`-delimited fields,
//! entries joined by ` || ` — parsed into typed values here and nowhere
//! else. The table is rebuilt wholesale whenever the backing string
//! changes; in-memory routes are never mutated in place, only replaced.

use std::fmt;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::error::CommandError;

/// `channel@network`. Channel may be a nick for private-message targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub channel: String,
    pub network: String,
}

impl Endpoint {
    pub fn new(channel: impl Into<String>, network: impl Into<String>) -> Self {
        Self { channel: channel.into(), network: network.into() }
    }

    /// Parses `channel@network`. The last `@` splits, so channels
    /// containing `@` still parse as long as the network name doesn't.
    pub fn parse(s: &str) -> Result<Self, CommandError> {
        let (channel, network) = s
            .rsplit_once('@')
            .ok_or_else(|| CommandError::BadEndpoint(s.to_string()))?;
        if channel.is_empty() || network.is_empty() {
            return Err(CommandError::BadEndpoint(s.to_string()));
        }
        Ok(Self::new(channel, network))
    }

    /// Case-insensitive equality, matching the protocol's channel rules.
    pub fn same_as(&self, other: &Endpoint) -> bool {
        self.channel.eq_ignore_ascii_case(&other.channel)
            && self.network.eq_ignore_ascii_case(&other.network)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.channel, self.network)
    }
}

/// Optional filter on the formatted text. Keeps the source pattern for
/// serialization and duplicate detection.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pattern: String,
    regex: Regex,
}

impl ContentFilter {
    pub fn compile(pattern: &str) -> Result<Self, CommandError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| CommandError::BadPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { pattern: pattern.to_string(), regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// One directional relay link.
#[derive(Debug, Clone)]
pub struct Route {
    pub source: Endpoint,
    pub target: Endpoint,
    pub filter: Option<ContentFilter>,
}

impl Route {
    pub fn new(source: Endpoint, target: Endpoint, filter: Option<ContentFilter>) -> Self {
        Self { source, target, filter }
    }

    /// The `(from, to, pattern)` identity used for duplicate detection.
    fn same_link(&self, other: &Route) -> bool {
        self.source.same_as(&other.source)
            && self.target.same_as(&other.target)
            && self.filter.as_ref().map(ContentFilter::pattern)
                == other.filter.as_ref().map(ContentFilter::pattern)
    }

    /// Whether this route's source patterns match an event source. The
    /// configured channel/network act as `*`/`?` wildcards.
    pub fn matches_source(&self, channel: &str, network: &str) -> bool {
        wildcard_match(&self.source.channel, channel)
            && wildcard_match(&self.source.network, network)
    }

    /// Whether the route touches the endpoint as source or target.
    pub fn touches(&self, endpoint: &Endpoint) -> bool {
        self.source.same_as(endpoint) || self.target.same_as(endpoint)
    }

    pub fn mirrored(&self) -> Route {
        Route::new(self.target.clone(), self.source.clone(), self.filter.clone())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)?;
        if let Some(ref filter) = self.filter {
            write!(f, " (filter: {})", filter.pattern())?;
        }
        Ok(())
    }
}

/// Nick relabeling rule. Pattern uses the same wildcard language as route
/// endpoints; later rules win on a duplicate pattern (collapsed at parse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Applies the first rule whose pattern matches the nick. Rules are
/// ordered; duplicates were already collapsed last-write-wins at parse.
pub fn substitute_nick<'a>(rules: &'a [SubstitutionRule], nick: &'a str) -> &'a str {
    for rule in rules {
        if wildcard_match(&rule.pattern, nick) {
            return &rule.replacement;
        }
    }
    nick
}

/// Case-insensitive `*`/`?` glob over the full string.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();
    wildcard_match_inner(pattern.as_bytes(), text.as_bytes())
}

fn wildcard_match_inner(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            // * matches zero or more characters
            wildcard_match_inner(&pattern[1..], text)
                || (!text.is_empty() && wildcard_match_inner(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => wildcard_match_inner(&pattern[1..], &text[1..]),
        (Some(a), Some(b)) if a == b => wildcard_match_inner(&pattern[1..], &text[1..]),
        _ => false,
    }
}

const ENTRY_SEP: &str = " || ";
const FIELD_SEP: &str = " | ";

/// The full set of configured routes and substitution rules.
///
/// Cheap to clone; mutations happen on a clone which is then serialized
/// back to the store, and the store's change callback swaps the new table
/// in for every reader at once.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
    substitutions: Vec<SubstitutionRule>,
}

impl RoutingTable {
    /// Builds a table from the persisted strings. Malformed entries are
    /// skipped with a warning; one bad entry must not disable the relay.
    pub fn parse(routes: &str, substitutions: &str) -> Self {
        let mut table = RoutingTable::default();
        for entry in routes.split(ENTRY_SEP) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match Self::parse_route_entry(entry) {
                Ok(route) => {
                    if !table.routes.iter().any(|r| r.same_link(&route)) {
                        table.routes.push(route);
                    }
                }
                Err(reason) => {
                    warn!(entry, %reason, "skipping malformed route entry");
                }
            }
        }
        for entry in substitutions.split(ENTRY_SEP) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((pattern, replacement)) = entry.split_once(FIELD_SEP) else {
                warn!(entry, "skipping malformed substitution entry");
                continue;
            };
            table.set_substitution(pattern.trim(), replacement.trim());
        }
        table
    }

    /// `source_chan | source_net | target_chan | target_net | pattern`.
    /// The pattern field may itself contain the field separator, so the
    /// split is limited to five pieces.
    fn parse_route_entry(entry: &str) -> Result<Route, CommandError> {
        let fields: Vec<&str> = entry.splitn(5, FIELD_SEP).map(str::trim).collect();
        if fields.len() < 4 {
            return Err(CommandError::BadEndpoint(entry.to_string()));
        }
        let filter = match fields.get(4) {
            Some(p) if !p.is_empty() => Some(ContentFilter::compile(p)?),
            _ => None,
        };
        Ok(Route::new(
            Endpoint::new(fields[0], fields[1]),
            Endpoint::new(fields[2], fields[3]),
            filter,
        ))
    }

    pub fn serialize_routes(&self) -> String {
        self.routes
            .iter()
            .map(|r| {
                let mut entry = format!(
                    "{}{FIELD_SEP}{}{FIELD_SEP}{}{FIELD_SEP}{}",
                    r.source.channel, r.source.network, r.target.channel, r.target.network,
                );
                // The pattern field is only written when present; a trailing
                // empty field would reparse as a pattern of "".
                if let Some(ref filter) = r.filter {
                    entry.push_str(FIELD_SEP);
                    entry.push_str(filter.pattern());
                }
                entry
            })
            .collect::<Vec<_>>()
            .join(ENTRY_SEP)
    }

    pub fn serialize_substitutions(&self) -> String {
        self.substitutions
            .iter()
            .map(|s| format!("{}{FIELD_SEP}{}", s.pattern, s.replacement))
            .collect::<Vec<_>>()
            .join(ENTRY_SEP)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn substitutions(&self) -> &[SubstitutionRule] {
        &self.substitutions
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Every route whose source patterns match the given channel+network,
    /// in insertion order.
    pub fn matching_routes(&self, channel: &str, network: &str) -> Vec<&Route> {
        self.routes
            .iter()
            .filter(|r| r.matches_source(channel, network))
            .collect()
    }

    /// Idempotent-safe insert: an identical `(from, to, pattern)` triple
    /// reports `AlreadyExists` instead of erroring.
    pub fn insert_route(&mut self, route: Route) -> AddOutcome {
        if self.routes.iter().any(|r| r.same_link(&route)) {
            return AddOutcome::AlreadyExists;
        }
        self.routes.push(route);
        AddOutcome::Added
    }

    pub fn delete_route(&mut self, route: &Route) -> RemoveOutcome {
        let before = self.routes.len();
        self.routes.retain(|r| !r.same_link(route));
        if self.routes.len() < before {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotFound
        }
    }

    /// Removes every route touching the endpoint in either direction.
    /// Returns how many were dropped.
    pub fn delete_touching(&mut self, endpoint: &Endpoint) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| !r.touches(endpoint));
        before - self.routes.len()
    }

    /// Last-write-wins on a duplicate pattern, preserving rule order for
    /// the patterns that remain.
    pub fn set_substitution(&mut self, pattern: &str, replacement: &str) {
        if let Some(rule) = self
            .substitutions
            .iter_mut()
            .find(|r| r.pattern.eq_ignore_ascii_case(pattern))
        {
            rule.replacement = replacement.to_string();
        } else {
            self.substitutions.push(SubstitutionRule {
                pattern: pattern.to_string(),
                replacement: replacement.to_string(),
            });
        }
    }

    pub fn remove_substitution(&mut self, pattern: &str) -> RemoveOutcome {
        let before = self.substitutions.len();
        self.substitutions
            .retain(|r| !r.pattern.eq_ignore_ascii_case(pattern));
        if self.substitutions.len() < before {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotFound
        }
    }

    /// Applies the first matching substitution rule to a nick.
    pub fn substitute_nick<'a>(&'a self, nick: &'a str) -> &'a str {
        substitute_nick(&self.substitutions, nick)
    }

    /// Endpoints transitively linked to `start` through routes in either
    /// direction, including `start` itself. Used by the `nicks` command to
    /// aggregate membership across one conceptual relay.
    pub fn linked_endpoints(&self, start: &Endpoint) -> Vec<Endpoint> {
        let mut linked: Vec<Endpoint> = vec![start.clone()];
        let mut changed = true;
        while changed {
            changed = false;
            for route in &self.routes {
                let hits_source = linked.iter().any(|e| route.source.same_as(e));
                let hits_target = linked.iter().any(|e| route.target.same_as(e));
                if hits_source && !hits_target {
                    linked.push(route.target.clone());
                    changed = true;
                } else if hits_target && !hits_source {
                    linked.push(route.source.clone());
                    changed = true;
                }
            }
        }
        linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> Endpoint {
        Endpoint::parse(s).unwrap()
    }

    #[test]
    fn endpoint_parse_splits_on_last_at() {
        let e = ep("#chan@libera");
        assert_eq!(e.channel, "#chan");
        assert_eq!(e.network, "libera");
        assert!(Endpoint::parse("nochannel").is_err());
        assert!(Endpoint::parse("@net").is_err());
        assert!(Endpoint::parse("#chan@").is_err());
    }

    #[test]
    fn wildcard_match_is_case_insensitive_and_anchored() {
        assert!(wildcard_match("#Dev*", "#devops"));
        assert!(wildcard_match("*", "#anything"));
        assert!(wildcard_match("#a?c", "#abc"));
        assert!(!wildcard_match("#dev", "#devops"));
        assert!(!wildcard_match("#a?c", "#abbc"));
    }

    #[test]
    fn insert_is_idempotent_safe() {
        let mut table = RoutingTable::default();
        let route = Route::new(ep("#a@n1"), ep("#b@n2"), None);
        assert_eq!(table.insert_route(route.clone()), AddOutcome::Added);
        assert_eq!(table.insert_route(route), AddOutcome::AlreadyExists);
        assert_eq!(table.routes().len(), 1);
    }

    #[test]
    fn same_endpoints_different_filter_are_distinct_routes() {
        let mut table = RoutingTable::default();
        let plain = Route::new(ep("#a@n1"), ep("#b@n2"), None);
        let filtered = Route::new(
            ep("#a@n1"),
            ep("#b@n2"),
            Some(ContentFilter::compile("urgent").unwrap()),
        );
        assert_eq!(table.insert_route(plain), AddOutcome::Added);
        assert_eq!(table.insert_route(filtered), AddOutcome::Added);
        assert_eq!(table.routes().len(), 2);
    }

    #[test]
    fn matching_routes_honors_wildcards_and_order() {
        let mut table = RoutingTable::default();
        table.insert_route(Route::new(ep("#a@n1"), ep("#b@n2"), None));
        table.insert_route(Route::new(ep("*@n1"), ep("#c@n3"), None));
        table.insert_route(Route::new(ep("#a@other"), ep("#d@n4"), None));

        let hits = table.matching_routes("#A", "N1");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].target.channel, "#b");
        assert_eq!(hits[1].target.channel, "#c");
    }

    #[test]
    fn delete_touching_removes_both_directions() {
        let mut table = RoutingTable::default();
        table.insert_route(Route::new(ep("#a@n1"), ep("#b@n2"), None));
        table.insert_route(Route::new(ep("#b@n2"), ep("#a@n1"), None));
        table.insert_route(Route::new(ep("#c@n3"), ep("#d@n4"), None));
        assert_eq!(table.delete_touching(&ep("#a@n1")), 2);
        assert_eq!(table.routes().len(), 1);
    }

    #[test]
    fn round_trips_through_persisted_format() {
        let mut table = RoutingTable::default();
        table.insert_route(Route::new(
            ep("#a@n1"),
            ep("#b@n2"),
            Some(ContentFilter::compile("deploy.*done").unwrap()),
        ));
        table.insert_route(Route::new(ep("#b@n2"), ep("#a@n1"), None));
        table.set_substitution("GitBot*", "bot");

        let reparsed = RoutingTable::parse(
            &table.serialize_routes(),
            &table.serialize_substitutions(),
        );
        assert_eq!(reparsed.routes().len(), 2);
        assert_eq!(
            reparsed.routes()[0].filter.as_ref().unwrap().pattern(),
            "deploy.*done"
        );
        assert_eq!(reparsed.substitute_nick("GitBot-3"), "bot");
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let table = RoutingTable::parse(
            "#a | n1 | #b | n2 || garbage || #c | n3 | #d | n4 | [unclosed",
            "loner-no-separator",
        );
        // The garbage entry and the bad-regex entry drop; the good one stays.
        assert_eq!(table.routes().len(), 1);
        assert!(table.substitutions().is_empty());
    }

    #[test]
    fn substitution_last_write_wins() {
        let mut table = RoutingTable::default();
        table.set_substitution("alice", "a1");
        table.set_substitution("Alice", "a2");
        assert_eq!(table.substitutions().len(), 1);
        assert_eq!(table.substitute_nick("alice"), "a2");
        assert_eq!(table.substitute_nick("bob"), "bob");
    }

    #[test]
    fn linked_endpoints_follows_routes_transitively() {
        let mut table = RoutingTable::default();
        table.insert_route(Route::new(ep("#a@n1"), ep("#b@n2"), None));
        table.insert_route(Route::new(ep("#c@n3"), ep("#b@n2"), None));
        table.insert_route(Route::new(ep("#x@n9"), ep("#y@n9"), None));

        let linked = table.linked_endpoints(&ep("#a@n1"));
        assert_eq!(linked.len(), 3);
        assert!(linked.iter().any(|e| e.same_as(&ep("#c@n3"))));
        assert!(!linked.iter().any(|e| e.same_as(&ep("#x@n9"))));
    }
}
