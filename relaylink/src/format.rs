//! Event-to-text rendering.
//!
//! Pure given its inputs: no I/O, no mutation, no clock. The router decides
//! which routes see an event; this module only decides what the relayed
//! line looks like for one target.

use crate::config::DisplayOptions;
use crate::event::{EventKind, RelayEvent};
use crate::registry::NetworkSnapshot;
use crate::routes::{SubstitutionRule, substitute_nick};

/// mIRC color control byte.
const COLOR: char = '\x03';

/// Zero-width space, prefixed to relayed nicks under highlight avoidance.
const NO_HIGHLIGHT_MARKER: char = '\u{200b}';

/// Fixed nick/network color palette. Eleven readable mIRC codes; the
/// palette index for a name is the sum of its character codes mod 11, so a
/// given nick always gets the same color on every target.
const PALETTE: [&str; 11] = [
    "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12",
];

fn palette_code(name: &str) -> &'static str {
    let sum: u32 = name.chars().map(|c| c as u32).sum();
    PALETTE[(sum % PALETTE.len() as u32) as usize]
}

fn colorize(text: &str, seed: &str) -> String {
    format!("{COLOR}{}{text}{COLOR}", palette_code(seed))
}

/// Everything the formatter may consult besides the event itself.
pub struct FormatContext<'a> {
    pub display: &'a DisplayOptions,
    pub substitutions: &'a [SubstitutionRule],
    /// Last-known membership of the source network. Needed to resolve the
    /// kicked user's hostmask, which the protocol doesn't carry on KICK.
    pub source_members: Option<&'a NetworkSnapshot>,
}

/// Renders one event as it should appear on a target whose display options
/// are in `ctx`. `channel` is the source channel this rendering is scoped
/// to (for NICK/QUIT the router calls once per affected channel).
///
/// Returns `None` when the event kind is disabled for the target or a
/// required field is absent; the route is then skipped silently.
pub fn format_event(event: &RelayEvent, channel: &str, ctx: &FormatContext) -> Option<String> {
    let body = match &event.kind {
        EventKind::Privmsg { text, action } => message_line(event, text, *action, ctx),
        EventKind::Notice { text } => message_line(event, text, false, ctx),
        _ if !ctx.display.relay_presence => return None,
        EventKind::Join => {
            format!("{} has joined {channel}", actor(event, ctx))
        }
        EventKind::Part { reason } => {
            let mut line = format!("{} has left {channel}", actor(event, ctx));
            if let Some(reason) = reason.as_deref().filter(|r| !r.is_empty()) {
                line.push_str(&format!(" ({reason})"));
            }
            line
        }
        EventKind::Kick { kicked, reason } => {
            if kicked.is_empty() {
                return None;
            }
            // The kicker's hostmask arrives with the event; the kicked
            // user's has to come from the membership snapshot. Unresolvable
            // just drops the segment, never the whole line.
            let kicked_seg = ctx
                .source_members
                .and_then(|m| m.userhost_of(kicked))
                .filter(|_| ctx.display.hostmasks)
                .map(|uh| format!("{kicked}({uh})"))
                .unwrap_or_else(|| kicked.clone());
            let mut line =
                format!("{kicked_seg} has been kicked from {channel} by {}", event.nick);
            if let Some(reason) = reason.as_deref().filter(|r| !r.is_empty()) {
                line.push_str(&format!(" ({reason})"));
            }
            line
        }
        EventKind::Mode { modes, args } => {
            let mut line = format!("{} set mode {modes}", actor(event, ctx));
            if !args.is_empty() {
                line.push(' ');
                line.push_str(&args.join(" "));
            }
            line.push_str(&format!(" on {channel}"));
            line
        }
        EventKind::Nick { new_nick } => {
            format!("{} is now known as {new_nick}", event.nick)
        }
        EventKind::Quit { reason } => {
            let mut line = format!("{} has quit", event.nick);
            if let Some(reason) = reason.as_deref().filter(|r| !r.is_empty()) {
                line.push_str(&format!(" ({reason})"));
            }
            line
        }
        EventKind::Topic { text } => {
            format!("{} changed the topic of {channel} to: {text}", event.nick)
        }
    };

    if ctx.display.network_prefix {
        let net = if ctx.display.color {
            colorize(&event.network, &event.network)
        } else {
            event.network.clone()
        };
        Some(format!("[{net}] {body}"))
    } else {
        Some(body)
    }
}

/// `<nick> text` / `* nick text` with substitution, highlight marker, and
/// colorization applied to the nick in that order.
fn message_line(event: &RelayEvent, text: &str, action: bool, ctx: &FormatContext) -> String {
    let nick = substitute_nick(ctx.substitutions, &event.nick);
    let mut shown = nick.to_string();
    if ctx.display.no_highlight {
        shown.insert(0, NO_HIGHLIGHT_MARKER);
    }
    if ctx.display.color {
        // Color keyed on the substituted nick, not the marker.
        shown = colorize(&shown, nick);
    }
    if action {
        format!("* {shown} {text}")
    } else {
        format!("<{shown}> {text}")
    }
}

/// Actor segment for presence lines: `nick(user@host)` when hostmask
/// display is on and the event carried one, bare nick otherwise.
fn actor(event: &RelayEvent, ctx: &FormatContext) -> String {
    match event.userhost.as_deref() {
        Some(uh) if ctx.display.hostmasks => format!("{}({uh})", event.nick),
        _ => event.nick.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventOrigin;
    use crate::registry::{ChannelRoster, Member, MemberRoles};
    use std::collections::HashMap;

    fn plain_display() -> DisplayOptions {
        DisplayOptions {
            color: false,
            hostmasks: false,
            network_prefix: true,
            no_highlight: false,
            relay_presence: true,
        }
    }

    fn ctx<'a>(display: &'a DisplayOptions) -> FormatContext<'a> {
        FormatContext { display, substitutions: &[], source_members: None }
    }

    fn privmsg(nick: &str, text: &str) -> RelayEvent {
        RelayEvent::from_network(
            "net1",
            Some("#x"),
            nick,
            EventKind::Privmsg { text: text.into(), action: false },
        )
    }

    #[test]
    fn privmsg_with_network_prefix_and_no_color() {
        let display = plain_display();
        let line = format_event(&privmsg("Alice", "hello"), "#x", &ctx(&display)).unwrap();
        assert_eq!(line, "[net1] <Alice> hello");
    }

    #[test]
    fn action_renders_with_star() {
        let display = DisplayOptions { network_prefix: false, ..plain_display() };
        let event = RelayEvent::from_network(
            "net1",
            Some("#x"),
            "Alice",
            EventKind::Privmsg { text: "waves".into(), action: true },
        );
        assert_eq!(format_event(&event, "#x", &ctx(&display)).unwrap(), "* Alice waves");
    }

    #[test]
    fn colorization_is_deterministic_and_from_the_palette() {
        let display = DisplayOptions { network_prefix: false, ..plain_display() };
        let display = DisplayOptions { color: true, ..display };
        let a = format_event(&privmsg("Alice", "hi"), "#x", &ctx(&display)).unwrap();
        let b = format_event(&privmsg("Alice", "hi"), "#x", &ctx(&display)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, format!("<\x03{}Alice\x03> hi", palette_code("Alice")));
    }

    #[test]
    fn substitution_applies_before_coloring() {
        let display = DisplayOptions { network_prefix: false, ..plain_display() };
        let subs = [SubstitutionRule { pattern: "Alice".into(), replacement: "anon".into() }];
        let c = FormatContext { display: &display, substitutions: &subs, source_members: None };
        assert_eq!(format_event(&privmsg("Alice", "hi"), "#x", &c).unwrap(), "<anon> hi");
    }

    #[test]
    fn highlight_marker_prefixes_the_nick() {
        let display =
            DisplayOptions { network_prefix: false, no_highlight: true, ..plain_display() };
        let line = format_event(&privmsg("Alice", "hi"), "#x", &ctx(&display)).unwrap();
        assert_eq!(line, "<\u{200b}Alice> hi");
    }

    #[test]
    fn join_includes_userhost_only_when_enabled() {
        let display = DisplayOptions { network_prefix: false, ..plain_display() };
        let event = RelayEvent::from_network("net1", Some("#x"), "Alice", EventKind::Join)
            .with_userhost("a@host");
        assert_eq!(format_event(&event, "#x", &ctx(&display)).unwrap(), "Alice has joined #x");

        let display = DisplayOptions { hostmasks: true, ..display };
        assert_eq!(
            format_event(&event, "#x", &ctx(&display)).unwrap(),
            "Alice(a@host) has joined #x"
        );
    }

    #[test]
    fn kick_with_unresolvable_hostmask_omits_the_segment() {
        let display = DisplayOptions { network_prefix: false, hostmasks: true, ..plain_display() };
        let event = RelayEvent::from_network(
            "net1",
            Some("#x"),
            "Carol",
            EventKind::Kick { kicked: "Bob".into(), reason: Some("spam".into()) },
        );
        let line = format_event(&event, "#x", &ctx(&display)).unwrap();
        assert_eq!(line, "Bob has been kicked from #x by Carol (spam)");
    }

    #[test]
    fn kick_resolves_hostmask_from_the_source_roster() {
        let display = DisplayOptions { network_prefix: false, hostmasks: true, ..plain_display() };
        let snapshot = NetworkSnapshot {
            channels: HashMap::from([(
                "#x".to_string(),
                ChannelRoster {
                    members: HashMap::from([(
                        "Bob".to_string(),
                        Member { userhost: Some("b@host".into()), roles: MemberRoles::default() },
                    )]),
                },
            )]),
        };
        let c = FormatContext {
            display: &display,
            substitutions: &[],
            source_members: Some(&snapshot),
        };
        let event = RelayEvent::from_network(
            "net1",
            Some("#x"),
            "Carol",
            EventKind::Kick { kicked: "Bob".into(), reason: None },
        );
        assert_eq!(
            format_event(&event, "#x", &c).unwrap(),
            "Bob(b@host) has been kicked from #x by Carol"
        );
    }

    #[test]
    fn quit_and_nick_lines_scope_to_the_given_channel_implicitly() {
        let display = DisplayOptions { network_prefix: false, ..plain_display() };
        let quit = RelayEvent {
            network: "net1".into(),
            channel: None,
            nick: "Alice".into(),
            userhost: None,
            kind: EventKind::Quit { reason: Some("bye".into()) },
            origin: EventOrigin::Network,
        };
        assert_eq!(format_event(&quit, "#x", &ctx(&display)).unwrap(), "Alice has quit (bye)");

        let nick = RelayEvent {
            kind: EventKind::Nick { new_nick: "Alicia".into() },
            ..quit
        };
        assert_eq!(
            format_event(&nick, "#y", &ctx(&display)).unwrap(),
            "Alice is now known as Alicia"
        );
    }

    #[test]
    fn presence_disabled_suppresses_joins_but_not_messages() {
        let display =
            DisplayOptions { network_prefix: false, relay_presence: false, ..plain_display() };
        let join = RelayEvent::from_network("net1", Some("#x"), "Alice", EventKind::Join);
        assert_eq!(format_event(&join, "#x", &ctx(&display)), None);
        assert!(format_event(&privmsg("Alice", "hi"), "#x", &ctx(&display)).is_some());
    }

    #[test]
    fn mode_line_includes_args() {
        let display = plain_display();
        let event = RelayEvent::from_network(
            "net1",
            Some("#x"),
            "Carol",
            EventKind::Mode { modes: "+ov".into(), args: vec!["Bob".into(), "Dan".into()] },
        );
        assert_eq!(
            format_event(&event, "#x", &ctx(&display)).unwrap(),
            "[net1] Carol set mode +ov Bob Dan on #x"
        );
    }
}
