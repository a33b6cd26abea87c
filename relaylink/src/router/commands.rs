//! Operator command surface.
//!
//! A thin text layer over the router's table operations: the embedding bot
//! framework parses nothing itself, it hands the raw argument line plus
//! the invoking context here and relays the reply lines back verbatim.
//! Errors are reported synchronously to the operator, never retried.

use tracing::debug;

use crate::error::CommandError;
use crate::routes::{AddOutcome, Endpoint, RemoveOutcome};

use super::{AddReport, RelayRouter, RemoveReport};

/// Where the command was issued from; supplies the defaults for omitted
/// `--from`/`--to` endpoints and for `nicks` without an argument.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub network: String,
    /// `None` when invoked outside a channel (private message console).
    pub channel: Option<String>,
}

impl CommandContext {
    fn current_endpoint(&self) -> Result<Endpoint, CommandError> {
        match self.channel.as_deref() {
            Some(channel) => Ok(Endpoint::new(channel, self.network.clone())),
            None => Err(CommandError::NoChannelContext),
        }
    }
}

/// Parses and executes one operator command line, returning the reply
/// lines to show the invoker.
pub fn handle_command(
    router: &RelayRouter,
    ctx: &CommandContext,
    line: &str,
) -> Result<Vec<String>, CommandError> {
    let mut tokens = line.split_whitespace();
    let command = tokens.next().unwrap_or("").to_lowercase();
    let args: Vec<&str> = tokens.collect();
    debug!(%command, network = %ctx.network, "operator command");

    match command.as_str() {
        "list" => Ok(list(router)),
        "add" => link_command(router, ctx, &args, true),
        "remove" => link_command(router, ctx, &args, false),
        "addall" => all_command(router, &args, true),
        "removeall" => all_command(router, &args, false),
        "substitute" => {
            if args.len() != 2 {
                return Err(CommandError::MissingValue(
                    "substitute <pattern> <replacement>".into(),
                ));
            }
            let (pattern, replacement) = (args[0], args[1]);
            router.set_substitution(pattern, replacement);
            Ok(vec![format!("substituting `{pattern}` with `{replacement}`")])
        }
        "nosubstitute" => {
            if args.len() != 1 {
                return Err(CommandError::MissingValue("nosubstitute <pattern>".into()));
            }
            let pattern = args[0];
            match router.clear_substitution(pattern) {
                RemoveOutcome::Removed => Ok(vec![format!("no longer substituting `{pattern}`")]),
                RemoveOutcome::NotFound => Ok(vec![format!("no substitution for `{pattern}`")]),
            }
        }
        "nicks" => nicks(router, ctx, &args),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

fn list(router: &RelayRouter) -> Vec<String> {
    let table = router.table();
    let mut lines: Vec<String> = table.routes().iter().map(|r| r.to_string()).collect();
    for rule in table.substitutions() {
        lines.push(format!("substitute {} -> {}", rule.pattern, rule.replacement));
    }
    if lines.is_empty() {
        lines.push("no relays configured".to_string());
    }
    lines
}

fn endpoint_value(
    iter: &mut std::slice::Iter<'_, &str>,
    flag: &str,
) -> Result<Endpoint, CommandError> {
    let value = iter
        .next()
        .copied()
        .ok_or_else(|| CommandError::MissingValue(flag.to_string()))?;
    Endpoint::parse(value)
}

/// `add`/`remove --from ch@net --to ch@net [--regexp pat] [--reciprocal]`.
fn link_command(
    router: &RelayRouter,
    ctx: &CommandContext,
    args: &[&str],
    adding: bool,
) -> Result<Vec<String>, CommandError> {
    let mut from = None;
    let mut to = None;
    let mut pattern: Option<String> = None;
    let mut reciprocal = false;

    let mut iter = args.iter();
    while let Some(&flag) = iter.next() {
        match flag {
            "--from" => from = Some(endpoint_value(&mut iter, flag)?),
            "--to" => to = Some(endpoint_value(&mut iter, flag)?),
            "--regexp" => {
                pattern = Some(
                    iter.next()
                        .ok_or_else(|| CommandError::MissingValue(flag.into()))?
                        .to_string(),
                )
            }
            "--reciprocal" => reciprocal = true,
            other => return Err(CommandError::UnknownFlag(other.to_string())),
        }
    }

    // At least one side must be explicit; the other defaults to the
    // channel and network the command was issued on.
    if from.is_none() && to.is_none() {
        return Err(CommandError::MissingValue("--from or --to".into()));
    }
    let from = match from {
        Some(e) => e,
        None => ctx.current_endpoint()?,
    };
    let to = match to {
        Some(e) => e,
        None => ctx.current_endpoint()?,
    };

    if adding {
        let report = router.add_route(from.clone(), to.clone(), pattern.as_deref(), reciprocal)?;
        Ok(add_reply(&from, &to, report))
    } else {
        let report =
            router.remove_route(from.clone(), to.clone(), pattern.as_deref(), reciprocal)?;
        Ok(remove_reply(&from, &to, report))
    }
}

fn add_reply(from: &Endpoint, to: &Endpoint, report: AddReport) -> Vec<String> {
    let mut lines = vec![match report.forward {
        AddOutcome::Added => format!("relaying {from} -> {to}"),
        AddOutcome::AlreadyExists => format!("{from} -> {to} already exists"),
    }];
    if let Some(mirrored) = report.mirrored {
        lines.push(match mirrored {
            AddOutcome::Added => format!("relaying {to} -> {from}"),
            AddOutcome::AlreadyExists => format!("{to} -> {from} already exists"),
        });
    }
    lines
}

fn remove_reply(from: &Endpoint, to: &Endpoint, report: RemoveReport) -> Vec<String> {
    let mut lines = vec![match report.forward {
        RemoveOutcome::Removed => format!("no longer relaying {from} -> {to}"),
        RemoveOutcome::NotFound => format!("no route {from} -> {to}"),
    }];
    if let Some(mirrored) = report.mirrored {
        lines.push(match mirrored {
            RemoveOutcome::Removed => format!("no longer relaying {to} -> {from}"),
            RemoveOutcome::NotFound => format!("no route {to} -> {from}"),
        });
    }
    lines
}

/// `addall`/`removeall [--regexp pat] <ch@net>...`.
fn all_command(
    router: &RelayRouter,
    args: &[&str],
    adding: bool,
) -> Result<Vec<String>, CommandError> {
    let mut pattern: Option<String> = None;
    let mut endpoints = Vec::new();

    let mut iter = args.iter();
    while let Some(&arg) = iter.next() {
        match arg {
            "--regexp" => {
                pattern = Some(
                    iter.next()
                        .ok_or_else(|| CommandError::MissingValue(arg.into()))?
                        .to_string(),
                )
            }
            flag if flag.starts_with("--") => {
                return Err(CommandError::UnknownFlag(flag.to_string()));
            }
            endpoint => endpoints.push(Endpoint::parse(endpoint)?),
        }
    }

    let report = if adding {
        router.add_all_pairs(&endpoints, pattern.as_deref())?
    } else {
        router.remove_all_pairs(&endpoints, pattern.as_deref())?
    };
    let verb = if adding { "added" } else { "removed" };
    if report.failures == 0 {
        Ok(vec![format!("{verb} {} routes", report.total)])
    } else {
        Ok(vec![format!(
            "{verb} {} of {} routes ({} skipped)",
            report.total - report.failures,
            report.total,
            report.failures
        )])
    }
}

/// `nicks [channel[@network]] [--count]` — membership across every channel
/// linked (in either direction, transitively) to the given one.
fn nicks(
    router: &RelayRouter,
    ctx: &CommandContext,
    args: &[&str],
) -> Result<Vec<String>, CommandError> {
    let mut count_only = false;
    let mut endpoint = None;
    for &arg in args {
        match arg {
            "--count" => count_only = true,
            flag if flag.starts_with("--") => {
                return Err(CommandError::UnknownFlag(flag.to_string()));
            }
            spec => {
                endpoint = Some(if spec.contains('@') {
                    Endpoint::parse(spec)?
                } else {
                    Endpoint::new(spec, ctx.network.clone())
                })
            }
        }
    }
    let start = match endpoint {
        Some(e) => e,
        None => ctx.current_endpoint()?,
    };

    let table = router.table();
    let linked = table.linked_endpoints(&start);
    let mut lines = Vec::new();
    let mut total = 0usize;
    for endpoint in &linked {
        let Some(snapshot) = router.registry().snapshot(&endpoint.network) else {
            lines.push(format!("{endpoint}: network not connected"));
            continue;
        };
        let count = snapshot.member_count(&endpoint.channel);
        total += count;
        if count_only {
            lines.push(format!("{endpoint}: {count}"));
        } else {
            let roster = snapshot
                .channels
                .iter()
                .find(|(c, _)| c.eq_ignore_ascii_case(&endpoint.channel))
                .map(|(_, r)| {
                    let mut nicks: Vec<&str> =
                        r.members.keys().map(String::as_str).collect();
                    nicks.sort_unstable_by_key(|n| n.to_lowercase());
                    nicks.join(", ")
                })
                .unwrap_or_default();
            lines.push(format!("{endpoint} ({count}): {roster}"));
        }
    }
    lines.push(format!("{total} nicks across {} linked channels", linked.len()));
    Ok(lines)
}
