//! Frame counter feed: one report per line from a pipeline process.
//!
//! Line format: `<element-id> <name> <processed> <dropped>`, where the id is decimal or
//! `0x`-prefixed hex (an element handle address) and the name may contain spaces.
//! A line `reset` starts a new measuring window; blank lines and `#` comments are skipped.

use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use player_stats::context::StatsContext;
use player_stats::frames::ElementId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLine {
    Report {
        element: ElementId,
        name: String,
        processed: u64,
        dropped: u64,
    },
    Reset,
}

fn parse_element_id(raw: &str) -> Result<ElementId> {
    let id = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    }
    .with_context(|| format!("element id {raw:?}"))?;
    Ok(ElementId(id))
}

/// Parse one feed line; `Ok(None)` for lines that carry nothing.
pub fn parse_line(line: &str) -> Result<Option<FeedLine>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.eq_ignore_ascii_case("reset") {
        return Ok(Some(FeedLine::Reset));
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(anyhow!("expected `<element-id> <name> <processed> <dropped>`"));
    }
    let element = parse_element_id(tokens[0])?;
    let processed = tokens[tokens.len() - 2]
        .parse::<u64>()
        .with_context(|| format!("processed count {:?}", tokens[tokens.len() - 2]))?;
    let dropped = tokens[tokens.len() - 1]
        .parse::<u64>()
        .with_context(|| format!("dropped count {:?}", tokens[tokens.len() - 1]))?;
    let name = tokens[1..tokens.len() - 2].join(" ");
    Ok(Some(FeedLine::Report {
        element,
        name,
        processed,
        dropped,
    }))
}

/// Apply every line of `reader` to `ctx` until end of input. Returns the number of
/// lines applied.
pub fn pump(reader: impl BufRead, ctx: &StatsContext) -> usize {
    let reporter = ctx.frame_reporter();
    let mut applied = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("frame feed read error: {e}");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(FeedLine::Report {
                element,
                name,
                processed,
                dropped,
            })) => {
                reporter.report(element, &name, processed, dropped);
                applied += 1;
            }
            Ok(Some(FeedLine::Reset)) => {
                ctx.reset();
                applied += 1;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(line = idx + 1, "skipping frame report: {e:#}"),
        }
    }
    applied
}

/// Run [`pump`] over stdin on a background thread.
pub fn spawn_stdin_feed(ctx: Arc<StatsContext>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let applied = pump(stdin.lock(), &ctx);
        tracing::info!(lines = applied, "frame feed closed");
    })
}
