//! Arbitrage signal text parsing.
//!
//! Messages arrive decorated with emoji and inconsistent separators. All
//! scanning happens on an ASCII-cleaned copy (non-ASCII characters become
//! spaces) so offsets stay consistent across the helpers.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::{SignalEvent, Symbol, VenueId};

/// Which leg a venue line quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegSide {
    Long,
    Short,
}

/// Parse one raw message into a signal event.
///
/// A message is an arbitrage signal iff it carries a spread token, at least
/// one long and one short venue line with a dollar price, and is not a
/// price-alignment notice.
pub fn parse(raw: &str) -> Option<SignalEvent> {
    if raw.len() < 3 {
        return None;
    }
    // Alignment notices share the venue-line shape but are not signals.
    if raw.to_lowercase().contains("aligned") {
        return None;
    }

    let clean = ascii_clean(raw);
    let (spread, spread_pos) = extract_spread(&clean)?;

    let mut longs = Vec::new();
    let mut shorts = Vec::new();
    for line in clean.lines() {
        if let Some((side, venue, price)) = parse_leg_line(line) {
            match side {
                LegSide::Long => longs.push((venue, price)),
                LegSide::Short => shorts.push((venue, price)),
            }
        }
    }
    let (long_venue, long_price) = longs.into_iter().next()?;
    let (short_venue, short_price) = shorts.into_iter().next()?;
    if long_venue == short_venue {
        return None;
    }

    let symbol = extract_symbol(&clean, spread_pos)?;
    let ref_price = reference_price(&clean);

    let mut prices = HashMap::new();
    prices.insert(long_venue, long_price);
    prices.insert(short_venue, short_price);

    Some(SignalEvent {
        symbol,
        spread,
        prices,
        ref_price,
        parsed_at: Utc::now(),
    })
}

/// Replace every non-ASCII character with a space.
fn ascii_clean(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { ' ' })
        .collect()
}

/// Find `Spread[:\s]+<number>%` and return the percentage with the match
/// position.
fn extract_spread(clean: &str) -> Option<(Decimal, usize)> {
    let lower = clean.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find("spread") {
        let pos = search_from + rel;
        let after = &clean[pos + "spread".len()..];
        let trimmed = after.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        if trimmed.len() < after.len() {
            let digits_end = trimmed
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(trimmed.len());
            if digits_end > 0 && trimmed[digits_end..].starts_with('%') {
                if let Ok(value) = trimmed[..digits_end].parse::<Decimal>() {
                    return Some((value, pos));
                }
            }
        }
        search_from = pos + "spread".len();
    }
    None
}

/// Parse one `Long VENUE : $price` / `Short_VENUE: $price` line.
fn parse_leg_line(line: &str) -> Option<(LegSide, VenueId, Decimal)> {
    let lower = line.to_ascii_lowercase();
    let (side, keyword_end) = if let Some(i) = lower.find("long") {
        (LegSide::Long, i + "long".len())
    } else if let Some(i) = lower.find("short") {
        (LegSide::Short, i + "short".len())
    } else {
        return None;
    };

    let rest = line[keyword_end..].trim_start_matches(|c: char| c == '_' || c.is_whitespace());
    let venue_end = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    if venue_end == 0 {
        return None;
    }
    let venue = &rest[..venue_end];

    let after = rest[venue_end..].trim_start();
    let after = after.strip_prefix(':')?.trim_start();
    let after = after.strip_prefix('$')?.trim_start();
    let digits_end = after
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(after.len());
    let price: Decimal = after[..digits_end].parse().ok()?;
    if price <= Decimal::ZERO {
        return None;
    }
    Some((side, VenueId::new(venue), price))
}

/// Symbol extraction, in priority order:
/// 1. `#TOKEN |` preceding the spread token
/// 2. `(COPY: TOKEN)`
/// 3. `TOKEN_USDT` / `TOKEN-USDT` with the suffix stripped
/// 4. capitalized token adjacent to the spread keyword
fn extract_symbol(clean: &str, spread_pos: usize) -> Option<Symbol> {
    // 1. `#TOKEN |` before the spread token.
    for (hash_pos, _) in clean.match_indices('#') {
        if hash_pos >= spread_pos {
            continue;
        }
        let rest = &clean[hash_pos + 1..];
        let end = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        if end == 0 {
            continue;
        }
        if rest[end..].trim_start().starts_with('|') {
            if let Some(symbol) = Symbol::parse(&rest[..end]) {
                return Some(symbol);
            }
        }
    }

    // 2. `(COPY: TOKEN)`.
    if let Some(pos) = clean.find("(COPY:") {
        let rest = &clean[pos + "(COPY:".len()..];
        if let Some(close) = rest.find(')') {
            if let Some(symbol) = Symbol::parse(rest[..close].trim()) {
                return Some(symbol);
            }
        }
    }

    // 3. `TOKEN_USDT` / `TOKEN-USDT`.
    for word in clean.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        for suffix in ["_USDT", "-USDT"] {
            if let Some(base) = word.find(suffix).map(|i| &word[..i]) {
                if let Some(symbol) = Symbol::parse(base) {
                    return Some(symbol);
                }
            }
        }
    }

    // 4. Capitalized token next to the spread keyword, on its line.
    let line_start = clean[..spread_pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = clean[spread_pos..]
        .find('\n')
        .map(|i| spread_pos + i)
        .unwrap_or(clean.len());
    let tokens: Vec<&str> = clean[line_start..line_end].split_whitespace().collect();
    let keyword_index = tokens
        .iter()
        .position(|t| t.to_ascii_lowercase().starts_with("spread"))?;
    for index in (0..keyword_index).rev() {
        let token = tokens[index].trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if token.is_empty() {
            continue;
        }
        if token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            if let Some(symbol) = Symbol::parse(token) {
                return Some(symbol);
            }
        }
        break;
    }
    None
}

/// Median of all dollar-prefixed numbers in the message.
pub fn reference_price(clean: &str) -> Option<Decimal> {
    let mut prices = Vec::new();
    for (pos, _) in clean.match_indices('$') {
        let rest = clean[pos + 1..].trim_start();
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            continue;
        }
        if let Ok(value) = rest[..digits_end].parse::<Decimal>() {
            if value > Decimal::ZERO {
                prices.push(value);
            }
        }
    }
    if prices.is_empty() {
        return None;
    }
    prices.sort();
    let mid = prices.len() / 2;
    if prices.len() % 2 == 1 {
        Some(prices[mid])
    } else {
        Some((prices[mid - 1] + prices[mid]) / Decimal::TWO)
    }
}
