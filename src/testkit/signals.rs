//! Builders for raw signal messages in the wire format the router accepts.

use rust_decimal::Decimal;

/// A decorated two-venue arbitrage message for `symbol`.
///
/// `long_venue`/`short_venue` are spelled uppercase the way channels
/// announce them; the router lowercases venue ids.
pub fn signal_message(
    symbol: &str,
    spread: Decimal,
    long_venue: &str,
    long_price: Decimal,
    short_venue: &str,
    short_price: Decimal,
) -> String {
    format!(
        "\u{1F4C8}\u{1F4C8}#{symbol} | Spread: {spread}%\n\
         \u{1F4CC} {symbol}_USDT (COPY: {symbol})\n\
         \u{1F534}Short {short} : ${short_price}\n\
         \u{1F7E2}Long  {long} : ${long_price}\n",
        symbol = symbol,
        spread = spread,
        short = short_venue.to_uppercase(),
        long = long_venue.to_uppercase(),
        short_price = short_price,
        long_price = long_price,
    )
}
