//! Filter Rules
//!
//! Declarative predicates that gate both alerting and export. A rule only
//! applies to the channels in its scope; inside the scope every configured
//! bound must hold, and a bound on a field the event does not carry fails.

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use crate::domain::channel::ChannelName;
use crate::domain::events::FeedEvent;
use crate::infrastructure::config::FilterSettings;

/// Symbol fragments that mark a likely scam token.
pub const SCAM_MARKERS: &[&str] = &["SCAM", "TEST", "FAKE", "RUG", "HONEYPOT"];

/// Holder count below which a token is considered thinly held.
pub const LOW_HOLDER_COUNT: u64 = 50;

/// Liquidity/market-cap ratio below which liquidity is considered thin (5%).
const THIN_LIQUIDITY_DIVISOR: i64 = 20;

/// Derived risk score in `[0, 1]`.
///
/// - +0.4 when the symbol contains a scam marker
/// - +0.3 when liquidity is under 5% of market cap
/// - +0.3 when fewer than 50 wallets hold the token
///
/// Missing inputs contribute nothing.
#[must_use]
pub fn risk_score(event: &FeedEvent) -> f64 {
    let payload = &event.payload;
    let mut score = 0.0;

    if let Some(symbol) = payload.symbol() {
        let symbol = symbol.to_uppercase();
        if SCAM_MARKERS.iter().any(|marker| symbol.contains(marker)) {
            score += 0.4;
        }
    }

    if let (Some(liquidity), Some(market_cap)) = (payload.liquidity_usd(), payload.market_cap_usd())
        && market_cap > Decimal::ZERO
        && liquidity * Decimal::from(THIN_LIQUIDITY_DIVISOR) < market_cap
    {
        score += 0.3;
    }

    if payload.holder_count().is_some_and(|h| h < LOW_HOLDER_COUNT) {
        score += 0.3;
    }

    f64::min(score, 1.0)
}

/// Channels whose events carry per-token market metrics.
#[must_use]
pub fn token_metric_channels() -> BTreeSet<ChannelName> {
    ChannelName::all()
        .iter()
        .copied()
        .filter(|c| c.carries_token_metrics())
        .collect()
}

// =============================================================================
// Filter Rule
// =============================================================================

/// Conjunction of bounds applied to events on the channels in `channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRule {
    /// Minimum market cap in USD.
    pub min_market_cap: Option<Decimal>,
    /// Maximum market cap in USD.
    pub max_market_cap: Option<Decimal>,
    /// Minimum liquidity in USD.
    pub min_liquidity: Option<Decimal>,
    /// Maximum liquidity in USD.
    pub max_liquidity: Option<Decimal>,
    /// Minimum 24h volume in USD.
    pub min_volume_24h: Option<Decimal>,
    /// Maximum 24h volume in USD.
    pub max_volume_24h: Option<Decimal>,
    /// Minimum holder count.
    pub min_holder_count: Option<u64>,
    /// Maximum holder count.
    pub max_holder_count: Option<u64>,
    /// Allowed exchanges (case-insensitive).
    pub exchanges: Option<BTreeSet<String>>,
    /// Allowed symbols (case-insensitive).
    pub symbols: Option<BTreeSet<String>>,
    /// Rejected symbols (case-insensitive).
    pub exclude_symbols: BTreeSet<String>,
    /// Maximum derived risk score.
    pub max_risk_score: Option<f64>,
    /// Channels the rule applies to.
    pub channels: BTreeSet<ChannelName>,
}

impl Default for FilterRule {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterRule {
    /// Rule with no bounds, scoped to the token-bearing channels.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_market_cap: None,
            max_market_cap: None,
            min_liquidity: None,
            max_liquidity: None,
            min_volume_24h: None,
            max_volume_24h: None,
            min_holder_count: None,
            max_holder_count: None,
            exchanges: None,
            symbols: None,
            exclude_symbols: BTreeSet::new(),
            max_risk_score: None,
            channels: token_metric_channels(),
        }
    }

    /// Rule built from environment thresholds, `None` if none are set.
    #[must_use]
    pub fn from_settings(settings: &FilterSettings) -> Option<Self> {
        settings.has_thresholds().then(|| Self {
            min_market_cap: settings.min_market_cap,
            min_liquidity: settings.min_liquidity,
            min_volume_24h: settings.min_volume_24h,
            min_holder_count: settings.min_holders,
            max_risk_score: settings.max_risk_score,
            ..Self::new()
        })
    }

    /// Restrict the rule to `channels`.
    #[must_use]
    pub fn scoped_to(mut self, channels: impl IntoIterator<Item = ChannelName>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    /// Allow only these exchanges.
    #[must_use]
    pub fn allow_exchanges<S: AsRef<str>>(mut self, exchanges: impl IntoIterator<Item = S>) -> Self {
        self.exchanges = Some(exchanges.into_iter().map(|e| e.as_ref().to_lowercase()).collect());
        self
    }

    /// Allow only these symbols.
    #[must_use]
    pub fn allow_symbols<S: AsRef<str>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.symbols = Some(symbols.into_iter().map(|s| s.as_ref().to_uppercase()).collect());
        self
    }

    /// Reject these symbols.
    #[must_use]
    pub fn exclude_symbols<S: AsRef<str>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.exclude_symbols = symbols.into_iter().map(|s| s.as_ref().to_uppercase()).collect();
        self
    }

    /// Whether the rule applies to `channel`.
    #[must_use]
    pub fn applies_to(&self, channel: ChannelName) -> bool {
        self.channels.contains(&channel)
    }

    /// Whether `event` passes the rule.
    #[must_use]
    pub fn matches(&self, event: &FeedEvent) -> bool {
        if !self.applies_to(event.channel) {
            return true;
        }
        let payload = &event.payload;

        within(payload.market_cap_usd(), self.min_market_cap, self.max_market_cap)
            && within(payload.liquidity_usd(), self.min_liquidity, self.max_liquidity)
            && within(payload.volume_24h_usd(), self.min_volume_24h, self.max_volume_24h)
            && within(payload.holder_count(), self.min_holder_count, self.max_holder_count)
            && self.exchanges.as_ref().is_none_or(|allowed| {
                payload
                    .exchange()
                    .is_some_and(|e| contains_ignore_case(allowed, e))
            })
            && self.symbols.as_ref().is_none_or(|allowed| {
                payload
                    .symbol()
                    .is_some_and(|s| contains_ignore_case(allowed, s))
            })
            && payload
                .symbol()
                .is_none_or(|s| !contains_ignore_case(&self.exclude_symbols, s))
            && self
                .max_risk_score
                .is_none_or(|max| risk_score(event) <= max)
    }
}

fn contains_ignore_case(set: &BTreeSet<String>, value: &str) -> bool {
    set.iter().any(|entry| entry.eq_ignore_ascii_case(value))
}

fn within<T: PartialOrd + Copy>(value: Option<T>, min: Option<T>, max: Option<T>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    value.is_some_and(|v| min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m))
}

// =============================================================================
// Filter Set
// =============================================================================

/// All rules must pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    rules: Vec<FilterRule>,
}

impl FilterSet {
    /// Set of `rules`.
    #[must_use]
    pub const fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Whether `event` passes every rule.
    #[must_use]
    pub fn matches(&self, event: &FeedEvent) -> bool {
        self.rules.iter().all(|rule| rule.matches(event))
    }

    /// Rules in the set.
    #[must_use]
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Whether the set has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
