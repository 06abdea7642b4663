//! Typed Feed Events
//!
//! Validated, immutable records derived from an envelope payload. Monetary
//! and quantity fields are [`Decimal`] so downstream aggregation never
//! accumulates binary floating point error.
//!
//! Field names accept both the long form and the compact keys the feed uses
//! (`pa`, `ex`, `bti.s`, `bti.mc`, ...). A pool-creation payload may arrive as
//! batches of the form `[{"c": "sol", "p": [pool, ...]}]`; batches are
//! flattened and every pool becomes its own event.

pub mod lenient;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::channel::ChannelName;

// =============================================================================
// Shared Pieces
// =============================================================================

/// Token metadata embedded in pool and pair records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token mint/contract address.
    #[serde(default, alias = "a", deserialize_with = "lenient::text")]
    pub address: Option<String>,
    /// Token name.
    #[serde(default, alias = "n", deserialize_with = "lenient::text")]
    pub name: Option<String>,
    /// Token symbol.
    #[serde(default, alias = "s", deserialize_with = "lenient::text")]
    pub symbol: Option<String>,
    /// Token decimals.
    #[serde(default, alias = "d", deserialize_with = "lenient::count")]
    pub decimals: Option<u64>,
    /// Price in USD.
    #[serde(default, alias = "p", alias = "price", deserialize_with = "lenient::decimal")]
    pub price_usd: Option<Decimal>,
    /// Market capitalization in USD.
    #[serde(default, alias = "mc", alias = "market_cap", deserialize_with = "lenient::decimal")]
    pub market_cap_usd: Option<Decimal>,
    /// Liquidity in USD.
    #[serde(default, alias = "lq", alias = "liquidity", deserialize_with = "lenient::decimal")]
    pub liquidity_usd: Option<Decimal>,
    /// 24h volume in USD.
    #[serde(default, alias = "v24h", alias = "volume_24h", deserialize_with = "lenient::decimal")]
    pub volume_24h_usd: Option<Decimal>,
    /// Number of holders.
    #[serde(default, alias = "hc", alias = "holders", deserialize_with = "lenient::count")]
    pub holder_count: Option<u64>,
}

/// Buy or sell side of a trade or order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buy.
    #[serde(alias = "BUY", alias = "Buy")]
    Buy,
    /// Sell.
    #[serde(alias = "SELL", alias = "Sell")]
    Sell,
    /// Anything the feed sends that is neither.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Limit order status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting to be filled.
    Pending,
    /// Partially filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled by the owner.
    Cancelled,
    /// Expired before filling.
    Expired,
    /// Unrecognized status.
    #[default]
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Per-Channel Records
// =============================================================================

/// New liquidity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCreated {
    /// Pool address.
    #[serde(alias = "pa", alias = "address")]
    pub pool_address: String,
    /// Base token address.
    #[serde(default, alias = "ta", deserialize_with = "lenient::text")]
    pub token_address: Option<String>,
    /// Base token address as reported by the pool.
    #[serde(default, alias = "ba", deserialize_with = "lenient::text")]
    pub base_token_address: Option<String>,
    /// Quote token address.
    #[serde(default, alias = "qa", deserialize_with = "lenient::text")]
    pub quote_token_address: Option<String>,
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// DEX/exchange name.
    #[serde(default, alias = "ex", alias = "exchange", deserialize_with = "lenient::text")]
    pub dex: Option<String>,
    /// Initial liquidity in USD.
    #[serde(default, alias = "il", alias = "initial_liquidity", deserialize_with = "lenient::decimal")]
    pub initial_liquidity_usd: Option<Decimal>,
    /// Initial price in USD.
    #[serde(default, alias = "ip", alias = "initial_price", deserialize_with = "lenient::decimal")]
    pub initial_price_usd: Option<Decimal>,
    /// Market capitalization in USD.
    #[serde(default, alias = "mc", deserialize_with = "lenient::decimal")]
    pub market_cap_usd: Option<Decimal>,
    /// Pool creation time.
    #[serde(default, alias = "ot", alias = "open_timestamp", deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Base token metadata.
    #[serde(default, alias = "bti", alias = "token_info", alias = "base_token_info")]
    pub token: Option<TokenInfo>,
}

/// Trading pair price/volume update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairUpdated {
    /// Pair address.
    #[serde(alias = "pa", alias = "pair")]
    pub pair_address: String,
    /// Token address.
    #[serde(default, alias = "ta", alias = "a", deserialize_with = "lenient::text")]
    pub token_address: Option<String>,
    /// Token symbol.
    #[serde(default, alias = "s", deserialize_with = "lenient::text")]
    pub symbol: Option<String>,
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// DEX/exchange name.
    #[serde(default, alias = "ex", alias = "exchange", deserialize_with = "lenient::text")]
    pub dex: Option<String>,
    /// Current price in USD.
    #[serde(default, alias = "p", alias = "price", deserialize_with = "lenient::decimal")]
    pub price_usd: Option<Decimal>,
    /// 24h price change, percent.
    #[serde(default, alias = "pc24h", deserialize_with = "lenient::decimal")]
    pub price_change_24h: Option<Decimal>,
    /// 24h volume in USD.
    #[serde(default, alias = "v24h", alias = "volume", deserialize_with = "lenient::decimal")]
    pub volume_24h_usd: Option<Decimal>,
    /// Liquidity in USD.
    #[serde(default, alias = "lq", alias = "liquidity", deserialize_with = "lenient::decimal")]
    pub liquidity_usd: Option<Decimal>,
    /// Market capitalization in USD.
    #[serde(default, alias = "mc", alias = "market_cap", deserialize_with = "lenient::decimal")]
    pub market_cap_usd: Option<Decimal>,
    /// Number of holders.
    #[serde(default, alias = "hc", alias = "holders", deserialize_with = "lenient::count")]
    pub holder_count: Option<u64>,
    /// Update time.
    #[serde(default, alias = "ut", alias = "timestamp", deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Newly launched token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLaunched {
    /// Token address.
    #[serde(alias = "a", alias = "ta", alias = "address")]
    pub token_address: String,
    /// Token name.
    #[serde(default, alias = "n", deserialize_with = "lenient::text")]
    pub name: Option<String>,
    /// Token symbol.
    #[serde(default, alias = "s", deserialize_with = "lenient::text")]
    pub symbol: Option<String>,
    /// Token decimals.
    #[serde(default, alias = "d", deserialize_with = "lenient::count")]
    pub decimals: Option<u64>,
    /// Total supply.
    #[serde(default, alias = "ts", deserialize_with = "lenient::decimal")]
    pub total_supply: Option<Decimal>,
    /// Launch price in USD.
    #[serde(default, alias = "p", alias = "initial_price", deserialize_with = "lenient::decimal")]
    pub initial_price_usd: Option<Decimal>,
    /// Market capitalization in USD.
    #[serde(default, alias = "mc", alias = "market_cap", deserialize_with = "lenient::decimal")]
    pub market_cap_usd: Option<Decimal>,
    /// Liquidity in USD.
    #[serde(default, alias = "lq", alias = "liquidity", deserialize_with = "lenient::decimal")]
    pub liquidity_usd: Option<Decimal>,
    /// 24h volume in USD.
    #[serde(default, alias = "v24h", deserialize_with = "lenient::decimal")]
    pub volume_24h_usd: Option<Decimal>,
    /// Number of holders.
    #[serde(default, alias = "hc", alias = "holders", deserialize_with = "lenient::count")]
    pub holder_count: Option<u64>,
    /// Creator wallet.
    #[serde(default, alias = "cr", alias = "creator", deserialize_with = "lenient::text")]
    pub creator_address: Option<String>,
    /// Launch venue.
    #[serde(default, alias = "ex", alias = "exchange", deserialize_with = "lenient::text")]
    pub dex: Option<String>,
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// Launch time.
    #[serde(default, alias = "ot", alias = "created_at", deserialize_with = "lenient::timestamp")]
    pub launched_at: Option<DateTime<Utc>>,
}

/// Aggregate chain statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStat {
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// Total pools on the chain.
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_pools: Option<u64>,
    /// Total tokens on the chain.
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_tokens: Option<u64>,
    /// 24h volume in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub total_volume_24h_usd: Option<Decimal>,
    /// Total liquidity in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub total_liquidity_usd: Option<Decimal>,
    /// Pools created in the last 24h.
    #[serde(default, deserialize_with = "lenient::count")]
    pub new_pools_24h: Option<u64>,
    /// Tokens created in the last 24h.
    #[serde(default, deserialize_with = "lenient::count")]
    pub new_tokens_24h: Option<u64>,
    /// Snapshot time.
    #[serde(default, alias = "timestamp", deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Token social links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialInfo {
    /// Token address.
    #[serde(alias = "a", alias = "address")]
    pub token_address: String,
    /// Project website.
    #[serde(default, deserialize_with = "lenient::text")]
    pub website: Option<String>,
    /// Twitter/X handle or URL.
    #[serde(default, deserialize_with = "lenient::text")]
    pub twitter: Option<String>,
    /// Telegram link.
    #[serde(default, deserialize_with = "lenient::text")]
    pub telegram: Option<String>,
    /// Discord invite.
    #[serde(default, deserialize_with = "lenient::text")]
    pub discord: Option<String>,
    /// Source repository.
    #[serde(default, deserialize_with = "lenient::text")]
    pub github: Option<String>,
    /// Free-form description.
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: Option<String>,
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// Update time.
    #[serde(default, alias = "timestamp", deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One trade made by a watched wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInfo {
    /// Transaction hash.
    #[serde(alias = "tx", alias = "hash")]
    pub transaction_hash: String,
    /// Traded token address.
    #[serde(alias = "ta", alias = "a")]
    pub token_address: String,
    /// Trade side.
    #[serde(default, alias = "trade_type", alias = "type")]
    pub side: TradeSide,
    /// Token quantity.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub amount_token: Option<Decimal>,
    /// Trade value in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub amount_usd: Option<Decimal>,
    /// Execution price in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub price_usd: Option<Decimal>,
    /// Execution time.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Trading activity of a watched wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTrade {
    /// Wallet address.
    #[serde(alias = "w", alias = "wallet")]
    pub wallet_address: String,
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// Trades in this update.
    #[serde(default)]
    pub trades: Vec<TradeInfo>,
    /// 24h traded volume in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub total_volume_24h_usd: Option<Decimal>,
    /// Number of trades in the last 24h.
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_trades_24h: Option<u64>,
    /// 24h profit and loss in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub pnl_24h_usd: Option<Decimal>,
    /// Update time.
    #[serde(default, alias = "timestamp", deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Limit order status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderUpdate {
    /// Order identifier.
    #[serde(alias = "oid")]
    pub order_id: String,
    /// Owner wallet.
    #[serde(default, alias = "w", deserialize_with = "lenient::text")]
    pub wallet_address: Option<String>,
    /// Token address.
    #[serde(default, alias = "ta", deserialize_with = "lenient::text")]
    pub token_address: Option<String>,
    /// Order side.
    #[serde(default, alias = "order_type")]
    pub side: TradeSide,
    /// Order quantity in tokens.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub amount_token: Option<Decimal>,
    /// Limit price in USD.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub price_usd: Option<Decimal>,
    /// Filled quantity in tokens.
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub filled_amount: Option<Decimal>,
    /// Order status.
    #[serde(default)]
    pub status: OrderStatus,
    /// Chain identifier.
    #[serde(default, alias = "c", deserialize_with = "lenient::text")]
    pub chain: Option<String>,
    /// Order creation time.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Order expiry time.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Event Payload
// =============================================================================

/// Typed record for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// New liquidity pool.
    PoolCreated(PoolCreated),
    /// Pair price/volume update.
    PairUpdated(PairUpdated),
    /// Newly launched token.
    TokenLaunched(TokenLaunched),
    /// Chain statistics.
    ChainStat(ChainStat),
    /// Token social links.
    SocialInfo(SocialInfo),
    /// Wallet trading activity.
    WalletTrade(WalletTrade),
    /// Limit order update.
    LimitOrderUpdate(LimitOrderUpdate),
}

/// Payload could not be turned into typed events.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// An item failed validation.
    #[error("invalid {channel} payload: {source}")]
    Invalid {
        /// Channel the payload arrived on.
        channel: ChannelName,
        /// Underlying validation error.
        #[source]
        source: serde_json::Error,
    },

    /// Payload is neither an object nor an array of objects.
    #[error("{channel} payload must be an object or an array of objects")]
    Shape {
        /// Channel the payload arrived on.
        channel: ChannelName,
    },
}

impl EventPayload {
    /// Parse every item of a channel payload.
    ///
    /// An empty array yields no events.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the payload has the wrong shape or any
    /// item fails validation.
    pub fn parse(channel: ChannelName, payload: &Value) -> Result<Vec<Self>, PayloadError> {
        let items = flatten_items(channel, payload)?;
        items
            .iter()
            .map(|item| Self::parse_item(channel, item))
            .collect()
    }

    fn parse_item(channel: ChannelName, item: &Value) -> Result<Self, PayloadError> {
        let invalid = |source| PayloadError::Invalid { channel, source };
        Ok(match channel {
            ChannelName::PoolCreation => {
                Self::PoolCreated(PoolCreated::deserialize(item).map_err(invalid)?)
            }
            ChannelName::PairUpdate => {
                Self::PairUpdated(PairUpdated::deserialize(item).map_err(invalid)?)
            }
            ChannelName::TokenLaunch => {
                Self::TokenLaunched(TokenLaunched::deserialize(item).map_err(invalid)?)
            }
            ChannelName::ChainStat => Self::ChainStat(ChainStat::deserialize(item).map_err(invalid)?),
            ChannelName::SocialInfo => {
                Self::SocialInfo(SocialInfo::deserialize(item).map_err(invalid)?)
            }
            ChannelName::WalletTrade => {
                Self::WalletTrade(WalletTrade::deserialize(item).map_err(invalid)?)
            }
            ChannelName::LimitOrder => {
                Self::LimitOrderUpdate(LimitOrderUpdate::deserialize(item).map_err(invalid)?)
            }
        })
    }

    /// Channel this payload belongs to.
    #[must_use]
    pub const fn channel(&self) -> ChannelName {
        match self {
            Self::PoolCreated(_) => ChannelName::PoolCreation,
            Self::PairUpdated(_) => ChannelName::PairUpdate,
            Self::TokenLaunched(_) => ChannelName::TokenLaunch,
            Self::ChainStat(_) => ChannelName::ChainStat,
            Self::SocialInfo(_) => ChannelName::SocialInfo,
            Self::WalletTrade(_) => ChannelName::WalletTrade,
            Self::LimitOrderUpdate(_) => ChannelName::LimitOrder,
        }
    }

    /// Token address the record is about, if any.
    #[must_use]
    pub fn token_address(&self) -> Option<&str> {
        match self {
            Self::PoolCreated(p) => p
                .token_address
                .as_deref()
                .or(p.base_token_address.as_deref())
                .or_else(|| p.token.as_ref().and_then(|t| t.address.as_deref())),
            Self::PairUpdated(p) => p.token_address.as_deref(),
            Self::TokenLaunched(t) => Some(&t.token_address),
            Self::SocialInfo(s) => Some(&s.token_address),
            Self::LimitOrderUpdate(o) => o.token_address.as_deref(),
            Self::WalletTrade(w) => w.trades.first().map(|t| t.token_address.as_str()),
            Self::ChainStat(_) => None,
        }
    }

    /// Token symbol, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::PoolCreated(p) => p.token.as_ref().and_then(|t| t.symbol.as_deref()),
            Self::PairUpdated(p) => p.symbol.as_deref(),
            Self::TokenLaunched(t) => t.symbol.as_deref(),
            _ => None,
        }
    }

    /// Market capitalization in USD, if any.
    #[must_use]
    pub fn market_cap_usd(&self) -> Option<Decimal> {
        match self {
            Self::PoolCreated(p) => p
                .market_cap_usd
                .or_else(|| p.token.as_ref().and_then(|t| t.market_cap_usd)),
            Self::PairUpdated(p) => p.market_cap_usd,
            Self::TokenLaunched(t) => t.market_cap_usd,
            _ => None,
        }
    }

    /// Liquidity in USD, if any.
    #[must_use]
    pub fn liquidity_usd(&self) -> Option<Decimal> {
        match self {
            Self::PoolCreated(p) => p
                .initial_liquidity_usd
                .or_else(|| p.token.as_ref().and_then(|t| t.liquidity_usd)),
            Self::PairUpdated(p) => p.liquidity_usd,
            Self::TokenLaunched(t) => t.liquidity_usd,
            Self::ChainStat(c) => c.total_liquidity_usd,
            _ => None,
        }
    }

    /// 24h volume in USD, if any.
    #[must_use]
    pub fn volume_24h_usd(&self) -> Option<Decimal> {
        match self {
            Self::PoolCreated(p) => p.token.as_ref().and_then(|t| t.volume_24h_usd),
            Self::PairUpdated(p) => p.volume_24h_usd,
            Self::TokenLaunched(t) => t.volume_24h_usd,
            Self::ChainStat(c) => c.total_volume_24h_usd,
            Self::WalletTrade(w) => w.total_volume_24h_usd,
            _ => None,
        }
    }

    /// Holder count, if any.
    #[must_use]
    pub fn holder_count(&self) -> Option<u64> {
        match self {
            Self::PoolCreated(p) => p.token.as_ref().and_then(|t| t.holder_count),
            Self::PairUpdated(p) => p.holder_count,
            Self::TokenLaunched(t) => t.holder_count,
            _ => None,
        }
    }

    /// Exchange/DEX name, if any.
    #[must_use]
    pub fn exchange(&self) -> Option<&str> {
        match self {
            Self::PoolCreated(p) => p.dex.as_deref(),
            Self::PairUpdated(p) => p.dex.as_deref(),
            Self::TokenLaunched(t) => t.dex.as_deref(),
            _ => None,
        }
    }
}

/// Split a payload into per-record objects, flattening pool batches.
fn flatten_items(channel: ChannelName, payload: &Value) -> Result<Vec<Value>, PayloadError> {
    let mut items = Vec::new();
    match payload {
        Value::Array(entries) => {
            for entry in entries {
                push_item(channel, entry, &mut items)?;
            }
        }
        Value::Object(_) => push_item(channel, payload, &mut items)?,
        _ => return Err(PayloadError::Shape { channel }),
    }
    Ok(items)
}

fn push_item(channel: ChannelName, entry: &Value, items: &mut Vec<Value>) -> Result<(), PayloadError> {
    let Value::Object(map) = entry else {
        return Err(PayloadError::Shape { channel });
    };
    match map.get("p") {
        Some(Value::Array(records)) if channel == ChannelName::PoolCreation => {
            let batch_chain = map.get("c").or_else(|| map.get("chain"));
            for record in records {
                let Value::Object(fields) = record else {
                    return Err(PayloadError::Shape { channel });
                };
                items.push(Value::Object(with_chain(fields, batch_chain)));
            }
        }
        _ => items.push(entry.clone()),
    }
    Ok(())
}

fn with_chain(fields: &Map<String, Value>, chain: Option<&Value>) -> Map<String, Value> {
    let mut fields = fields.clone();
    let has_chain = fields.contains_key("c") || fields.contains_key("chain");
    if let (Some(chain), false) = (chain, has_chain) {
        fields.insert("chain".to_string(), chain.clone());
    }
    fields
}

// =============================================================================
// Envelope
// =============================================================================

/// A decoded inbound unit, not yet typed. Lives for one dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Channel named by the frame.
    pub channel: ChannelName,
    /// Raw payload (`data` field, or the whole frame when absent).
    pub payload: Value,
    /// Sequence token, when the frame carried one.
    pub sequence: Option<String>,
    /// Receive time.
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// Feed Event
// =============================================================================

/// A typed event plus the envelope metadata it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEvent {
    /// Channel the event arrived on.
    pub channel: ChannelName,
    /// Sequence token of the source envelope, when the feed sent one.
    pub sequence: Option<String>,
    /// Time the source frame was received.
    pub received_at: DateTime<Utc>,
    /// Set when the source envelope's sequence token was already seen.
    pub duplicate: bool,
    /// Typed record.
    pub payload: EventPayload,
}

impl FeedEvent {
    /// Token address the event is about, if any.
    #[must_use]
    pub fn token_address(&self) -> Option<&str> {
        self.payload.token_address()
    }
}

// =============================================================================
// Tests
// =============================================================================
