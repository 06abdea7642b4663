//! Channel Identity
//!
//! A channel is a named category of streamed events plus a parameter bag.
//! Two channels are the same subscription when both the name and the
//! canonical parameter bag are equal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default chain for channels that take a `chain` parameter.
pub const DEFAULT_CHAIN: &str = "sol";

/// Parameter key for the chain identifier.
pub const PARAM_CHAIN: &str = "chain";

/// Parameter key for the wallet address list.
pub const PARAM_ADDRESSES: &str = "addresses";

// =============================================================================
// Channel Name
// =============================================================================

/// Named category of streamed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelName {
    /// New liquidity pools.
    PoolCreation,
    /// Price/volume updates for trading pairs.
    PairUpdate,
    /// Newly launched tokens.
    TokenLaunch,
    /// Aggregate chain statistics.
    ChainStat,
    /// Token social media links.
    SocialInfo,
    /// Trades made by watched wallets (authenticated).
    WalletTrade,
    /// Limit order updates (authenticated).
    LimitOrder,
}

impl ChannelName {
    /// All channel names in catalogue order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::PoolCreation,
            Self::PairUpdate,
            Self::TokenLaunch,
            Self::ChainStat,
            Self::SocialInfo,
            Self::WalletTrade,
            Self::LimitOrder,
        ]
    }

    /// Channel name as used on the wire.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::PoolCreation => "new_pool_info",
            Self::PairUpdate => "new_pair_update",
            Self::TokenLaunch => "new_launched_info",
            Self::ChainStat => "chain_stat",
            Self::SocialInfo => "token_social_info",
            Self::WalletTrade => "wallet_trade_data",
            Self::LimitOrder => "limit_order_info",
        }
    }

    /// Resolve a wire channel name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.wire_name() == name)
    }

    /// Human-facing name, also used as a metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoolCreation => "pool-creation",
            Self::PairUpdate => "pair-update",
            Self::TokenLaunch => "token-launch",
            Self::ChainStat => "chain-stat",
            Self::SocialInfo => "social-info",
            Self::WalletTrade => "wallet-trade",
            Self::LimitOrder => "limit-order",
        }
    }

    /// Whether subscribing requires an access token.
    #[must_use]
    pub const fn requires_token(self) -> bool {
        matches!(self, Self::WalletTrade | Self::LimitOrder)
    }

    /// Whether events on this channel carry per-token market metrics.
    #[must_use]
    pub const fn carries_token_metrics(self) -> bool {
        matches!(
            self,
            Self::PoolCreation | Self::PairUpdate | Self::TokenLaunch
        )
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelName {
    type Err = UnknownChannelName;

    /// Accepts either the kebab-case name or the wire name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(trimmed) || c.wire_name() == trimmed)
            .ok_or_else(|| UnknownChannelName(trimmed.to_string()))
    }
}

/// Error returned when parsing an unrecognized channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel name: {0}")]
pub struct UnknownChannelName(pub String);

// =============================================================================
// Channel Parameters
// =============================================================================

/// Canonical parameter bag.
///
/// Keys are kept sorted so two bags built in different orders compare and
/// hash identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelParams(BTreeMap<String, String>);

impl ChannelParams {
    /// Empty parameter bag.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a parameter, replacing any earlier value for the same key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0
            .insert(key.into().trim().to_ascii_lowercase(), value.into().trim().to_string());
        self
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the bag has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate parameters in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ChannelParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

// =============================================================================
// Channel
// =============================================================================

/// A subscribable channel: name plus canonical parameters.
///
/// Immutable once created. Subscribing with different parameters creates a
/// different channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel {
    name: ChannelName,
    params: ChannelParams,
}

impl Channel {
    /// Create a channel from a name and parameters.
    #[must_use]
    pub const fn new(name: ChannelName, params: ChannelParams) -> Self {
        Self { name, params }
    }

    /// Channel with only a `chain` parameter.
    #[must_use]
    pub fn on_chain(name: ChannelName, chain: &str) -> Self {
        Self::new(name, ChannelParams::new().with(PARAM_CHAIN, chain))
    }

    /// New pool creation channel.
    #[must_use]
    pub fn pool_creation(chain: &str) -> Self {
        Self::on_chain(ChannelName::PoolCreation, chain)
    }

    /// Pair update channel.
    #[must_use]
    pub fn pair_update(chain: &str) -> Self {
        Self::on_chain(ChannelName::PairUpdate, chain)
    }

    /// Token launch channel.
    #[must_use]
    pub fn token_launch(chain: &str) -> Self {
        Self::on_chain(ChannelName::TokenLaunch, chain)
    }

    /// Chain statistics channel.
    #[must_use]
    pub fn chain_stat(chain: &str) -> Self {
        Self::on_chain(ChannelName::ChainStat, chain)
    }

    /// Token social info channel.
    #[must_use]
    pub fn social_info(chain: &str) -> Self {
        Self::on_chain(ChannelName::SocialInfo, chain)
    }

    /// Wallet trade channel for one wallet.
    #[must_use]
    pub fn wallet_trade(chain: &str, wallet: &str) -> Self {
        Self::new(
            ChannelName::WalletTrade,
            ChannelParams::new()
                .with(PARAM_CHAIN, chain)
                .with(PARAM_ADDRESSES, wallet),
        )
    }

    /// Limit order channel.
    #[must_use]
    pub fn limit_order(chain: &str) -> Self {
        Self::on_chain(ChannelName::LimitOrder, chain)
    }

    /// Channel name.
    #[must_use]
    pub const fn name(&self) -> ChannelName {
        self.name
    }

    /// Canonical parameters.
    #[must_use]
    pub const fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Whether subscribing requires an access token.
    #[must_use]
    pub const fn requires_token(&self) -> bool {
        self.name.requires_token()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.params)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use test_case::test_case;

    use super::*;

    #[test_case(ChannelName::PoolCreation, "new_pool_info")]
    #[test_case(ChannelName::PairUpdate, "new_pair_update")]
    #[test_case(ChannelName::TokenLaunch, "new_launched_info")]
    #[test_case(ChannelName::ChainStat, "chain_stat")]
    #[test_case(ChannelName::SocialInfo, "token_social_info")]
    #[test_case(ChannelName::WalletTrade, "wallet_trade_data")]
    #[test_case(ChannelName::LimitOrder, "limit_order_info")]
    fn wire_names_resolve_both_ways(name: ChannelName, wire: &str) {
        assert_eq!(name.wire_name(), wire);
        assert_eq!(ChannelName::from_wire(wire), Some(name));
    }

    #[test]
    fn unknown_wire_name_is_none() {
        assert_eq!(ChannelName::from_wire("new_thing"), None);
    }

    #[test]
    fn parse_accepts_kebab_and_wire_names() {
        assert_eq!(
            "pool-creation".parse::<ChannelName>().unwrap(),
            ChannelName::PoolCreation
        );
        assert_eq!(
            "wallet_trade_data".parse::<ChannelName>().unwrap(),
            ChannelName::WalletTrade
        );
        assert!("nope".parse::<ChannelName>().is_err());
    }

    #[test]
    fn only_wallet_and_order_channels_need_tokens() {
        let needing: Vec<_> = ChannelName::all()
            .iter()
            .filter(|c| c.requires_token())
            .collect();
        assert_eq!(
            needing,
            vec![&ChannelName::WalletTrade, &ChannelName::LimitOrder]
        );
    }

    #[test]
    fn params_are_order_independent() {
        let a = ChannelParams::new().with("chain", "sol").with("addresses", "w1");
        let b = ChannelParams::new().with("addresses", "w1").with("chain", "sol");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(Channel::new(ChannelName::WalletTrade, a));
        set.insert(Channel::new(ChannelName::WalletTrade, b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn params_normalize_key_case_and_whitespace() {
        let a = ChannelParams::new().with(" Chain ", " sol ");
        assert_eq!(a.get("chain"), Some("sol"));
    }

    #[test]
    fn different_params_are_different_channels() {
        assert_ne!(Channel::pool_creation("sol"), Channel::pool_creation("eth"));
    }

    #[test]
    fn display_includes_params() {
        assert_eq!(
            Channel::wallet_trade("sol", "abc").to_string(),
            "wallet-trade[addresses=abc,chain=sol]"
        );
        assert_eq!(
            Channel::new(ChannelName::LimitOrder, ChannelParams::new()).to_string(),
            "limit-order"
        );
    }
}
