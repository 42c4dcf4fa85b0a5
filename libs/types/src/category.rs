//! Message categories and subscription topics
//!
//! Public categories carry market data and are delivered to explicit
//! subscribers. Private categories carry account events and are delivered
//! to authenticated sessions of the owning account only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypeError;
use crate::pair::Pair;

/// Whether a category is market data or an account event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Public,
    Private,
}

/// Closed set of message categories
///
/// Declaration order is the canonical listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    // Public
    Depth,
    Ticker,
    Index,
    Ohlcv,
    Match,
    Trades,
    Liquidation,

    // Private
    OrderAdded,
    OrderCancelled,
    OrderTriggered,
    OrderPartiallyCompleted,
    OrderCompleted,
    TriggerAdded,
    TriggerCancelled,
    TriggerFailed,
    DepositAdded,
    DepositCompleted,
    WithdrawalAdded,
    WithdrawalCompleted,
    PositionUpdated,
    PositionClosed,
}

impl Category {
    pub const PUBLIC: [Category; 7] = [
        Category::Depth,
        Category::Ticker,
        Category::Index,
        Category::Ohlcv,
        Category::Match,
        Category::Trades,
        Category::Liquidation,
    ];

    pub const PRIVATE: [Category; 14] = [
        Category::OrderAdded,
        Category::OrderCancelled,
        Category::OrderTriggered,
        Category::OrderPartiallyCompleted,
        Category::OrderCompleted,
        Category::TriggerAdded,
        Category::TriggerCancelled,
        Category::TriggerFailed,
        Category::DepositAdded,
        Category::DepositCompleted,
        Category::WithdrawalAdded,
        Category::WithdrawalCompleted,
        Category::PositionUpdated,
        Category::PositionClosed,
    ];

    pub fn kind(&self) -> CategoryKind {
        match self {
            Category::Depth
            | Category::Ticker
            | Category::Index
            | Category::Ohlcv
            | Category::Match
            | Category::Trades
            | Category::Liquidation => CategoryKind::Public,
            _ => CategoryKind::Private,
        }
    }

    pub fn is_public(&self) -> bool {
        self.kind() == CategoryKind::Public
    }

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Depth => "depth",
            Category::Ticker => "ticker",
            Category::Index => "index",
            Category::Ohlcv => "ohlcv",
            Category::Match => "match",
            Category::Trades => "trades",
            Category::Liquidation => "liquidation",
            Category::OrderAdded => "order_added",
            Category::OrderCancelled => "order_cancelled",
            Category::OrderTriggered => "order_triggered",
            Category::OrderPartiallyCompleted => "order_partially_completed",
            Category::OrderCompleted => "order_completed",
            Category::TriggerAdded => "trigger_added",
            Category::TriggerCancelled => "trigger_cancelled",
            Category::TriggerFailed => "trigger_failed",
            Category::DepositAdded => "deposit_added",
            Category::DepositCompleted => "deposit_completed",
            Category::WithdrawalAdded => "withdrawal_added",
            Category::WithdrawalCompleted => "withdrawal_completed",
            Category::PositionUpdated => "position_updated",
            Category::PositionClosed => "position_closed",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::PUBLIC
            .iter()
            .chain(Category::PRIVATE.iter())
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| TypeError::UnknownCategory(s.to_string()))
    }
}

/// What part of a pair a subscription covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicFilter {
    Category(Category),
    /// Every category of the pair (`sub_pair`)
    AllCategories,
}

/// Addressable subscription unit: a pair plus a category or the pair wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    pub pair: Pair,
    pub filter: TopicFilter,
}

impl Topic {
    pub fn new(pair: Pair, category: Category) -> Self {
        Self {
            pair,
            filter: TopicFilter::Category(category),
        }
    }

    pub fn wildcard(pair: Pair) -> Self {
        Self {
            pair,
            filter: TopicFilter::AllCategories,
        }
    }

    /// Render a concrete topic as `"<pair>:<category>"`.
    pub fn render(pair: &Pair, category: Category) -> String {
        format!("{}:{}", pair, category)
    }

    /// Split `"<pair>:<category>"` into its raw parts without validating them.
    pub fn split_raw(raw: &str) -> Result<(&str, &str), TypeError> {
        raw.split_once(':')
            .filter(|(pair, category)| !pair.is_empty() && !category.is_empty())
            .ok_or_else(|| TypeError::MalformedTopic(raw.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.filter {
            TopicFilter::Category(category) => write!(f, "{}:{}", self.pair, category),
            TopicFilter::AllCategories => write!(f, "{}:*", self.pair),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_kinds() {
        assert!(Category::PUBLIC.iter().all(|c| c.is_public()));
        assert!(Category::PRIVATE.iter().all(|c| !c.is_public()));
        assert_eq!(Category::OrderAdded.kind(), CategoryKind::Private);
    }

    #[test]
    fn test_category_from_str_matches_serde() {
        for category in Category::PUBLIC.iter().chain(Category::PRIVATE.iter()) {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, *category);
            let json = serde_json::to_string(category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
        assert!("candles".parse::<Category>().is_err());
        assert!("Trades".parse::<Category>().is_err());
    }

    #[test]
    fn test_public_categories_sorted_in_declaration_order() {
        let mut sorted = Category::PUBLIC;
        sorted.sort();
        assert_eq!(sorted, Category::PUBLIC);
    }

    #[test]
    fn test_topic_display() {
        let pair = Pair::parse("BTC_USD_PERP").unwrap();
        assert_eq!(
            Topic::new(pair.clone(), Category::Trades).to_string(),
            "BTC_USD_PERP:trades"
        );
        assert_eq!(Topic::wildcard(pair).to_string(), "BTC_USD_PERP:*");
    }

    #[test]
    fn test_split_raw() {
        assert_eq!(
            Topic::split_raw("ETH_USD_PERP:depth").unwrap(),
            ("ETH_USD_PERP", "depth")
        );
        assert!(Topic::split_raw("ETH_USD_PERP").is_err());
        assert!(Topic::split_raw(":depth").is_err());
        assert!(Topic::split_raw("ETH_USD_PERP:").is_err());
    }
}
