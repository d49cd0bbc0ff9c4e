//! Cache Strategies - TTLs and Keys per Data Category
//!
//! Each kind of dashboard data has a fixed freshness budget. Handlers pick a
//! [`CacheStrategy`] and build their key with the matching function below, so
//! pattern clears such as `chart_AAPL_*` line up with what was written.

use serde::Serialize;
use std::time::Duration;

/// Chart lookback window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChartPeriod {
    #[default]
    FiveDays,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl ChartPeriod {
    /// Parse a period code; unknown codes fall back to five days
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "1mo" => Self::OneMonth,
            "3mo" => Self::ThreeMonths,
            "6mo" => Self::SixMonths,
            "1y" => Self::OneYear,
            _ => Self::FiveDays,
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
        }
    }
}

/// Cache strategies for different data categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Today's hot stock - 5 minutes
    Trending,
    /// Top-N screener lists - 5 minutes
    TopN,
    /// Single stock quote and profile - 5 minutes
    StockDetail,
    /// Headlines for a ticker - 15 minutes
    News,
    /// Price history, longer periods change more slowly
    Chart(ChartPeriod),
    /// A published briefing never changes - 1 hour
    BriefingDetail,
    /// Briefing index pages - 10 minutes
    BriefingList,
    /// Custom TTL
    Custom(Duration),
}

impl CacheStrategy {
    /// Every fixed category, in display order
    pub const CATEGORIES: [Self; 11] = [
        Self::Trending,
        Self::TopN,
        Self::StockDetail,
        Self::News,
        Self::Chart(ChartPeriod::FiveDays),
        Self::Chart(ChartPeriod::OneMonth),
        Self::Chart(ChartPeriod::ThreeMonths),
        Self::Chart(ChartPeriod::SixMonths),
        Self::Chart(ChartPeriod::OneYear),
        Self::BriefingDetail,
        Self::BriefingList,
    ];

    /// Chart strategy for a period code such as `1mo`
    #[must_use]
    pub fn chart(period: &str) -> Self {
        Self::Chart(ChartPeriod::from_code(period))
    }

    /// Convert strategy to duration
    #[must_use]
    pub fn to_duration(&self) -> Duration {
        match self {
            Self::Trending | Self::TopN | Self::StockDetail => Duration::from_secs(300),
            Self::News => Duration::from_secs(900),
            Self::Chart(ChartPeriod::FiveDays) => Duration::from_secs(300),
            Self::Chart(ChartPeriod::OneMonth) => Duration::from_secs(1800),
            Self::Chart(ChartPeriod::ThreeMonths | ChartPeriod::SixMonths | ChartPeriod::OneYear)
            | Self::BriefingDetail => Duration::from_secs(3600),
            Self::BriefingList => Duration::from_secs(600),
            Self::Custom(duration) => *duration,
        }
    }

    /// Category name used in the TTL table
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::TopN => "top_n",
            Self::StockDetail => "stock_detail",
            Self::News => "news",
            Self::Chart(ChartPeriod::FiveDays) => "chart_5d",
            Self::Chart(ChartPeriod::OneMonth) => "chart_1mo",
            Self::Chart(ChartPeriod::ThreeMonths) => "chart_3mo",
            Self::Chart(ChartPeriod::SixMonths) => "chart_6mo",
            Self::Chart(ChartPeriod::OneYear) => "chart_1y",
            Self::BriefingDetail => "briefing_detail",
            Self::BriefingList => "briefing_list",
            Self::Custom(_) => "custom",
        }
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Trending => "Trending stock (5 minutes)",
            Self::TopN => "Top-N stocks (5 minutes)",
            Self::StockDetail => "Stock detail (5 minutes)",
            Self::News => "News (15 minutes)",
            Self::Chart(ChartPeriod::FiveDays) => "5-day chart (5 minutes)",
            Self::Chart(ChartPeriod::OneMonth) => "1-month chart (30 minutes)",
            Self::Chart(ChartPeriod::ThreeMonths) => "3-month chart (1 hour)",
            Self::Chart(ChartPeriod::SixMonths) => "6-month chart (1 hour)",
            Self::Chart(ChartPeriod::OneYear) => "1-year chart (1 hour)",
            Self::BriefingDetail => "Briefing detail (1 hour)",
            Self::BriefingList => "Briefing list (10 minutes)",
            Self::Custom(_) => "Custom TTL",
        }
    }
}

/// One row of the TTL table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TtlEntry {
    pub category: &'static str,
    pub ttl_seconds: u64,
    pub description: &'static str,
}

/// Configured TTL for every data category
#[must_use]
pub fn ttl_table() -> Vec<TtlEntry> {
    CacheStrategy::CATEGORIES
        .iter()
        .map(|strategy| TtlEntry {
            category: strategy.name(),
            ttl_seconds: strategy.to_duration().as_secs(),
            description: strategy.description(),
        })
        .collect()
}

// ===== Cache keys =====

pub const TRENDING_KEY: &str = "trending_stock";

#[must_use]
pub fn top_n_key(kind: &str, count: usize) -> String {
    format!("top_n_stocks_{kind}_{count}")
}

#[must_use]
pub fn news_key(ticker: &str) -> String {
    format!("news_{ticker}")
}

#[must_use]
pub fn stock_detail_key(ticker: &str) -> String {
    format!("stock_detail_{ticker}")
}

#[must_use]
pub fn chart_key(ticker: &str, period: ChartPeriod) -> String {
    format!("chart_{ticker}_{}", period.code())
}

#[must_use]
pub fn briefing_list_key(page: u32, limit: u32) -> String {
    format!("briefing_list_{page}_{limit}")
}

#[must_use]
pub fn briefing_detail_key(date: &str) -> String {
    format!("briefing_detail_{date}")
}
