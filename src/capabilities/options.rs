//! Options data capability
//!
//! Equity brokers may or may not carry an options feed. The nullable
//! implementation reports `NOT_SUPPORTED` so policy checks can degrade
//! instead of failing.

use crate::error::{Result, SwarmError};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionRight {
    Call,
    Put,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub underlying: String,
    pub expiration: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub underlying: String,
    pub contracts: Vec<OptionContract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSnapshot {
    pub contract: OptionContract,
    pub last_price: Option<Decimal>,
    pub delta: Option<Decimal>,
    pub open_interest: Option<u64>,
}

#[async_trait]
pub trait OptionsData: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn get_expirations(&self, underlying: &str) -> Result<Vec<NaiveDate>>;
    async fn get_chain(&self, underlying: &str, expiration: NaiveDate) -> Result<OptionChain>;
    async fn get_snapshot(&self, contract_symbol: &str) -> Result<OptionSnapshot>;
    async fn get_snapshots(&self, contract_symbols: &[String]) -> Result<Vec<OptionSnapshot>>;
}

/// Stand-in for brokers without an options feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOptions;

impl NullOptions {
    fn unsupported<T>() -> Result<T> {
        Err(SwarmError::NotSupported("options data not configured".into()))
    }
}

#[async_trait]
impl OptionsData for NullOptions {
    fn is_configured(&self) -> bool {
        false
    }

    async fn get_expirations(&self, _underlying: &str) -> Result<Vec<NaiveDate>> {
        Self::unsupported()
    }

    async fn get_chain(&self, _underlying: &str, _expiration: NaiveDate) -> Result<OptionChain> {
        Self::unsupported()
    }

    async fn get_snapshot(&self, _contract_symbol: &str) -> Result<OptionSnapshot> {
        Self::unsupported()
    }

    async fn get_snapshots(&self, _contract_symbols: &[String]) -> Result<Vec<OptionSnapshot>> {
        Self::unsupported()
    }
}
