//! Capability interfaces consumed by the core.
//!
//! Provider-specific adapters live outside this crate; the core sees
//! only these traits. Each has an in-process implementation so the
//! whole swarm runs and tests end-to-end without external services.

pub mod blob;
pub mod broker;
pub mod kv;
pub mod llm;
pub mod market_data;
pub mod news;
pub mod options;
pub mod paper;

pub use blob::{BlobStore, MemoryBlobStore};
pub use broker::{
    Account, Asset, AssetClass, Broker, BrokerOrder, CalendarDay, MarketClock, OrderRequest,
    OrderSide, OrderStatus, OrderType, PortfolioHistory, Position, TimeInForce,
};
pub use kv::{KvStore, MemoryKv};
pub use llm::{LlmClient, LlmMessage, LlmRequest, LlmResponse, LlmUsage, NullLlm, ScriptedLlm};
pub use market_data::{Bar, MarketData, Quote, Snapshot, StaticMarketData};
pub use news::{NewsFeed, NewsItem, StaticNewsFeed};
pub use options::{
    NullOptions, OptionChain, OptionContract, OptionRight, OptionSnapshot, OptionsData,
};
pub use paper::PaperBroker;
