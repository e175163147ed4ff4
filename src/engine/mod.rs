pub mod condition;
pub mod confidence;
pub mod demand;
pub mod identify;
pub mod market;
pub mod pricing;
pub mod signals;
pub mod trend;
pub mod types;

pub use market::MarketDataAggregator;
