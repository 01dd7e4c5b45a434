//! Cross-crate scenarios exercising the dispatcher end to end.

pub mod properties;
pub mod trading_flows;
