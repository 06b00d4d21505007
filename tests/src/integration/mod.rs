//! Cross-component flows driven through the `BftApi` facade.

#[cfg(test)]
mod fixtures;

pub mod finality_flows;
