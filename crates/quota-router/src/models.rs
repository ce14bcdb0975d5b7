//! Model fallback chain
//!
//! Models are interchangeable for the caller but carry very different free-tier
//! daily allowances. The chain is ordered by allowance, largest first, so the
//! scarce models are only touched once the plentiful ones are gone.

use crate::error::{Error, Result};

/// Default chain, highest daily allowance first.
pub const DEFAULT_MODEL_CHAIN: &[&str] = &[
    // ~1,500 requests/day on the free tier
    "gemini-2.0-flash-lite",
    // ~1,500 requests/day
    "gemini-2.0-flash",
    // preview, ~50 requests/day: last resort
    "gemini-2.5-flash",
];

/// Ordered, non-empty list of model identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChain(Vec<String>);

impl ModelChain {
    /// Build a chain from caller-supplied ids, keeping their order.
    ///
    /// Blank ids are dropped and repeated ids keep their first position.
    pub fn new<I, S>(models: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut chain: Vec<String> = Vec::new();
        for model in models {
            let model = model.into().trim().to_owned();
            if !model.is_empty() && !chain.contains(&model) {
                chain.push(model);
            }
        }
        if chain.is_empty() {
            return Err(Error::Configuration("model chain is empty".into()));
        }
        Ok(Self(chain))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

}

impl Default for ModelChain {
    fn default() -> Self {
        Self(DEFAULT_MODEL_CHAIN.iter().map(|m| m.to_string()).collect())
    }
}
