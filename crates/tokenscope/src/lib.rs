//! Core building blocks for the tokenscope usage tracker.
//!
//! This crate is deliberately free of storage and HTTP-server concerns. It
//! provides the chat provider seam ([`chat::ChatProvider`]) with an Anthropic
//! implementation, token [`chat::Usage`] accounting, and the pure pricing
//! model ([`pricing::RateTable`]) used to turn usage into USD cost.

pub mod anthropic;
pub mod chat;
pub mod error;
pub mod pricing;

pub use anthropic::{Anthropic, AnthropicConfig};
pub use chat::{ChatMessage, ChatProvider, ChatReply, ChatRole, Usage};
pub use error::{PricingError, ProviderError};
pub use pricing::{ModelRates, RateTable};
