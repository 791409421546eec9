//! Reference `Provider` implementations. These exist to exercise the
//! `Provider` trait end to end, not as an exhaustive vendor matrix — see
//! the crate root docs for the scope decision to ship exactly two.

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAIProvider;
