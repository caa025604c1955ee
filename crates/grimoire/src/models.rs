//! These models represent the objects passed between the orchestration loop and the LLM API
//!
//! Messages and tool calls follow the chat-completion wire format closely, since the
//! conversation log is replayed to the provider verbatim on every turn. The request and
//! response envelopes live in `completion`.
pub mod completion;
pub mod message;
pub mod tool;

use serde::{Deserialize, Deserializer};

/// Deserialize an explicit `null` the same way as a missing field. Pair it with
/// `#[serde(default)]` so that both shapes end up as `T::default()`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
