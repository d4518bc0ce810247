use serde::{Deserialize, Serialize};

/// Incremental pieces of a streaming completion.
///
/// A stream is finite and scoped to one call: zero or more `TextDelta`s,
/// then either `Done` or `Error`. The aggregated [`Completion`](crate::Completion)
/// is delivered separately through the stream's join handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionChunk {
    /// A chunk of generated text.
    TextDelta {
        text: String,
    },

    /// The provider finished generating.
    Done,

    /// The provider reported an error mid-stream.
    Error {
        message: String,
    },
}
