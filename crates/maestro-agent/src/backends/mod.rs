//! Provider backends implementing [`CompletionClient`](crate::CompletionClient).

pub mod claude;
pub mod echo;
pub mod openai;

use crate::stream::CompletionChunk;
use maestro_core::{MaestroError, MaestroResult};
use tokio::sync::mpsc;

/// Split buffered SSE bytes into complete `data:` payloads, leaving any
/// partial trailing line in `buffer`.
///
/// Lines are decoded only once their `\n` has arrived, so a multi-byte
/// character split across network chunks is reassembled before decoding.
pub(crate) fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=line_end).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();

        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            payloads.push(data.trim_start().to_string());
        }
    }
    payloads
}

/// Forward a chunk to the consumer. A closed channel means the caller gave
/// up on the completion, so the stream task must stop reading.
pub(crate) async fn forward(
    tx: &mpsc::Sender<CompletionChunk>,
    chunk: CompletionChunk,
) -> MaestroResult<()> {
    tx.send(chunk).await.map_err(|_| MaestroError::Cancelled)
}
