//! Log and stats action handlers (spec §4.2 "Logs/stats" group).
//!
//! `stream_container_logs` returns immediately with a `stream_id`; the
//! actual streaming worker runs in the background and emits `log_data`
//! events through the dispatcher's event callback. The wire format is
//! the engine's multiplexed stream: an 8-byte header (byte 0 = stream id,
//! `2` meaning stderr; bytes 4..8 = big-endian payload size) followed by
//! that many payload bytes, repeated.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use flotilla_protocol::{LogChunk, LogStream};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::engine::ContainerEngine;
use crate::error::DispatchError;

pub async fn get_container_logs(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ContainerLogsParams,
) -> Result<serde_json::Value, DispatchError> {
    let raw = engine
        .container_logs(&params.container_id, params.tail, params.since)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    let chunks = parse_multiplexed_frames(&raw);
    let rendered: Vec<_> = chunks
        .into_iter()
        .map(|c| {
            serde_json::json!({
                "data": String::from_utf8_lossy(&c.data).into_owned(),
                "stream": c.stream,
            })
        })
        .collect();
    Ok(serde_json::json!({ "lines": rendered }))
}

/// Demultiplexes a buffer produced by the engine's log API. If the final
/// header is truncated (partial frame at the end of the buffer), the
/// remaining bytes are emitted as a single `stdout` chunk rather than
/// dropped.
pub fn parse_multiplexed_frames(buf: &[u8]) -> Vec<LogChunk> {
    let mut chunks = Vec::new();
    let mut cursor = BytesMut::from(buf);

    while !cursor.is_empty() {
        if cursor.len() < 8 {
            chunks.push(LogChunk { data: cursor.to_vec(), stream: LogStream::Stdout });
            break;
        }
        let stream_byte = cursor[0];
        let size = u32::from_be_bytes([cursor[4], cursor[5], cursor[6], cursor[7]]) as usize;
        if cursor.len() < 8 + size {
            let remaining = cursor.split_off(0);
            chunks.push(LogChunk { data: remaining.to_vec(), stream: LogStream::Stdout });
            break;
        }
        cursor.advance(8);
        let payload = cursor.split_to(size);
        let stream = if stream_byte == 2 { LogStream::Stderr } else { LogStream::Stdout };
        chunks.push(LogChunk { data: payload.to_vec(), stream });
    }

    chunks
}

pub async fn stream_container_logs(
    engine: Arc<dyn ContainerEngine>,
    params: flotilla_protocol::ContainerIdParams,
    emit: Arc<dyn Fn(String, Bytes, LogStream) + Send + Sync>,
) -> Result<serde_json::Value, DispatchError> {
    let stream_id = Uuid::new_v4().to_string();
    let container_id = params.container_id.clone();
    let mut byte_stream = engine
        .stream_container_logs(&container_id)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;

    tokio::spawn(async move {
        let mut pending = BytesMut::new();
        while let Some(chunk) = byte_stream.next().await {
            let Ok(bytes) = chunk else { break };
            pending.extend_from_slice(&bytes);
            let frames = parse_multiplexed_frames(&pending);
            pending.clear();
            for frame in frames {
                emit(container_id.clone(), Bytes::from(frame.data), frame.stream);
            }
        }
    });

    Ok(serde_json::json!({ "stream_id": stream_id }))
}

pub async fn get_container_stats(
    engine: &dyn ContainerEngine,
    params: flotilla_protocol::ContainerIdParams,
) -> Result<serde_json::Value, DispatchError> {
    let stats = engine
        .container_stats(&params.container_id)
        .await
        .map_err(|e| DispatchError::Engine(e.to_string()))?;
    Ok(serde_json::json!({
        "cpu_total_usage": stats.cpu_total_usage,
        "cpu_system_usage": stats.cpu_system_usage,
        "online_cpus": stats.online_cpus,
        "memory_usage": stats.memory_usage,
        "memory_limit": stats.memory_limit,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream_byte, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_stdout_and_stderr_frames() {
        let mut buf = frame(1, b"hello ");
        buf.extend(frame(2, b"oops"));
        let chunks = parse_multiplexed_frames(&buf);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].data, b"hello ");
        assert!(matches!(chunks[0].stream, LogStream::Stdout));
        assert_eq!(chunks[1].data, b"oops");
        assert!(matches!(chunks[1].stream, LogStream::Stderr));
    }

    #[test]
    fn incomplete_trailing_header_is_emitted_as_stdout() {
        let mut buf = frame(1, b"complete");
        buf.extend_from_slice(&[1, 0, 0, 0, 0, 0]);
        let chunks = parse_multiplexed_frames(&buf);
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1].stream, LogStream::Stdout));
    }

    #[test]
    fn empty_buffer_produces_no_chunks() {
        assert!(parse_multiplexed_frames(&[]).is_empty());
    }
}
