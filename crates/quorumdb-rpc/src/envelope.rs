use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use quorumdb_core::{QuorumError, QuorumResult};

/// A single call on the wire. One-way calls share this shape; the receiver
/// simply never writes a reply `Envelope` back for them (§4.4).
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub method: String,
    pub request_id: u64,
    pub payload: serde_json::Value,
}

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> QuorumResult<()> {
    let body = serde_json::to_vec(envelope)
        .map_err(|e| QuorumError::Internal(format!("envelope encode failed: {e}")))?;
    let len = u32::try_from(body.len())
        .map_err(|_| QuorumError::Internal("envelope too large to frame".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| QuorumError::Unreachable(e.to_string()))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| QuorumError::Unreachable(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| QuorumError::Unreachable(e.to_string()))
}

pub async fn read_envelope<R: AsyncReadExt + Unpin>(reader: &mut R) -> QuorumResult<Envelope> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| QuorumError::Unreachable(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(QuorumError::Internal(format!("frame of {len} bytes exceeds limit")));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| QuorumError::Unreachable(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| QuorumError::Internal(format!("envelope decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_an_in_memory_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let sent = Envelope {
            method: "ping".into(),
            request_id: 7,
            payload: serde_json::json!({"ok": true}),
        };
        write_envelope(&mut client, &sent).await.unwrap();
        let received = read_envelope(&mut server).await.unwrap();
        assert_eq!(received.method, "ping");
        assert_eq!(received.request_id, 7);
        assert_eq!(received.payload, serde_json::json!({"ok": true}));
    }
}
