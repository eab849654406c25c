//! Zabbix sender protocol
//!
//! Frame layout:
//!
//! ```text
//! +--------+------+-------------+-------------+------------------+
//! | "ZBXD" | 0x01 | len (u32 LE)| reserved u32| JSON body (len)  |
//! +--------+------+-------------+-------------+------------------+
//! ```
//!
//! Request body: `{"request":"sender data","data":[...],"clock":ts}`.
//! Response body: `{"response":"success","info":"processed: P; failed: F; total: T; seconds spent: S"}`.

use super::{EmissionBatch, EmissionRecord, SendSummary, TransportError};
use crate::metrics::Timestamp;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: &[u8; 4] = b"ZBXD";
pub const FLAG_PROTOCOL: u8 = 0x01;
const FLAG_COMPRESSED: u8 = 0x02;
pub const HEADER_LEN: usize = 13;

/// Largest body we are willing to buffer
pub const MAX_FRAME_LEN: usize = 128 * 1024 * 1024;

#[derive(Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: &'a [EmissionRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    clock: Option<Timestamp>,
}

#[derive(Deserialize)]
struct SenderResponse {
    response: String,
    #[serde(default)]
    info: Option<String>,
}

/// Serialize a batch into a request body
pub fn encode_request(batch: &EmissionBatch) -> Result<Bytes, TransportError> {
    let request = SenderRequest {
        request: "sender data",
        data: &batch.records,
        clock: batch.timestamp,
    };
    serde_json::to_vec(&request)
        .map(Bytes::from)
        .map_err(|e| TransportError::Protocol(format!("cannot encode request: {}", e)))
}

/// Interpret a response body
pub fn parse_response(body: &[u8]) -> Result<SendSummary, TransportError> {
    let response: SenderResponse = serde_json::from_slice(body)
        .map_err(|e| TransportError::Protocol(format!("malformed response: {}", e)))?;

    if response.response != "success" {
        return Err(TransportError::Protocol(format!(
            "collector answered {:?}: {}",
            response.response,
            response.info.unwrap_or_default()
        )));
    }

    let info = response
        .info
        .ok_or_else(|| TransportError::Protocol("response without info".to_string()))?;
    parse_info(&info)
        .ok_or_else(|| TransportError::Protocol(format!("unrecognized info: {:?}", info)))
}

/// Parse `processed: 1; failed: 0; total: 1; seconds spent: 0.000055`
pub fn parse_info(info: &str) -> Option<SendSummary> {
    let mut summary = SendSummary::default();
    let mut seen_total = false;

    for part in info.split(';') {
        let (name, value) = part.split_once(':')?;
        let value = value.trim();
        match name.trim() {
            "processed" => summary.processed = value.parse().ok()?,
            "failed" => summary.failed = value.parse().ok()?,
            "total" => {
                summary.total = value.parse().ok()?;
                seen_total = true;
            }
            "seconds spent" => summary.seconds_spent = value.parse().ok()?,
            _ => {}
        }
    }

    seen_total.then_some(summary)
}

/// Length-prefixed framing for sender requests and responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ZabbixCodec;

impl Encoder<Bytes> for ZabbixCodec {
    type Error = TransportError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if body.len() > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "request of {} bytes exceeds frame limit",
                body.len()
            )));
        }
        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(MAGIC);
        dst.put_u8(FLAG_PROTOCOL);
        dst.put_u32_le(body.len() as u32);
        dst.put_u32_le(0);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for ZabbixCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        if &src[..4] != MAGIC {
            return Err(TransportError::Protocol("missing ZBXD header".to_string()));
        }
        let flags = src[4];
        if flags & FLAG_COMPRESSED != 0 {
            return Err(TransportError::Protocol("compressed frames are not supported".to_string()));
        }

        let len = u32::from_le_bytes([src[5], src[6], src[7], src[8]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "response of {} bytes exceeds frame limit",
                len
            )));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}
