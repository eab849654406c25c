//! TCP transport speaking the Zabbix sender protocol
//!
//! One connection per batch: connect, write one request frame, read one
//! response frame, close. The whole exchange is bounded by `timeout`.

use super::protocol::{self, ZabbixCodec};
use super::{EmissionBatch, SendResult, Transport, TransportError};
use crate::config::ReporterConfig;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::trace;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ZabbixSender {
    address: String,
    timeout: Duration,
}

impl ZabbixSender {
    pub fn new(address: impl Into<String>) -> Self {
        ZabbixSender {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &ReporterConfig) -> Self {
        Self::new(config.address())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn exchange(&self, batch: &EmissionBatch) -> SendResult {
        let body = protocol::encode_request(batch)?;
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, ZabbixCodec);
        trace!("Sending {} values ({} bytes) to {}", batch.len(), body.len(), self.address);
        framed.send(body).await?;

        match framed.next().await {
            Some(frame) => protocol::parse_response(&frame?),
            None => Err(TransportError::Protocol(
                "connection closed before response".to_string(),
            )),
        }
    }
}

impl Transport for ZabbixSender {
    fn send<'a>(
        &'a self,
        batch: &'a EmissionBatch,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.exchange(batch))
                .await
                .unwrap_or(Err(TransportError::Timeout))
        })
    }
}
