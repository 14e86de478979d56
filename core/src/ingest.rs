//! Inbound byte pipeline.
//!
//! Order of gates: header decode, expiry, optional header filter, full
//! decode, then dispatch on the envelope type — and for `data`, on the
//! payload's subject. Every failure drops the message with a log line; a bad
//! frame never stops the consumer loop.

use crate::error::EngineError;
use async_trait::async_trait;
use chrono::Utc;
use shingo_wire::{
    bus::BusMessage,
    envelope::{Envelope, EnvelopeHeader},
    kind,
    message::{
        EdgeHeartbeat, EdgeRegister, OrderCancel, OrderReceipt, OrderRedirect, OrderRequest,
        OrderStorageWaybill, ProductionReport,
    },
    subject,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// Per-type entry points the ingestor dispatches to.
///
/// Implementations hand off to their own concurrency primitives if a message
/// needs long work; the ingestor awaits them inline on the consumer task.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_order_request(
        &self,
        envelope: &Envelope,
        request: OrderRequest,
    ) -> Result<(), EngineError>;

    async fn on_order_cancel(
        &self,
        envelope: &Envelope,
        cancel: OrderCancel,
    ) -> Result<(), EngineError>;

    async fn on_order_receipt(
        &self,
        envelope: &Envelope,
        receipt: OrderReceipt,
    ) -> Result<(), EngineError>;

    async fn on_order_redirect(
        &self,
        envelope: &Envelope,
        redirect: OrderRedirect,
    ) -> Result<(), EngineError>;

    async fn on_storage_waybill(
        &self,
        envelope: &Envelope,
        waybill: OrderStorageWaybill,
    ) -> Result<(), EngineError>;

    async fn on_edge_register(
        &self,
        envelope: &Envelope,
        register: EdgeRegister,
    ) -> Result<(), EngineError>;

    async fn on_edge_heartbeat(
        &self,
        envelope: &Envelope,
        heartbeat: EdgeHeartbeat,
    ) -> Result<(), EngineError>;

    async fn on_production_report(
        &self,
        envelope: &Envelope,
        report: ProductionReport,
    ) -> Result<(), EngineError>;
}

type HeaderFilter = Box<dyn Fn(&EnvelopeHeader) -> bool + Send + Sync>;

pub struct Ingestor<H> {
    handler: Arc<H>,
    filter: Option<HeaderFilter>,
}

impl<H> fmt::Debug for Ingestor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<H> Ingestor<H>
where
    H: MessageHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            filter: None,
        }
    }

    /// Install a header predicate; headers it rejects are dropped silently.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&EnvelopeHeader) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Process one raw frame from the bus.
    pub async fn ingest(&self, bytes: &[u8]) {
        let header = match Envelope::decode_header(bytes) {
            Ok(header) => header,
            Err(err) => {
                debug!(%err, "dropping frame: header decode failed");
                return;
            }
        };

        if header.is_expired(Utc::now()) {
            debug!(id = %header.id, kind = %header.kind, "dropping frame: expired");
            return;
        }

        if let Some(filter) = &self.filter {
            if !filter(&header) {
                return;
            }
        }

        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(id = %header.id, %err, "dropping frame: envelope decode failed");
                return;
            }
        };

        self.dispatch(&envelope).await;
    }

    async fn dispatch(&self, envelope: &Envelope) {
        let result = match envelope.kind.as_str() {
            kind::ORDER_REQUEST => match envelope.parse_payload::<OrderRequest>() {
                Ok(request) => self.handler.on_order_request(envelope, request).await,
                Err(err) => return drop_payload(envelope, err),
            },
            kind::ORDER_CANCEL => match envelope.parse_payload::<OrderCancel>() {
                Ok(cancel) => self.handler.on_order_cancel(envelope, cancel).await,
                Err(err) => return drop_payload(envelope, err),
            },
            kind::ORDER_RECEIPT => match envelope.parse_payload::<OrderReceipt>() {
                Ok(receipt) => self.handler.on_order_receipt(envelope, receipt).await,
                Err(err) => return drop_payload(envelope, err),
            },
            kind::ORDER_REDIRECT => match envelope.parse_payload::<OrderRedirect>() {
                Ok(redirect) => self.handler.on_order_redirect(envelope, redirect).await,
                Err(err) => return drop_payload(envelope, err),
            },
            kind::ORDER_STORAGE_WAYBILL => match envelope.parse_payload::<OrderStorageWaybill>() {
                Ok(waybill) => self.handler.on_storage_waybill(envelope, waybill).await,
                Err(err) => return drop_payload(envelope, err),
            },
            kind::DATA => return self.dispatch_data(envelope).await,
            // Includes the legacy top-level `edge.*` envelope types: only the
            // subject-based model is accepted.
            other => {
                debug!(id = %envelope.id, kind = other, "dropping envelope: unknown type");
                return;
            }
        };

        if let Err(err) = result {
            error!(id = %envelope.id, kind = %envelope.kind, %err, "handler failed");
        }
    }

    async fn dispatch_data(&self, envelope: &Envelope) {
        let payload = match envelope.data_payload() {
            Ok(payload) => payload,
            Err(err) => return drop_payload(envelope, err),
        };

        let result = match payload.subject.as_str() {
            subject::EDGE_REGISTER => match serde_json::from_value(payload.data) {
                Ok(register) => self.handler.on_edge_register(envelope, register).await,
                Err(err) => return drop_payload(envelope, err),
            },
            subject::EDGE_HEARTBEAT => match serde_json::from_value(payload.data) {
                Ok(heartbeat) => self.handler.on_edge_heartbeat(envelope, heartbeat).await,
                Err(err) => return drop_payload(envelope, err),
            },
            subject::PRODUCTION_REPORT => match serde_json::from_value(payload.data) {
                Ok(report) => self.handler.on_production_report(envelope, report).await,
                Err(err) => return drop_payload(envelope, err),
            },
            other => {
                debug!(id = %envelope.id, subject = other, "dropping data envelope: unknown subject");
                return;
            }
        };

        if let Err(err) = result {
            error!(id = %envelope.id, subject = %payload.subject, %err, "handler failed");
        }
    }

    /// Consume frames until the channel closes or the stop signal flips.
    pub async fn run(
        &self,
        mut frames: mpsc::UnboundedReceiver<BusMessage>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                frame = frames.recv() => {
                    match frame {
                        Some(frame) => self.ingest(&frame.payload).await,
                        None => break,
                    }
                }
            }
        }
        debug!("ingest loop stopped");
    }
}

fn drop_payload(envelope: &Envelope, err: impl fmt::Display) {
    warn!(id = %envelope.id, kind = %envelope.kind, %err, "dropping envelope: payload decode failed");
}
