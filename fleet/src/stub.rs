//! In-memory vendor used by tests and bring-up.
//!
//! Tests drive the vendor side of a scenario by flipping per-order states
//! with [`StubFleet::set_state`] / [`StubFleet::assign_robot`] and injecting
//! failures with the `fail_*` switches.

use crate::{
    state, FleetAdapter, FleetError, TransportOrderDetail, TransportOrderRequest,
    TransportOrderResult,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use shingo_store::order::OrderStatus;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct StubOrder {
    state: String,
    robot_id: String,
}

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<String, StubOrder>,
    requests: Vec<TransportOrderRequest>,
    cancelled: Vec<String>,
    priorities: Vec<(String, i32)>,
    fail_placement: bool,
    fail_cancel: bool,
    offline: bool,
}

#[derive(Debug, Default)]
pub struct StubFleet {
    inner: Mutex<Inner>,
}

impl StubFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance a placed order to a new vendor state.
    pub fn set_state(&self, vendor_order_id: &str, vendor_state: &str) {
        let mut inner = self.inner.lock();
        inner
            .orders
            .entry(vendor_order_id.to_string())
            .or_default()
            .state = vendor_state.to_string();
    }

    pub fn assign_robot(&self, vendor_order_id: &str, robot_id: &str) {
        let mut inner = self.inner.lock();
        inner
            .orders
            .entry(vendor_order_id.to_string())
            .or_default()
            .robot_id = robot_id.to_string();
    }

    pub fn set_fail_placement(&self, fail: bool) {
        self.inner.lock().fail_placement = fail;
    }

    pub fn set_fail_cancel(&self, fail: bool) {
        self.inner.lock().fail_cancel = fail;
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Every placement request received, in order.
    pub fn requests(&self) -> Vec<TransportOrderRequest> {
        self.inner.lock().requests.clone()
    }

    /// Every vendor order id a cancel was requested for, in order.
    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().cancelled.clone()
    }

    pub fn priorities(&self) -> Vec<(String, i32)> {
        self.inner.lock().priorities.clone()
    }
}

impl FleetAdapter for StubFleet {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn create_transport_order<'a>(
        &'a self,
        request: &'a TransportOrderRequest,
    ) -> BoxFuture<'a, Result<TransportOrderResult, FleetError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if inner.offline {
                return Err(FleetError::Connectivity("stub offline".to_string()));
            }
            if inner.fail_placement {
                return Err(FleetError::Rejected("placement refused".to_string()));
            }
            inner.requests.push(request.clone());
            inner.orders.insert(
                request.vendor_order_id.clone(),
                StubOrder {
                    state: state::CREATED.to_string(),
                    robot_id: String::new(),
                },
            );
            Ok(TransportOrderResult {
                vendor_order_id: request.vendor_order_id.clone(),
                state: state::CREATED.to_string(),
            })
        })
    }

    fn cancel_order<'a>(
        &'a self,
        vendor_order_id: &'a str,
    ) -> BoxFuture<'a, Result<(), FleetError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if inner.offline {
                return Err(FleetError::Connectivity("stub offline".to_string()));
            }
            if inner.fail_cancel {
                return Err(FleetError::Rejected("cancel refused".to_string()));
            }
            inner.cancelled.push(vendor_order_id.to_string());
            if let Some(order) = inner.orders.get_mut(vendor_order_id) {
                order.state = state::CANCELLED.to_string();
            }
            Ok(())
        })
    }

    fn set_order_priority<'a>(
        &'a self,
        vendor_order_id: &'a str,
        priority: i32,
    ) -> BoxFuture<'a, Result<(), FleetError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if inner.offline {
                return Err(FleetError::Connectivity("stub offline".to_string()));
            }
            inner
                .priorities
                .push((vendor_order_id.to_string(), priority));
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), FleetError>> {
        Box::pin(async move {
            if self.inner.lock().offline {
                return Err(FleetError::Connectivity("stub offline".to_string()));
            }
            Ok(())
        })
    }

    fn map_state(&self, vendor_state: &str) -> OrderStatus {
        match vendor_state {
            state::CREATED => OrderStatus::Dispatched,
            state::ASSIGNED | state::MOVING => OrderStatus::InTransit,
            state::FINISHED => OrderStatus::Delivered,
            state::FAILED => OrderStatus::Failed,
            state::CANCELLED => OrderStatus::Cancelled,
            // Unknown tokens are treated as still en route.
            _ => OrderStatus::InTransit,
        }
    }

    fn is_terminal_state(&self, vendor_state: &str) -> bool {
        matches!(
            vendor_state,
            state::FINISHED | state::FAILED | state::CANCELLED
        )
    }

    fn get_order_detail<'a>(
        &'a self,
        vendor_order_id: &'a str,
    ) -> BoxFuture<'a, Result<TransportOrderDetail, FleetError>> {
        Box::pin(async move {
            let inner = self.inner.lock();
            if inner.offline {
                return Err(FleetError::Connectivity("stub offline".to_string()));
            }
            let order = inner
                .orders
                .get(vendor_order_id)
                .ok_or_else(|| FleetError::UnknownOrder(vendor_order_id.to_string()))?;
            Ok(TransportOrderDetail {
                vendor_order_id: vendor_order_id.to_string(),
                state: order.state.clone(),
                robot_id: order.robot_id.clone(),
                detail: String::new(),
            })
        })
    }
}
