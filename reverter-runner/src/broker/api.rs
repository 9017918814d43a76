//! Typed endpoint façade over the API client.

use std::sync::Arc;

use reverter_core::domain::{PositionSnapshot, Side};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::client::ApiClient;
use super::error::BrokerError;
use super::retry::RetryPolicy;
use super::transport::{Method, Transport};
use crate::time::{Clock, Pause};

pub const CASH_PATH: &str = "/equity/account/cash";
pub const MARKET_ORDER_PATH: &str = "/equity/orders/market";
pub const ORDERS_PATH: &str = "/equity/orders";
pub const POSITION_PATH: &str = "/equity/portfolio/ticker";
pub const INSTRUMENTS_PATH: &str = "/equity/metadata/instruments";
pub const EXCHANGES_PATH: &str = "/equity/metadata/exchanges";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub working_schedule_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub working_schedules: Vec<WorkingSchedule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingSchedule {
    pub id: i64,
    #[serde(default)]
    pub time_events: Vec<TimeEvent>,
}

/// Both fields are optional on the wire; incomplete events get skipped later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEvent {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashBalance {
    pub total: f64,
    #[serde(default)]
    pub free: Option<f64>,
}

/// Order acknowledgement. Only `id` and `status` are relied on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

impl OrderAck {
    /// Order id, if the broker returned a non-null one.
    pub fn id_str(&self) -> Option<String> {
        match &self.id {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(v) => Some(v.to_string()),
        }
    }

    /// Order id if present, else status, else empty.
    pub fn note(&self) -> String {
        self.id_str()
            .or_else(|| self.status.clone())
            .unwrap_or_default()
    }
}

/// The brokerage as the agent sees it.
pub struct Broker<T: Transport> {
    client: ApiClient<T>,
    clock: Arc<dyn Clock>,
    pause: Arc<dyn Pause>,
}

impl<T: Transport> Broker<T> {
    pub fn new(
        transport: T,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        pause: Arc<dyn Pause>,
    ) -> Self {
        Self {
            client: ApiClient::new(transport, policy, Arc::clone(&pause)),
            clock,
            pause,
        }
    }

    pub fn client(&self) -> &ApiClient<T> {
        &self.client
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn pause(&self) -> &dyn Pause {
        self.pause.as_ref()
    }

    pub fn cash(&self) -> Result<CashBalance, BrokerError> {
        typed(self.client.execute(Method::Get, CASH_PATH, None)?)
    }

    /// Account equity (the `total` of the cash endpoint).
    pub fn equity(&self) -> Result<f64, BrokerError> {
        Ok(self.cash()?.total)
    }

    /// Submit a market order. Positive quantity buys, negative sells.
    pub fn market_order(&self, symbol: &str, signed_qty: f64) -> Result<OrderAck, BrokerError> {
        let body = json!({
            "ticker": symbol,
            "quantity": signed_qty,
            "extendedHours": false,
        });
        let raw = self
            .client
            .execute(Method::Post, MARKET_ORDER_PATH, Some(body))?;
        let ack: OrderAck = if raw.is_null() {
            OrderAck::default()
        } else {
            typed(raw)?
        };
        info!(symbol, quantity = signed_qty, order = %ack.note(), "market order accepted");
        Ok(ack)
    }

    pub fn place_order(&self, symbol: &str, side: Side, qty: f64) -> Result<OrderAck, BrokerError> {
        if !(qty > 0.0) || !qty.is_finite() {
            return Err(BrokerError::InvalidQuantity(qty));
        }
        self.market_order(symbol, side.signed(qty))
    }

    pub fn order(&self, id: &str) -> Result<Value, BrokerError> {
        self.client
            .execute(Method::Get, &format!("{ORDERS_PATH}/{id}"), None)
    }

    /// Raw position record, `None` when the broker has none (404).
    pub fn position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, BrokerError> {
        let raw = self.client.execute_allow_missing(
            Method::Post,
            POSITION_PATH,
            Some(json!({ "ticker": symbol })),
        )?;
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(v) => PositionSnapshot::from_payload(v)
                .map(Some)
                .map_err(|e| BrokerError::Decode(e.to_string())),
        }
    }

    pub fn instruments(&self) -> Result<Vec<Instrument>, BrokerError> {
        typed(self.client.execute(Method::Get, INSTRUMENTS_PATH, None)?)
    }

    pub fn exchanges(&self) -> Result<Vec<Exchange>, BrokerError> {
        typed(self.client.execute(Method::Get, EXCHANGES_PATH, None)?)
    }
}

fn typed<D: DeserializeOwned>(v: Value) -> Result<D, BrokerError> {
    serde_json::from_value(v).map_err(|e| BrokerError::Decode(e.to_string()))
}
