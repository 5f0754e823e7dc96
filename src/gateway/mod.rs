//! Order gateway boundary.
//!
//! The venue wire protocol is an external collaborator; the engine sees
//! only this trait. Every request carries a client-generated correlation
//! id so retried submissions are idempotent-safe on the venue side.

pub mod paper;

pub use paper::PaperGateway;

use crate::domain::{Direction, Position, VenuePosition};
use crate::error::OrderError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// An order submission. `direction` is the side of the order itself: a
/// long position is closed by a short, reduce-only order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub correlation_id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Market entry order opening new exposure.
    pub fn entry(instrument: &str, direction: Direction, quantity: Decimal) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            direction,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            reduce_only: false,
        }
    }

    /// Market order flattening an open position.
    pub fn exit(position: &Position) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            instrument: position.instrument.clone(),
            direction: position.direction.opposite(),
            quantity: position.quantity,
            order_type: OrderType::Market,
            limit_price: None,
            reduce_only: true,
        }
    }
}

/// Acknowledged fill for a placed order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub fill_price: Decimal,
    pub filled_quantity: Decimal,
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(
        &self,
        request: &OrderRequest,
    ) -> std::result::Result<OrderAck, OrderError>;

    /// The venue's authoritative view of open positions.
    async fn open_positions(&self) -> std::result::Result<Vec<VenuePosition>, OrderError>;
}
