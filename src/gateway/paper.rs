//! In-memory paper gateway.
//!
//! Fills market orders instantly at the aggregator's last traded price and
//! keeps a venue-side position book, so the whole engine can run (and be
//! integration-tested) without a real venue. Duplicate correlation ids
//! return the original ack instead of double-filling, matching the
//! idempotency contract real gateways must provide.

use super::{OrderAck, OrderGateway, OrderRequest};
use crate::candles::CandleAggregator;
use crate::domain::VenuePosition;
use crate::error::OrderError;
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

pub struct PaperGateway {
    marks: Arc<CandleAggregator>,
    book: Mutex<HashMap<String, VenuePosition>>,
    acks: DashMap<Uuid, OrderAck>,
    next_order_id: AtomicU64,
    injected_failures: Mutex<VecDeque<OrderError>>,
}

impl PaperGateway {
    pub fn new(marks: Arc<CandleAggregator>) -> Self {
        Self {
            marks,
            book: Mutex::new(HashMap::new()),
            acks: DashMap::new(),
            next_order_id: AtomicU64::new(1),
            injected_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue an error to be returned by the next `place_order` call.
    /// Lets tests exercise retry and suspension paths.
    pub fn inject_failure(&self, error: OrderError) {
        self.injected_failures
            .lock()
            .expect("paper gateway failure queue poisoned")
            .push_back(error);
    }

    /// Drop a venue position out from under the ledger, simulating an
    /// externally closed position for reconciliation runs.
    pub fn force_remove(&self, instrument: &str) {
        self.book
            .lock()
            .expect("paper gateway book poisoned")
            .remove(instrument);
    }

    fn apply_fill(&self, request: &OrderRequest, fill_price: Decimal) {
        let mut book = self.book.lock().expect("paper gateway book poisoned");
        if request.reduce_only {
            let remove = match book.get_mut(&request.instrument) {
                Some(held) => {
                    held.quantity -= request.quantity;
                    held.quantity <= Decimal::ZERO
                }
                None => false,
            };
            if remove {
                book.remove(&request.instrument);
            }
        } else {
            book.insert(
                request.instrument.clone(),
                VenuePosition {
                    instrument: request.instrument.clone(),
                    direction: request.direction,
                    quantity: request.quantity,
                    avg_price: fill_price,
                },
            );
        }
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(
        &self,
        request: &OrderRequest,
    ) -> std::result::Result<OrderAck, OrderError> {
        if let Some(ack) = self.acks.get(&request.correlation_id) {
            debug!(
                "duplicate correlation id {}, returning original ack",
                request.correlation_id
            );
            return Ok(ack.clone());
        }

        if let Some(error) = self
            .injected_failures
            .lock()
            .expect("paper gateway failure queue poisoned")
            .pop_front()
        {
            return Err(error);
        }

        let fill_price = self
            .marks
            .last_price(&request.instrument)
            .or(request.limit_price)
            .ok_or_else(|| {
                OrderError::Rejected(format!("no market price for {}", request.instrument))
            })?;

        let order_id = format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst));
        self.apply_fill(request, fill_price);

        let ack = OrderAck {
            order_id,
            fill_price,
            filled_quantity: request.quantity,
        };
        self.acks.insert(request.correlation_id, ack.clone());
        Ok(ack)
    }

    async fn open_positions(&self) -> std::result::Result<Vec<VenuePosition>, OrderError> {
        let book = self.book.lock().expect("paper gateway book poisoned");
        Ok(book.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::CandleConfig;
    use crate::domain::{Direction, Tick};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn gateway_with_price(instrument: &str, price: Decimal) -> PaperGateway {
        let candles = Arc::new(CandleAggregator::new(CandleConfig::default()));
        candles.ingest(Tick {
            instrument: instrument.to_string(),
            price,
            size: Some(dec!(1)),
            ts: Utc::now(),
        });
        PaperGateway::new(candles)
    }

    #[tokio::test]
    async fn fills_at_last_price_and_books_position() {
        let gw = gateway_with_price("ES", dec!(101.5));
        let request = OrderRequest::entry("ES", Direction::Long, dec!(2));
        let ack = gw.place_order(&request).await.unwrap();
        assert_eq!(ack.fill_price, dec!(101.5));

        let venue = gw.open_positions().await.unwrap();
        assert_eq!(venue.len(), 1);
        assert_eq!(venue[0].quantity, dec!(2));
    }

    #[tokio::test]
    async fn duplicate_correlation_id_returns_original_ack() {
        let gw = gateway_with_price("ES", dec!(100));
        let request = OrderRequest::entry("ES", Direction::Long, dec!(1));
        let first = gw.place_order(&request).await.unwrap();
        let second = gw.place_order(&request).await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        // Book must not have doubled.
        assert_eq!(gw.open_positions().await.unwrap()[0].quantity, dec!(1));
    }

    #[tokio::test]
    async fn reduce_only_fill_flattens_the_book() {
        let gw = gateway_with_price("ES", dec!(100));
        let entry = OrderRequest::entry("ES", Direction::Long, dec!(3));
        gw.place_order(&entry).await.unwrap();

        let mut exit = OrderRequest::entry("ES", Direction::Short, dec!(3));
        exit.reduce_only = true;
        gw.place_order(&exit).await.unwrap();
        assert!(gw.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_once() {
        let gw = gateway_with_price("ES", dec!(100));
        gw.inject_failure(OrderError::Timeout { elapsed_ms: 5_000 });
        let request = OrderRequest::entry("ES", Direction::Long, dec!(1));
        assert!(gw.place_order(&request).await.is_err());
        assert!(gw.place_order(&request).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_when_no_mark_price_exists() {
        let candles = Arc::new(CandleAggregator::new(CandleConfig::default()));
        let gw = PaperGateway::new(candles);
        let request = OrderRequest::entry("ZZ", Direction::Long, dec!(1));
        assert!(matches!(
            gw.place_order(&request).await,
            Err(OrderError::Rejected(_))
        ));
    }
}
