//! Kraken exchange client (spec §4.1).
//!
//! [`client::ExchangeClient`] is the sole gateway the Rule Engine uses to talk
//! to Kraken; [`ws`] maintains the push-stream ticker cache that backs the
//! Price Provider's fast path.

pub mod client;
pub mod signing;
pub mod types;
pub mod ws;

use std::collections::HashMap;

use rust_decimal::Decimal;

pub use client::ExchangeClient;
pub use types::{AddOrderParams, AddOrderResult, Balance, OrderInfo, OrderSide, OrderStatus};

use crate::error::ExchangeError;

/// The subset of Kraken operations the Rule Engine drives, behind a trait so
/// tests can substitute an in-memory fake (spec §4.4 order/fill phases).
#[async_trait::async_trait]
pub trait Exchange: Send + Sync {
    /// See [`ExchangeClient::current_price`].
    async fn current_price(&self, pair: &str) -> Result<Decimal, ExchangeError>;
    /// See [`ExchangeClient::current_prices`].
    async fn current_prices(&self, pairs: &[String]) -> Result<HashMap<String, Decimal>, ExchangeError>;
    /// See [`ExchangeClient::balance`].
    async fn balance(&self) -> Result<Vec<Balance>, ExchangeError>;
    /// See [`ExchangeClient::query_orders`].
    async fn query_orders(&self, txids: &[String]) -> Result<HashMap<String, OrderInfo>, ExchangeError>;
    /// See [`ExchangeClient::add_trailing_stop`].
    async fn add_trailing_stop(&self, params: AddOrderParams) -> Result<AddOrderResult, ExchangeError>;
}

#[async_trait::async_trait]
impl Exchange for ExchangeClient {
    async fn current_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        ExchangeClient::current_price(self, pair).await
    }

    async fn current_prices(&self, pairs: &[String]) -> Result<HashMap<String, Decimal>, ExchangeError> {
        ExchangeClient::current_prices(self, pairs).await
    }

    async fn balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        ExchangeClient::balance(self).await
    }

    async fn query_orders(&self, txids: &[String]) -> Result<HashMap<String, OrderInfo>, ExchangeError> {
        ExchangeClient::query_orders(self, txids).await
    }

    async fn add_trailing_stop(&self, params: AddOrderParams) -> Result<AddOrderResult, ExchangeError> {
        ExchangeClient::add_trailing_stop(self, params).await
    }
}
