//! Signed Kraken REST client (spec §4.1, §4.4.1, §4.4.2).

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::error::ExchangeError;
use crate::exchange::signing::{self, NonceCounter};
use crate::exchange::types::{
    AddOrderDescr, AddOrderParams, AddOrderResult, Balance, OrderInfo,
};

const DEFAULT_REST_URL: &str = "https://api.kraken.com";
/// Every private call is bounded by this deadline (spec §4.1).
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials for one Kraken account (spec §6 credential resolution).
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Raw API key, sent verbatim as the `API-Key` header.
    pub api_key: String,
    /// Base64-encoded API secret.
    pub api_secret: String,
}

/// Kraken's generic response envelope: `error` is always present (possibly empty),
/// `result` only on success.
#[derive(Debug, Deserialize)]
struct KrakenEnvelope<T> {
    error: Vec<String>,
    result: Option<T>,
}

/// Signed REST client for one Kraken account.
///
/// One instance is held per distinct account a rule set references; each
/// carries its own nonce counter since Kraken scopes nonce monotonicity to
/// the API key, not to the process.
#[derive(Debug)]
pub struct ExchangeClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    nonce: NonceCounter,
}

impl ExchangeClient {
    /// Build a client against the production Kraken REST API.
    ///
    /// # Errors
    ///
    /// Returns an error if `credentials.api_secret` is not valid base64, or
    /// constructing the underlying HTTP client fails.
    pub fn new(credentials: Credentials) -> Result<Self, ExchangeError> {
        Self::with_base_url(credentials, DEFAULT_REST_URL)
    }

    /// Build a client against an arbitrary base URL (used by tests against a mock server).
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` does not parse or constructing the HTTP client fails.
    pub fn with_base_url(credentials: Credentials, base_url: &str) -> Result<Self, ExchangeError> {
        let base_url = Url::parse(base_url).map_err(|e| ExchangeError::Other {
            endpoint: "<init>".to_owned(),
            message: format!("invalid base url: {e}"),
            status: None,
            at: Utc::now(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Other {
                endpoint: "<init>".to_owned(),
                message: e.to_string(),
                status: None,
                at: Utc::now(),
            })?;
        Ok(Self {
            http,
            base_url,
            credentials,
            nonce: NonceCounter::new(),
        })
    }

    fn classify_status(endpoint: &str, status: reqwest::StatusCode, message: String) -> ExchangeError {
        let at = Utc::now();
        if status.as_u16() == 429 {
            ExchangeError::RateLimit { endpoint: endpoint.to_owned(), message, at }
        } else if status.is_server_error() {
            ExchangeError::ServerError {
                endpoint: endpoint.to_owned(),
                message,
                status: Some(status.as_u16()),
                at,
            }
        } else {
            ExchangeError::Other {
                endpoint: endpoint.to_owned(),
                message,
                status: Some(status.as_u16()),
                at,
            }
        }
    }

    fn classify_reqwest_error(endpoint: &str, err: reqwest::Error) -> ExchangeError {
        let at = Utc::now();
        let message = err.to_string();
        if err.is_timeout() {
            ExchangeError::Timeout { endpoint: endpoint.to_owned(), message, at }
        } else if err.is_connect() {
            ExchangeError::Connection { endpoint: endpoint.to_owned(), message, at }
        } else {
            ExchangeError::Other { endpoint: endpoint.to_owned(), message, status: None, at }
        }
    }

    async fn public<T>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T, ExchangeError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = self
            .base_url
            .join(&format!("/0/public/{endpoint}"))
            .expect("endpoint path is always valid");

        let resp = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| Self::classify_reqwest_error(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(endpoint, status, body));
        }

        let envelope: KrakenEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| Self::classify_reqwest_error(endpoint, e))?;

        self.unwrap_envelope(endpoint, envelope)
    }

    async fn private<T>(&self, endpoint: &str, mut form: Vec<(&str, String)>) -> Result<T, ExchangeError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let path = format!("/0/private/{endpoint}");
        let nonce = self.nonce.next();
        form.push(("nonce", nonce.to_string()));

        let postdata = serde_urlencoded::to_string(&form).map_err(|e| ExchangeError::Other {
            endpoint: endpoint.to_owned(),
            message: format!("failed to encode request body: {e}"),
            status: None,
            at: Utc::now(),
        })?;

        let secret = signing::decode_secret(&self.credentials.api_secret).map_err(|e| {
            ExchangeError::Other {
                endpoint: endpoint.to_owned(),
                message: format!("invalid api secret: {e}"),
                status: None,
                at: Utc::now(),
            }
        })?;
        let signature = signing::sign(&path, nonce, &postdata, &secret);

        let url = self
            .base_url
            .join(&path)
            .expect("endpoint path is always valid");

        let resp = self
            .http
            .post(url)
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await
            .map_err(|e| Self::classify_reqwest_error(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(endpoint, status, body));
        }

        let envelope: KrakenEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| Self::classify_reqwest_error(endpoint, e))?;

        self.unwrap_envelope(endpoint, envelope)
    }

    fn unwrap_envelope<T>(&self, endpoint: &str, envelope: KrakenEnvelope<T>) -> Result<T, ExchangeError> {
        if !envelope.error.is_empty() {
            let message = envelope.error.join("; ");
            return Err(ExchangeError::Other {
                endpoint: endpoint.to_owned(),
                message,
                status: None,
                at: Utc::now(),
            });
        }
        envelope.result.ok_or_else(|| ExchangeError::Other {
            endpoint: endpoint.to_owned(),
            message: "response carried neither error nor result".to_owned(),
            status: None,
            at: Utc::now(),
        })
    }

    /// Fetch the current last-trade price for `pair` (spec §4.2 REST fallback path).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport, HTTP or Kraken-level failure.
    pub async fn current_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        #[derive(Deserialize)]
        struct TickerEntry {
            c: Vec<String>,
        }

        let result: HashMap<String, TickerEntry> = self
            .public("Ticker", &[("pair", pair.to_owned())])
            .await?;

        let entry = result.values().next().ok_or_else(|| ExchangeError::Other {
            endpoint: "Ticker".to_owned(),
            message: format!("no ticker data for pair `{pair}`"),
            status: None,
            at: Utc::now(),
        })?;

        let price_str = entry.c.first().ok_or_else(|| ExchangeError::Other {
            endpoint: "Ticker".to_owned(),
            message: format!("ticker payload for `{pair}` missing last-trade price"),
            status: None,
            at: Utc::now(),
        })?;

        price_str.parse::<Decimal>().map_err(|e| ExchangeError::Other {
            endpoint: "Ticker".to_owned(),
            message: format!("could not parse price `{price_str}`: {e}"),
            status: None,
            at: Utc::now(),
        })
    }

    /// Fetch current last-trade prices for several pairs in one round-trip
    /// (spec: the batched `Ticker` variant alongside the single-pair call).
    /// Kraken's `Ticker` endpoint accepts a comma-separated `pair` list and
    /// returns a map keyed by the same pair spellings; a pair missing from
    /// the response (or carrying an unparseable price) is skipped rather
    /// than failing the whole batch.
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport or HTTP failure for the
    /// single underlying request.
    pub async fn current_prices(&self, pairs: &[String]) -> Result<HashMap<String, Decimal>, ExchangeError> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        #[derive(Deserialize)]
        struct TickerEntry {
            c: Vec<String>,
        }

        let result: HashMap<String, TickerEntry> =
            self.public("Ticker", &[("pair", pairs.join(","))]).await?;

        let mut prices = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let Some(entry) = result.get(pair) else {
                log::warn!("batched ticker response missing pair `{pair}`");
                continue;
            };
            let Some(price_str) = entry.c.first() else {
                log::warn!("ticker payload for `{pair}` missing last-trade price");
                continue;
            };
            match price_str.parse::<Decimal>() {
                Ok(price) => {
                    prices.insert(pair.clone(), price);
                }
                Err(e) => log::warn!("could not parse price `{price_str}` for `{pair}`: {e}"),
            }
        }
        Ok(prices)
    }

    /// Account balances across every asset (spec §4.4.1 step 3).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport, HTTP or Kraken-level failure.
    pub async fn balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        let result: HashMap<String, String> = self.private("Balance", vec![]).await?;
        let mut balances = Vec::with_capacity(result.len());
        for (asset, amount) in result {
            let amount = amount.parse::<Decimal>().map_err(|e| ExchangeError::Other {
                endpoint: "Balance".to_owned(),
                message: format!("could not parse balance `{amount}` for `{asset}`: {e}"),
                status: None,
                at: Utc::now(),
            })?;
            balances.push(Balance { asset, amount });
        }
        Ok(balances)
    }

    /// Currently open orders, keyed by transaction id (spec §4.4.2 fill polling).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport, HTTP or Kraken-level failure.
    pub async fn open_orders(&self) -> Result<HashMap<String, OrderInfo>, ExchangeError> {
        #[derive(Deserialize)]
        struct OpenOrdersResult {
            open: HashMap<String, OrderInfo>,
        }
        let result: OpenOrdersResult = self.private("OpenOrders", vec![]).await?;
        Ok(result.open)
    }

    /// Recently closed orders, keyed by transaction id (spec §4.4.2 fill polling).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport, HTTP or Kraken-level failure.
    pub async fn closed_orders(&self) -> Result<HashMap<String, OrderInfo>, ExchangeError> {
        #[derive(Deserialize)]
        struct ClosedOrdersResult {
            closed: HashMap<String, OrderInfo>,
        }
        let result: ClosedOrdersResult = self.private("ClosedOrders", vec![]).await?;
        Ok(result.closed)
    }

    /// Look up specific order ids directly, bypassing the open/closed split (spec §4.4.2).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport, HTTP or Kraken-level failure.
    pub async fn query_orders(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, OrderInfo>, ExchangeError> {
        let form = vec![("txid", txids.join(","))];
        self.private("QueryOrders", form).await
    }

    /// Place a trailing-stop order, retrying once against the `last` trigger if
    /// Kraken reports the index price is unavailable (spec §4.4.1 step 6, §8 S6).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] if both attempts fail, or the first failure
    /// immediately if it is not an index-unavailable condition.
    pub async fn add_trailing_stop(
        &self,
        mut params: AddOrderParams,
    ) -> Result<AddOrderResult, ExchangeError> {
        match self.add_order(&params).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_index_unavailable() && params.trigger == "index" => {
                log::warn!(
                    "AddOrder for pair {} reported index unavailable; retrying with last-price trigger",
                    params.pair
                );
                params.trigger = "last";
                self.add_order(&params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn add_order(&self, params: &AddOrderParams) -> Result<AddOrderResult, ExchangeError> {
        let form = vec![
            ("pair", params.pair.clone()),
            ("type", params.side.to_string()),
            ("ordertype", params.ordertype.to_owned()),
            ("volume", params.volume.normalize().to_string()),
            ("price", params.price.clone()),
            ("trigger", params.trigger.to_owned()),
            ("userref", params.userref.to_string()),
            ("validate", params.validate.to_string()),
        ];

        #[derive(Deserialize)]
        struct RawAddOrderResult {
            txid: Vec<String>,
            descr: AddOrderDescr,
        }
        let result: RawAddOrderResult = self.private("AddOrder", form).await?;
        Ok(AddOrderResult { txid: result.txid, descr: result.descr })
    }

    /// Cancel a resting order by transaction id (spec §4.4.3 supersede-on-chain, manual ops).
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] on any transport, HTTP or Kraken-level failure.
    pub async fn cancel_order(&self, txid: &str) -> Result<(), ExchangeError> {
        let form = vec![("txid", txid.to_owned())];
        let _: serde_json::Value = self.private("CancelOrder", form).await?;
        Ok(())
    }
}
