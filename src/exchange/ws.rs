//! Public ticker push-stream (spec §4.2 fast path).
//!
//! Kraken's public websocket sends ticker updates as a four-element JSON
//! array `[channelID, data, "ticker", pair]` rather than a tagged object, so
//! this module hand-parses the frame instead of deriving `Deserialize`
//! straight onto it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::Either;
use futures_util::{future, pin_mut, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

const WS_URL: &str = "wss://ws.kraken.com";
/// Backoff schedule for reconnects (spec §4.2: "reconnects with bounded backoff").
const RECONNECT_BACKOFFS_SECS: &[u64] = &[1, 2, 5, 10, 30, 60];

/// A single push-stream ticker update: last-trade price for one pair.
#[derive(Debug, Clone)]
pub struct TickUpdate {
    /// Pair this update is for, in the same spelling Kraken echoed it back.
    pub pair: String,
    /// Last-trade price.
    pub price: Decimal,
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    event: &'static str,
    pair: &'a [String],
    subscription: Subscription,
}

#[derive(Serialize)]
struct Subscription {
    name: &'static str,
}

/// Owns the websocket connection lifecycle for a growable set of pairs,
/// emitting [`TickUpdate`]s over an internal channel that
/// [`crate::price_provider::PriceProvider`] drains to keep its cache warm.
pub struct TickerStream {
    pairs: Vec<String>,
}

/// Lets a caller add a pair to the live subscription set without tearing
/// down and reconnecting the stream (spec §4.2: a pair is subscribed on
/// first request rather than only at startup).
#[derive(Clone)]
pub struct TickerSubscriber {
    requests: mpsc::UnboundedSender<String>,
    known: Arc<Mutex<Vec<String>>>,
}

impl TickerSubscriber {
    /// Request `pair` be added to the live ticker subscription. A no-op if
    /// the stream already tracks it.
    pub fn ensure_subscribed(&self, pair: &str) {
        let already_known = self
            .known
            .lock()
            .expect("ticker pair list mutex is never poisoned")
            .iter()
            .any(|p| p == pair);
        if !already_known {
            let _ = self.requests.send(pair.to_owned());
        }
    }
}

impl TickerStream {
    /// Track `pairs` (Kraken wire notation) on the public ticker channel from the start.
    #[must_use]
    pub fn new(pairs: Vec<String>) -> Self {
        Self { pairs }
    }

    /// Spawn the background task that maintains the connection and reconnects
    /// with bounded backoff on every disconnect. Returns the task handle, the
    /// receiving end of the update channel, and a handle for subscribing to
    /// pairs discovered after startup.
    pub fn spawn(self) -> (JoinHandle<()>, mpsc::UnboundedReceiver<TickUpdate>, TickerSubscriber) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<String>();
        let known = Arc::new(Mutex::new(self.pairs));
        let subscriber = TickerSubscriber { requests: sub_tx, known: known.clone() };

        let handle = tokio::spawn(async move {
            let mut attempt: usize = 0;
            loop {
                match run_connection(&known, &mut sub_rx, &tx).await {
                    Ok(()) => {
                        log::info!("ticker stream closed cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        log::warn!("ticker stream error: {e}, reconnecting");
                    }
                }
                if tx.is_closed() {
                    return;
                }
                let backoff_secs = RECONNECT_BACKOFFS_SECS
                    [attempt.min(RECONNECT_BACKOFFS_SECS.len() - 1)];
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                attempt += 1;
            }
        });

        (handle, rx, subscriber)
    }
}

async fn run_connection(
    known: &Arc<Mutex<Vec<String>>>,
    sub_rx: &mut mpsc::UnboundedReceiver<String>,
    tx: &mpsc::UnboundedSender<TickUpdate>,
) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(WS_URL).await?;
    let initial_pairs = known.lock().expect("ticker pair list mutex is never poisoned").clone();
    log::info!("ticker websocket handshake completed for {} pairs", initial_pairs.len());

    let (write, read) = ws_stream.split();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
    if !initial_pairs.is_empty() {
        outbound_tx.send(subscribe_message(&initial_pairs)?)?;
    }

    let forward_outbound = futures_util::stream::unfold(outbound_rx, |mut rx| async move {
        rx.recv().await.map(|msg| (Ok(msg), rx))
    })
    .forward(write);

    let process = read.map_err(anyhow::Error::from).try_for_each(|message| {
        let tx = tx.clone();
        let outbound_tx = outbound_tx.clone();
        async move {
            handle_message(message, &tx, &outbound_tx)?;
            Ok(())
        }
    });

    let drain_subscriptions = async {
        while let Some(pair) = sub_rx.recv().await {
            let newly_added = {
                let mut guard = known.lock().expect("ticker pair list mutex is never poisoned");
                if guard.iter().any(|p| p == &pair) {
                    false
                } else {
                    guard.push(pair.clone());
                    true
                }
            };
            if newly_added {
                log::info!("ticker stream subscribing to newly requested pair {pair}");
                outbound_tx.send(subscribe_message(std::slice::from_ref(&pair))?)?;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    pin_mut!(forward_outbound, process, drain_subscriptions);
    match future::select(forward_outbound, future::select(process, drain_subscriptions)).await {
        Either::Left((res, _)) => res.map_err(Into::into),
        Either::Right((Either::Left((res, _)), _)) => res,
        Either::Right((Either::Right((res, _)), _)) => res,
    }
}

fn subscribe_message(pairs: &[String]) -> anyhow::Result<Message> {
    let msg = SubscribeRequest { event: "subscribe", pair: pairs, subscription: Subscription { name: "ticker" } };
    Ok(Message::Text(serde_json::to_string(&msg)?))
}

fn handle_message(
    message: Message,
    tx: &mpsc::UnboundedSender<TickUpdate>,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> anyhow::Result<()> {
    match message {
        Message::Text(text) => {
            if let Some(update) = parse_ticker_frame(&text) {
                let _ = tx.send(update);
            }
        }
        Message::Ping(payload) => {
            let _ = outbound_tx.send(Message::Pong(payload));
        }
        Message::Close(_) => anyhow::bail!("server closed the ticker stream"),
        _ => {}
    }
    Ok(())
}

/// Parse one `[channelID, data, "ticker", pair]` frame, returning `None` for
/// anything that is not a ticker data frame (subscription acks, heartbeats).
fn parse_ticker_frame(text: &str) -> Option<TickUpdate> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let array = value.as_array()?;
    if array.len() < 4 {
        return None;
    }
    if array.get(2).and_then(|v| v.as_str()) != Some("ticker") {
        return None;
    }
    let pair = array.get(3)?.as_str()?.to_owned();
    let last_trade = array.get(1)?.get("c")?.as_array()?.first()?.as_str()?;
    let price = last_trade.parse::<Decimal>().ok()?;
    Some(TickUpdate { pair, price })
}
