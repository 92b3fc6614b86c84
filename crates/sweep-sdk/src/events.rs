//! Bridge event ingestion.
//!
//! Subscribes to the bridge chain's tendermint websocket for sweep
//! broadcast events. An event is only a wake-up: the authoritative sweep
//! payload is always fetched from the bridge REST API, so a malformed or
//! duplicated websocket frame costs one redundant fetch at worst. The
//! listener reconnects with exponential backoff and never tears down the
//! process over a bad signal.

use std::time::Duration;

use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::engine::{FeeBumpEngine, SweepSignal};
use crate::{Result, SweepSdkError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PING_PERIOD: Duration = Duration::from_secs(30);
const READ_DEADLINE: Duration = Duration::from_secs(60);
const SWEEP_FEED_PATH: &str = "/twilight-project/nyks/bridge/broadcast_tx_sweep_all";

/// Bridge actions the listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEventAction {
    BroadcastSweep,
}

impl BridgeEventAction {
    /// The `message.action` value in the tendermint event query.
    fn message_action(&self) -> &'static str {
        match self {
            BridgeEventAction::BroadcastSweep => "broadcast_tx_sweep",
        }
    }
}

/// Pending sweeps as served by the bridge REST API.
#[derive(Debug, Deserialize)]
struct SweepFeedResponse {
    #[serde(rename = "BroadcastTxSweepMsg", default)]
    sweeps: Vec<SweepSignal>,
}

pub struct BridgeEventListener {
    ws_url: String,
    api_url: String,
    action: BridgeEventAction,
    engine: FeeBumpEngine,
    http: reqwest::Client,
}

impl BridgeEventListener {
    pub fn new(
        ws_url: String,
        api_url: String,
        action: BridgeEventAction,
        engine: FeeBumpEngine,
    ) -> Self {
        Self {
            ws_url,
            api_url: api_url.trim_end_matches('/').to_string(),
            action,
            engine,
            http: reqwest::Client::new(),
        }
    }

    pub fn spawn(self, join_set: &mut JoinSet<eyre::Result<()>>) {
        join_set.spawn(async move { self.run().await });
    }

    async fn run(self) -> eyre::Result<()> {
        info!(ws_url = %self.ws_url, action = self.action.message_action(), "bridge event listener started");
        loop {
            match self.subscribe_and_listen().await {
                Ok(()) => warn!("bridge event stream closed, reconnecting"),
                Err(e) => warn!(error = %e, "bridge event stream failed, reconnecting"),
            }
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let url = self.ws_url.clone();
        backoff::future::retry(ExponentialBackoff::default(), || async {
            match connect_async(&url).await {
                Ok((ws, _)) => Ok(ws),
                Err(e) => {
                    warn!(error = %e, "bridge websocket dial failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| SweepSdkError::Websocket(e.to_string()))
    }

    /// One websocket session: subscribe, then read until the stream dies
    /// or goes silent past the read deadline.
    async fn subscribe_and_listen(&self) -> Result<()> {
        let mut ws = self.connect().await?;

        let subscription = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "id": 0,
            "params": {
                "query": format!(
                    "tm.event='Tx' AND message.action='{}'",
                    self.action.message_action()
                ),
            },
        });
        ws.send(Message::Text(subscription.to_string()))
            .await
            .map_err(|e| SweepSdkError::Websocket(e.to_string()))?;
        info!("subscribed to bridge events");

        let (mut write, mut read) = ws.split();

        // Keepalive pings on a side task so a quiet bridge does not trip
        // intermediate proxies.
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_PERIOD);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if write.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        let result = loop {
            match tokio::time::timeout(READ_DEADLINE, read.next()).await {
                Err(_) => break Err(SweepSdkError::Websocket("read deadline exceeded".into())),
                Ok(None) => break Ok(()),
                Ok(Some(Err(e))) => break Err(SweepSdkError::Websocket(e.to_string())),
                Ok(Some(Ok(Message::Close(_)))) => break Ok(()),
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                // Any data frame on the subscription is the wake-up; the
                // payload itself is fetched from the REST API.
                Ok(Some(Ok(_))) => self.dispatch().await,
            }
        };

        let _ = stop_tx.send(());
        let _ = keepalive.await;
        result
    }

    async fn dispatch(&self) {
        match self.action {
            BridgeEventAction::BroadcastSweep => {
                if let Err(e) = self.handle_broadcast_sweep().await {
                    warn!(error = %e, "failed to process sweep event, signal dropped");
                }
            }
        }
    }

    async fn handle_broadcast_sweep(&self) -> Result<()> {
        let signal = self.fetch_pending_sweep().await?;
        debug!(
            reserve_id = %signal.reserve_id,
            round_id = %signal.round_id,
            judge_address = %signal.judge_address,
            "fetched pending sweep"
        );
        self.engine.process(&signal).await
    }

    async fn fetch_pending_sweep(&self) -> Result<SweepSignal> {
        let url = format!("{}{}", self.api_url, SWEEP_FEED_PATH);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SweepSdkError::BridgeApi(e.to_string()))?;
        let feed: SweepFeedResponse = response
            .json()
            .await
            .map_err(|e| SweepSdkError::BridgeApi(e.to_string()))?;
        feed.sweeps
            .into_iter()
            .next()
            .ok_or_else(|| SweepSdkError::BridgeApi("no pending sweep transaction".into()))
    }
}
