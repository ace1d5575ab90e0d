//! Feed connection lifecycle
//!
//! A [`FeedConnection`] owns one depth subscription. It decodes frames in
//! arrival order and hands each result to a [`FeedHandler`]. Delivery happens
//! under the handler slot lock, which [`FeedCloser::close`] also takes, so no
//! callback can start once `close` has returned.

use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::WebSocketClient;
use crate::config::FeedSettings;
use crate::error::{FeedError, Result};
use crate::instrument::Instrument;
use crate::orderbook::OrderbookSnapshot;
use crate::parser::parse_snapshot;

/// Receives decoded snapshots and feed errors for one connection
pub trait FeedHandler: Send + 'static {
    fn on_snapshot(&mut self, snapshot: OrderbookSnapshot);
    fn on_error(&mut self, error: FeedError);
}

/// Raw frame source behind a feed connection
pub trait FeedSource: Send + 'static {
    /// Next data frame; `Ok(None)` for control traffic, `Err` ends the connection
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens feed connections for an instrument
pub trait FeedConnector: Send + Sync {
    fn open(&self, instrument: Instrument, handler: Box<dyn FeedHandler>) -> FeedCloser;
}

pub(crate) type HandlerSlot = Arc<Mutex<Option<Box<dyn FeedHandler>>>>;

pub(crate) fn handler_slot(handler: Box<dyn FeedHandler>) -> HandlerSlot {
    Arc::new(Mutex::new(Some(handler)))
}

/// Returns false once the slot has been disarmed by a closer
pub(crate) fn deliver_snapshot(slot: &HandlerSlot, snapshot: OrderbookSnapshot) -> bool {
    match slot.lock().as_mut() {
        Some(handler) => {
            handler.on_snapshot(snapshot);
            true
        }
        None => false,
    }
}

pub(crate) fn deliver_error(slot: &HandlerSlot, error: FeedError) -> bool {
    match slot.lock().as_mut() {
        Some(handler) => {
            handler.on_error(error);
            true
        }
        None => false,
    }
}

/// Capability to terminate a feed connection.
///
/// After `close` returns the handler is dropped and will never be called
/// again. Closing twice is a no-op; dropping the closer closes it.
pub struct FeedCloser {
    handler: HandlerSlot,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FeedCloser {
    pub(crate) fn new(handler: HandlerSlot, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            handler,
            shutdown: Some(shutdown),
        }
    }

    pub fn close(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        // Blocks until an in-flight callback finishes
        self.handler.lock().take();
        let _ = shutdown.send(());
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for FeedCloser {
    fn drop(&mut self) {
        self.close();
    }
}

/// Single depth stream subscription
pub struct FeedConnection;

impl FeedConnection {
    /// Subscribe to the partial depth stream of `instrument`.
    ///
    /// Returns immediately; connecting happens on a spawned task and a
    /// failure to connect is reported through `handler.on_error`.
    pub fn open(
        settings: &FeedSettings,
        instrument: Instrument,
        handler: Box<dyn FeedHandler>,
    ) -> FeedCloser {
        let url = settings.stream_url(instrument);
        let recv_timeout = settings.recv_timeout;

        Self::spawn(
            async move {
                let mut client = WebSocketClient::new(&url, recv_timeout);
                client.connect().await?;
                Ok(client)
            },
            settings.depth_levels,
            handler,
        )
    }

    /// Drive any frame source produced by `connect`
    pub fn spawn<S, F>(connect: F, max_levels: usize, handler: Box<dyn FeedHandler>) -> FeedCloser
    where
        S: FeedSource,
        F: Future<Output = Result<S>> + Send + 'static,
    {
        let slot = handler_slot(handler);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(run_feed(connect, max_levels, slot.clone(), shutdown_rx));

        FeedCloser::new(slot, shutdown_tx)
    }
}

async fn run_feed<S, F>(
    connect: F,
    max_levels: usize,
    slot: HandlerSlot,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: FeedSource,
    F: Future<Output = Result<S>> + Send + 'static,
{
    let mut source = tokio::select! {
        biased;
        _ = &mut shutdown => {
            debug!("Feed closed before the connection was established");
            return;
        }
        connected = connect => match connected {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "Feed connection failed");
                deliver_error(&slot, e);
                return;
            }
        },
    };

    let mut delivered: u64 = 0;
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            frame = source.next_frame() => frame,
        };

        match frame {
            Ok(Some(text)) => match parse_snapshot(&text, max_levels, Utc::now()) {
                Ok(snapshot) => {
                    if !deliver_snapshot(&slot, snapshot) {
                        break;
                    }
                    delivered += 1;
                }
                Err(e) => {
                    debug!(error = %e, "Dropping malformed depth message");
                    if !deliver_error(&slot, e) {
                        break;
                    }
                }
            },
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, delivered, "Feed transport failed");
                deliver_error(&slot, e);
                return;
            }
        }
    }

    source.close().await;
    debug!(delivered, "Feed connection closed");
}

/// In-memory frame source for replays and tests
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<String>>,
}

impl ChannelSource {
    /// The sender injects raw frames or transport errors
    pub fn new() -> (mpsc::UnboundedSender<Result<String>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl FeedSource for ChannelSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(frame) => frame.map(Some),
                None => Err(FeedError::WebSocketConnection("Stream ended".to_string())),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.rx.close();
        Box::pin(async {})
    }
}

/// Connector handing out [`ChannelSource`] connections, for replays and tests.
///
/// Every `open` is recorded so frames can be pushed into a specific
/// connection by index.
pub struct ChannelConnector {
    max_levels: usize,
    feeds: Mutex<Vec<(Instrument, mpsc::UnboundedSender<Result<String>>)>>,
}

impl ChannelConnector {
    pub fn new(max_levels: usize) -> Self {
        Self {
            max_levels,
            feeds: Mutex::new(Vec::new()),
        }
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> usize {
        self.feeds.lock().len()
    }

    /// Instrument of each opened connection, in open order
    pub fn instruments(&self) -> Vec<Instrument> {
        self.feeds.lock().iter().map(|(i, _)| *i).collect()
    }

    /// Push a frame into connection `index`; false if it is gone
    pub fn send(&self, index: usize, frame: Result<String>) -> bool {
        match self.feeds.lock().get(index) {
            Some((_, tx)) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Push a frame into the most recently opened connection
    pub fn send_latest(&self, frame: Result<String>) -> bool {
        match self.feeds.lock().last() {
            Some((_, tx)) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

impl Default for ChannelConnector {
    fn default() -> Self {
        Self::new(20)
    }
}

impl FeedConnector for ChannelConnector {
    fn open(&self, instrument: Instrument, handler: Box<dyn FeedHandler>) -> FeedCloser {
        let (tx, source) = ChannelSource::new();
        self.feeds.lock().push((instrument, tx));
        FeedConnection::spawn(async move { Ok(source) }, self.max_levels, handler)
    }
}

/// Live Binance partial depth connector
#[derive(Debug, Clone)]
pub struct BinanceConnector {
    settings: FeedSettings,
}

impl BinanceConnector {
    pub fn new(settings: FeedSettings) -> Self {
        Self { settings }
    }
}

impl FeedConnector for BinanceConnector {
    fn open(&self, instrument: Instrument, handler: Box<dyn FeedHandler>) -> FeedCloser {
        info!(
            instrument = %instrument,
            depth = self.settings.depth_levels,
            speed_ms = self.settings.update_speed_ms,
            "Opening depth feed"
        );
        FeedConnection::open(&self.settings, instrument, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Counts {
        snapshots: Vec<OrderbookSnapshot>,
        errors: Vec<String>,
    }

    struct Recorder(Arc<Mutex<Counts>>);

    impl FeedHandler for Recorder {
        fn on_snapshot(&mut self, snapshot: OrderbookSnapshot) {
            self.0.lock().snapshots.push(snapshot);
        }

        fn on_error(&mut self, error: FeedError) {
            self.0.lock().errors.push(error.kind().to_string());
        }
    }

    fn open_channel() -> (
        mpsc::UnboundedSender<Result<String>>,
        FeedCloser,
        Arc<Mutex<Counts>>,
    ) {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let (tx, source) = ChannelSource::new();
        let closer = FeedConnection::spawn(
            async move { Ok(source) },
            10,
            Box::new(Recorder(counts.clone())),
        );
        (tx, closer, counts)
    }

    fn depth(bid: &str, ask: &str) -> Result<String> {
        Ok(format!(
            r#"{{"lastUpdateId":1,"bids":[["{bid}","1"]],"asks":[["{ask}","1"]]}}"#
        ))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_delivers_in_wire_order() {
        let (tx, _closer, counts) = open_channel();
        for i in 0..5 {
            tx.send(depth(&format!("{}", 100 + i), "200")).unwrap();
        }
        settle().await;

        let counts = counts.lock();
        let prices: Vec<String> = counts
            .snapshots
            .iter()
            .map(|s| s.bids[0].price.to_string())
            .collect();
        assert_eq!(prices, vec!["100", "101", "102", "103", "104"]);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_skipped() {
        let (tx, _closer, counts) = open_channel();
        tx.send(depth("1", "2")).unwrap();
        tx.send(Ok("garbage".to_string())).unwrap();
        tx.send(Ok(r#"{"bids":[["x","1"]],"asks":[]}"#.to_string()))
            .unwrap();
        tx.send(depth("3", "4")).unwrap();
        settle().await;

        let counts = counts.lock();
        assert_eq!(counts.snapshots.len(), 2);
        assert_eq!(counts.errors, vec!["malformed_message", "malformed_message"]);
    }

    #[tokio::test]
    async fn test_no_callbacks_after_close() {
        let (tx, mut closer, counts) = open_channel();
        closer.close();
        assert!(closer.is_closed());
        // second close is a no-op
        closer.close();

        let _ = tx.send(depth("1", "2"));
        let _ = tx.send(Err(FeedError::ConnectionTimeout));
        settle().await;

        let counts = counts.lock();
        assert!(counts.snapshots.is_empty());
        assert!(counts.errors.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_is_terminal() {
        let (tx, _closer, counts) = open_channel();
        tx.send(Err(FeedError::WebSocketConnection("reset".into())))
            .unwrap();
        settle().await;
        // the connection is gone, later frames go nowhere
        let _ = tx.send(depth("1", "2"));
        settle().await;

        let counts = counts.lock();
        assert!(counts.snapshots.is_empty());
        assert_eq!(counts.errors, vec!["websocket_connection"]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let _closer = FeedConnection::spawn(
            async { Err::<ChannelSource, _>(FeedError::WebSocketConnection("refused".into())) },
            10,
            Box::new(Recorder(counts.clone())),
        );
        settle().await;
        assert_eq!(counts.lock().errors, vec!["websocket_connection"]);
    }

    #[tokio::test]
    async fn test_dropping_closer_closes() {
        let (tx, closer, counts) = open_channel();
        drop(closer);
        let _ = tx.send(depth("1", "2"));
        settle().await;
        assert!(counts.lock().snapshots.is_empty());
    }
}
