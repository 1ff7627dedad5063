//! # XTables Transport
//!
//! Wires the request correlator, the push dispatcher, the subscription
//! workers and the adaptive compressor into one instance with a
//! start/shutdown lifecycle.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xt_transport::{SystemClock, TcpChannelManager, TcpEndpoints, TransportApi, TransportConfig, XTablesTransport};
//!
//! let manager = TcpChannelManager::new(TcpEndpoints::new("10.4.88.2", 1736, 1735, 1737))?;
//! let transport = XTablesTransport::start(
//!     TransportConfig::default(),
//!     Arc::new(manager),
//!     Arc::new(SystemClock::new()),
//! )?;
//!
//! let reply = transport.submit(b"GET drivetrain.speed".to_vec()).wait()?;
//! transport.enqueue_push(b"PUT vision.target 1".to_vec());
//! let id = transport.subscribe("vision.target", Arc::new(|update| {
//!     println!("{} = {:?}", update.key, update.payload);
//! }));
//! transport.unsubscribe(id);
//! transport.shutdown()?;
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::{
    AdaptiveCompressor, ChannelRole, ChannelState, ChannelStatusBoard, RingBuffer,
    TransportConfig,
};
use crate::error::{CompressionError, TransportError};
use crate::metrics::{MetricsSnapshot, TransportMetrics};
use crate::ports::inbound::TransportApi;
use crate::ports::outbound::{ChannelManager, Clock};
use crate::service::push_dispatcher::PushDispatcher;
use crate::service::request_correlator::{RequestCorrelator, ResponseFuture};
use crate::service::subscription::{
    SubscriptionId, SubscriptionRegistry, Update, UpdateCallback, UpdateDispatcher,
    UpdateReceiver,
};
use crate::service::worker::{WorkerHandle, WorkerLoop};

/// A running transport instance.
pub struct XTablesTransport {
    config: TransportConfig,
    correlator: Arc<RequestCorrelator>,
    push: Arc<PushDispatcher>,
    subscriptions: Arc<SubscriptionRegistry>,
    updates: Arc<RingBuffer<Update>>,
    compressor: AdaptiveCompressor,
    status: Arc<ChannelStatusBoard>,
    metrics: Arc<TransportMetrics>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl XTablesTransport {
    /// Validate `config` and start every worker loop.
    pub fn start(
        config: TransportConfig,
        manager: Arc<dyn ChannelManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let status = Arc::new(ChannelStatusBoard::new());
        let metrics = Arc::new(TransportMetrics::new());
        let correlator = Arc::new(RequestCorrelator::new(
            &config,
            Arc::clone(&manager),
            Arc::clone(&clock),
            Arc::clone(&status),
            Arc::clone(&metrics),
        ));
        let push = Arc::new(PushDispatcher::new(
            &config,
            Arc::clone(&manager),
            Arc::clone(&clock),
            Arc::clone(&status),
            Arc::clone(&metrics),
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let updates = Arc::new(RingBuffer::new(config.subscribe_buffer_capacity));
        let receiver = Arc::new(UpdateReceiver::new(
            &config,
            Arc::clone(&updates),
            Arc::clone(&subscriptions),
            manager,
            Arc::clone(&clock),
            Arc::clone(&status),
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(UpdateDispatcher::new(
            Arc::clone(&updates),
            Arc::clone(&subscriptions),
            Arc::clone(&metrics),
        ));
        let compressor = AdaptiveCompressor::new(&config.compression, clock);
        metrics.record_compression_level(compressor.level());

        // Spawned handles are joined on drop if a later spawn fails.
        let mut workers = Vec::with_capacity(4);
        let loops: [Arc<dyn WorkerLoop>; 4] =
            [correlator.clone(), push.clone(), receiver, dispatcher];
        for worker in loops {
            let name = worker.name();
            let handle = WorkerHandle::spawn(worker)
                .map_err(|source| TransportError::WorkerSpawn { worker: name, source })?;
            workers.push(handle);
        }

        info!(
            reply_timeout_ms = config.reply_timeout_ms,
            request_capacity = config.request_buffer_capacity,
            push_capacity = config.push_buffer_capacity,
            subscribe_capacity = config.subscribe_buffer_capacity,
            "XTables transport started"
        );

        Ok(Self {
            config,
            correlator,
            push,
            subscriptions,
            updates,
            compressor,
            status,
            metrics,
            workers: Mutex::new(workers),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Compress and encode as base64 text.
    pub fn compress_to_base64(&self, data: &[u8]) -> Result<String, CompressionError> {
        let compressed = self.compress(data)?;
        Ok(BASE64.encode(compressed))
    }

    /// Decode base64 text and decompress it.
    pub fn decompress_from_base64(&self, text: &str) -> Result<Vec<u8>, CompressionError> {
        let result = self.compressor.decompress_from_base64(text);
        self.record_decompression(&result);
        result
    }

    pub fn compression_level(&self) -> i32 {
        self.compressor.level()
    }

    pub fn set_compression_target_ms(&self, target_ms: f64) {
        self.compressor.set_target_ms(target_ms);
    }

    /// Reset the request channel's backoff after an external reconnect.
    pub fn notify_reconnected(&self) {
        self.correlator.notify_reconnected();
    }

    pub fn channel_state(&self, role: ChannelRole) -> ChannelState {
        self.status.get(role)
    }

    pub fn channel_states(&self) -> HashMap<ChannelRole, ChannelState> {
        self.status.snapshot()
    }

    /// Whether any worker loop is still running.
    pub fn is_running(&self) -> bool {
        self.workers.lock().iter().any(WorkerHandle::is_alive)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            request_queue_depth: self.correlator.queue_len(),
            request_queue_capacity: self.correlator.queue_capacity(),
            push_queue_depth: self.push.queue_len(),
            push_queue_capacity: self.push.queue_capacity(),
            update_queue_depth: self.updates.len(),
            update_queue_capacity: self.updates.capacity(),
            ..self.metrics.snapshot()
        }
    }

    fn record_decompression(&self, result: &Result<Vec<u8>, CompressionError>) {
        match result {
            Ok(_) => self.metrics.record_decompression(),
            Err(_) => self.metrics.record_compression_failure(),
        }
    }
}

impl TransportApi for XTablesTransport {
    fn submit(&self, payload: Vec<u8>) -> ResponseFuture {
        self.correlator.submit(payload)
    }

    fn enqueue_push(&self, frame: Vec<u8>) {
        self.push.enqueue(frame);
    }

    fn subscribe(&self, key: &str, callback: UpdateCallback) -> SubscriptionId {
        self.subscriptions.subscribe(key, callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self.compressor.compress(data) {
            Ok(compressed) => {
                self.metrics.record_compression(self.compressor.level());
                Ok(compressed)
            }
            Err(err) => {
                self.metrics.record_compression_failure();
                Err(err)
            }
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let result = self.compressor.decompress(data);
        self.record_decompression(&result);
        result
    }

    /// Interrupt every loop, fail outstanding requests and join the threads.
    ///
    /// Idempotent; later calls return `Ok(())` immediately.
    fn shutdown(&self) -> Result<(), TransportError> {
        let mut workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for worker in workers.iter_mut() {
            if let Err(err) = worker.shutdown() {
                first_error.get_or_insert(err);
            }
        }
        info!("XTables transport shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for XTablesTransport {
    fn drop(&mut self) {
        let _ = TransportApi::shutdown(self);
    }
}
