//! Per-connection GATT session: the serialized write queue and the
//! characteristic handle cache.
//!
//! Every write goes through a single worker task that owns the connection's
//! write path, so at most one GATT write is in flight per connection. A
//! session is created for each new connection and dropped with it; neither
//! the queue nor the cache survive a reconnect.
//!
//! ```text
//! enqueue_write ──► mpsc ──► worker ──► settle ─► resolve (cache) ─► settle ─► write
//!      ▲                                                                        │
//!      └──────────────────────── oneshot reply ◄────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::gatt::service_name;
use super::transport::{BleAddress, GattCharacteristic, GattServer, NotificationStream};
use super::BleError;

/// Configuration for a GATT session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Delay applied before resolving the target characteristic and again
    /// before the write itself.
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
        }
    }
}

type CharacteristicCache = Arc<Mutex<HashMap<(Uuid, Uuid), GattCharacteristic>>>;

struct WriteRequest {
    service: Uuid,
    characteristic: Uuid,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<(), BleError>>,
}

/// An open connection to one peripheral.
pub struct GattSession {
    server: Arc<dyn GattServer>,
    cache: CharacteristicCache,
    queue_tx: mpsc::UnboundedSender<WriteRequest>,
}

impl GattSession {
    /// Open a session over a connected GATT server and start its write
    /// worker. Must be called from within a Tokio runtime.
    pub fn new(server: Arc<dyn GattServer>, config: SessionConfig) -> Arc<Self> {
        let cache: CharacteristicCache = Arc::new(Mutex::new(HashMap::new()));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_write_queue(
            Arc::clone(&server),
            Arc::clone(&cache),
            config.settle_delay,
            queue_rx,
        ));

        log::debug!("GATT session opened for {}", server.peer_address());
        Arc::new(Self {
            server,
            cache,
            queue_tx,
        })
    }

    pub fn peer_address(&self) -> &BleAddress {
        self.server.peer_address()
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub async fn primary_services(&self) -> Result<Vec<Uuid>, BleError> {
        self.server.primary_services().await
    }

    /// Resolve a characteristic, consulting the connection's cache first.
    pub async fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, BleError> {
        resolve_cached(&*self.server, &self.cache, service, characteristic).await
    }

    /// Subscribe to notifications on a characteristic.
    pub async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, BleError> {
        let handle = self.characteristic(service, characteristic).await?;
        let stream = self.server.subscribe(&handle).await?;
        log::debug!(
            "Subscribed to {}/{} on {}",
            service_name(&service),
            characteristic,
            self.server.peer_address()
        );
        Ok(stream)
    }

    /// Queue a write behind every write already issued on this connection.
    ///
    /// The position in the queue is fixed when this is called, not when the
    /// returned future is first polled. A failed write is reported to its
    /// own caller only; later writes still run.
    pub fn enqueue_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), BleError>> + Send + 'static {
        let (reply, reply_rx) = oneshot::channel();
        let queued = self
            .queue_tx
            .send(WriteRequest {
                service,
                characteristic,
                payload,
                reply,
            })
            .map_err(|_| BleError::Disconnected);

        async move {
            queued?;
            reply_rx.await.map_err(|_| BleError::Disconnected)?
        }
    }

    /// Number of characteristic handles cached on this connection.
    pub fn cached_characteristics(&self) -> usize {
        lock_cache(&self.cache).len()
    }

    pub async fn disconnect(&self) -> Result<(), BleError> {
        log::info!("Disconnecting from {}", self.server.peer_address());
        self.server.disconnect().await
    }
}

fn lock_cache(
    cache: &Mutex<HashMap<(Uuid, Uuid), GattCharacteristic>>,
) -> MutexGuard<'_, HashMap<(Uuid, Uuid), GattCharacteristic>> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn resolve_cached(
    server: &dyn GattServer,
    cache: &CharacteristicCache,
    service: Uuid,
    characteristic: Uuid,
) -> Result<GattCharacteristic, BleError> {
    let cached = lock_cache(cache).get(&(service, characteristic)).cloned();
    if let Some(handle) = cached {
        return Ok(handle);
    }
    let handle = server.characteristic(service, characteristic).await?;
    lock_cache(cache).insert((service, characteristic), handle.clone());
    Ok(handle)
}

async fn run_write_queue(
    server: Arc<dyn GattServer>,
    cache: CharacteristicCache,
    settle_delay: Duration,
    mut queue_rx: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some(request) = queue_rx.recv().await {
        let result = perform_write(&*server, &cache, settle_delay, &request).await;
        if let Err(e) = &result {
            log::warn!(
                "Queued write to {}/{} failed, continuing with next write: {}",
                service_name(&request.service),
                request.characteristic,
                e
            );
        }
        // The caller may have stopped waiting.
        let _ = request.reply.send(result);
    }
    log::debug!("Write queue for {} closed", server.peer_address());
}

async fn perform_write(
    server: &dyn GattServer,
    cache: &CharacteristicCache,
    settle_delay: Duration,
    request: &WriteRequest,
) -> Result<(), BleError> {
    tokio::time::sleep(settle_delay).await;
    let handle = resolve_cached(server, cache, request.service, request.characteristic).await?;

    tokio::time::sleep(settle_delay).await;
    log::debug!(
        "write {}/{} <- {}",
        service_name(&request.service),
        request.characteristic,
        hex::encode(&request.payload)
    );
    server.write(&handle, &request.payload).await
}
