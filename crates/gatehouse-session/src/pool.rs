use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use gatehouse_wire::{HealthCheck, Message};

use crate::stream::MsgStream;

/// How often idle streams are probed for staleness.
const SWEEP_INTERVAL: Duration = Duration::from_secs(20);

/// A bounded pool of idle message streams to one backend endpoint.
///
/// Streams are created on demand up to the cap, handed to exactly one caller
/// at a time, and either restored after a successful exchange or discarded
/// after any error. A background task probes idle streams every
/// [`SWEEP_INTERVAL`] with a health check and drops the dead ones.
///
/// `size` counts every live stream the pool has created; `idle` counts the
/// subset sitting in the pool. `size - idle` streams are in flight with
/// callers.
#[derive(Clone)]
pub struct StreamPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Idle streams. The channel is the queue; the receiver is shared
    /// behind a mutex because acquirers contend for it.
    tx: mpsc::Sender<MsgStream>,
    rx: Mutex<mpsc::Receiver<MsgStream>>,
    /// Serializes the create-vs-take decision so concurrent acquirers
    /// cannot both dial past the cap.
    gate: Mutex<()>,
    size: AtomicUsize,
    idle: AtomicUsize,
    cap: usize,
    addr: String,
    read_timeout: Duration,
}

impl StreamPool {
    /// Create a pool dialing `host:port`, with at most `cap` live streams.
    ///
    /// Must be called from within a tokio runtime; the staleness sweeper is
    /// spawned immediately and stops when the last pool handle is dropped.
    pub fn new(host: &str, port: u16, cap: usize, read_timeout: Duration) -> StreamPool {
        let cap = cap.max(1);
        let (tx, rx) = mpsc::channel(cap);
        let inner = Arc::new(PoolInner {
            tx,
            rx: Mutex::new(rx),
            gate: Mutex::new(()),
            size: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            cap,
            addr: format!("{}:{}", host, port),
            read_timeout,
        });
        spawn_sweeper(&inner);
        StreamPool { inner }
    }

    /// Take a stream from the pool, dialing a new connection if none are
    /// idle and the cap has room. Blocks until a stream is available.
    ///
    /// Fails only when a new connection was required and the dial failed;
    /// a failed dial does not consume pool capacity.
    pub async fn acquire(&self) -> Result<MsgStream, PoolError> {
        let gate = self.inner.gate.lock().await;
        if self.inner.idle.load(Ordering::SeqCst) == 0
            && self.inner.size.load(Ordering::SeqCst) < self.inner.cap
        {
            let stream = self.connect().await?;
            if self.inner.tx.try_send(stream).is_ok() {
                self.inner.size.fetch_add(1, Ordering::SeqCst);
                self.inner.idle.fetch_add(1, Ordering::SeqCst);
            }
        }
        let mut rx = self.inner.rx.lock().await;
        let stream = match rx.recv().await {
            Some(stream) => stream,
            // All senders gone; cannot happen while the pool is alive.
            None => return Err(PoolError::Closed),
        };
        drop(rx);
        drop(gate);
        self.inner.idle.fetch_sub(1, Ordering::SeqCst);
        Ok(stream)
    }

    /// Return a still-healthy stream to the idle set.
    ///
    /// Streams that saw any read or write error must go to [`discard`]
    /// instead; restoring them would hand a poisoned connection to the next
    /// caller.
    ///
    /// [`discard`]: StreamPool::discard
    pub async fn restore(&self, stream: MsgStream) {
        match self.inner.tx.try_send(stream) {
            Ok(()) => {
                self.inner.idle.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                // Channel capacity equals the cap, so this is unreachable
                // while the counters hold; recover by dropping the stream.
                debug!("idle queue rejected stream, dropping it");
                self.discard(err.into_inner()).await;
            }
        }
    }

    /// Close a stream and release its slot in the pool.
    pub async fn discard(&self, mut stream: MsgStream) {
        stream.close().await;
        self.inner.size.fetch_sub(1, Ordering::SeqCst);
    }

    /// Live streams created by this pool, in flight or idle.
    pub fn size(&self) -> usize {
        self.inner.size.load(Ordering::SeqCst)
    }

    /// Streams currently sitting idle in the pool.
    pub fn idle(&self) -> usize {
        self.inner.idle.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<MsgStream, PoolError> {
        let socket = TcpStream::connect(&self.inner.addr).await.map_err(|err| {
            error!(addr = %self.inner.addr, %err, "failed to dial backend");
            PoolError::Connect(err)
        })?;
        Ok(MsgStream::from_tcp(socket, self.inner.read_timeout))
    }

    /// One staleness pass: drain the streams that are idle right now, probe
    /// each with a health check, and restore the survivors.
    ///
    /// The gate is held only while draining; probing happens with no locks
    /// held so acquirers are never stuck behind probe I/O.
    async fn sweep_idle(&self) {
        let mut drained = Vec::new();
        {
            let _gate = self.inner.gate.lock().await;
            let mut rx = self.inner.rx.lock().await;
            let idle = self.inner.idle.load(Ordering::SeqCst);
            for _ in 0..idle {
                match rx.try_recv() {
                    Ok(stream) => {
                        self.inner.idle.fetch_sub(1, Ordering::SeqCst);
                        drained.push(stream);
                    }
                    Err(_) => break,
                }
            }
        }

        let checked = drained.len();
        let mut removed = 0;
        for mut stream in drained {
            if probe(&mut stream).await {
                self.restore(stream).await;
            } else {
                removed += 1;
                self.discard(stream).await;
            }
        }
        if removed > 0 {
            info!(removed, checked, "dropped stale streams");
        }
    }
}

impl fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPool")
            .field("addr", &self.inner.addr)
            .field("cap", &self.inner.cap)
            .field("size", &self.size())
            .field("idle", &self.idle())
            .finish()
    }
}

async fn probe(stream: &mut MsgStream) -> bool {
    if stream
        .write_message(&Message::HealthCheck(HealthCheck::default()))
        .await
        .is_err()
    {
        return false;
    }
    stream.read_message().await.is_ok()
}

fn spawn_sweeper(inner: &Arc<PoolInner>) {
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            StreamPool { inner }.sweep_idle().await;
        }
    });
}

/// Errors surfaced by pool operations.
#[derive(Debug)]
pub enum PoolError {
    /// Dialing the backend failed.
    Connect(io::Error),
    /// The pool's idle queue is gone; only possible during teardown.
    Closed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Connect(err) => write!(f, "failed to connect: {}", err),
            PoolError::Closed => write!(f, "pool is closed"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Connect(err) => Some(err),
            PoolError::Closed => None,
        }
    }
}
