/// Relay runtime: wires listener, discovery, detector, queue and
/// orchestrator into one running service.
///
/// The application feeds acknowledgment events in through [`RelayHandle`]
/// and watches [`RelayEvent`]s; it never touches streams or handshakes.
mod transport;

pub use transport::{LanTransport, RelayTransport};

#[cfg(test)]
pub use transport::mock;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use offgrid_transport::{LanDiscovery, PeerInjector, PeerStream, RelayListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::detector::MissedDeliveryDetector;
use crate::engine::CryptoEngine;
use crate::handshake::{run_receiver, with_deadline, HandshakeContext, HandshakeReport};
use crate::orchestrator::{JobSummary, Orchestrator};
use crate::queue::{relay_job_queue, EnqueueOutcome};
use crate::store::{HistoryStore, RoomDirectory};
use crate::types::{DeviceIdentity, EventId, RoomEvent, UserId};
use crate::{RelayConfig, RelayError};

// ── Events (runtime → app) ───────────────────────────────────────────

/// Per-attempt outcomes reported by a running service.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// The orchestrator picked up a job.
    RelayStarted {
        event_id: EventId,
        missing: BTreeSet<UserId>,
    },
    /// Dialing a discovered peer failed; seeking continues.
    PeerConnectFailed { addr: SocketAddr, error: String },
    /// An outbound (sender-role) handshake ended.
    HandshakeFinished {
        event_id: EventId,
        addr: SocketAddr,
        result: Result<HandshakeReport, String>,
    },
    /// An inbound (receiver-role) handshake ended.
    InboundFinished {
        addr: SocketAddr,
        result: Result<HandshakeReport, String>,
    },
    /// A relay attempt is over.
    JobFinished { summary: JobSummary },
    /// The queue was busy; the job will resurface on a later acknowledgment.
    JobDropped { event_id: EventId },
}

// ── RelayHandle (app-facing API) ─────────────────────────────────────

/// Handle to a running [`RelayService`]. Cheap to clone.
#[derive(Clone)]
pub struct RelayHandle {
    detector: Arc<MissedDeliveryDetector>,
    injector: PeerInjector,
    identity: DeviceIdentity,
    local_addr: SocketAddr,
    events: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
}

impl RelayHandle {
    /// Address the relay listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Entry point for the sync pipeline: call once per acknowledgment event.
    pub async fn on_acknowledgment(&self, ack: &RoomEvent) -> Result<Vec<EnqueueOutcome>, RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Shutdown);
        }
        let outcomes = self.detector.on_acknowledgment(ack).await?;
        for outcome in &outcomes {
            if let EnqueueOutcome::Dropped(job) | EnqueueOutcome::Closed(job) = outcome {
                let _ = self.events.try_send(RelayEvent::JobDropped {
                    event_id: job.event_id().clone(),
                });
            }
        }
        Ok(outcomes)
    }

    /// Offer a peer address to the orchestrator as if it had been discovered.
    pub async fn add_peer(&self, addr: SocketAddr) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Shutdown);
        }
        Ok(self.injector.add_peer(addr).await?)
    }

    /// Stop discovery, the orchestrator, the listener and every handshake.
    pub fn shutdown(&self) {
        tracing::info!("relay service shutting down");
        self.cancel.cancel();
    }
}

// ── RelayChannels ────────────────────────────────────────────────────

/// Returned to the application when the service starts.
pub struct RelayChannels {
    pub handle: RelayHandle,
    pub events: mpsc::Receiver<RelayEvent>,
}

// ── RelayService ─────────────────────────────────────────────────────

pub struct RelayService;

impl RelayService {
    /// Bind the relay port, start discovery, the orchestrator and the
    /// inbound accept loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn spawn(
        config: RelayConfig,
        engine: Arc<dyn CryptoEngine>,
        history: Arc<dyn HistoryStore>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Result<RelayChannels, RelayError> {
        let cancel = CancellationToken::new();
        let listener = RelayListener::bind(&config.transport).await?;
        let local_addr = listener.local_addr()?;
        let feed = LanDiscovery::spawn(&config.transport, local_addr.port(), cancel.clone())?;
        let transport = LanTransport::new(feed, config.transport.dial_timeout());
        let injector = transport.injector();

        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let identity = engine.own_identity();
        let ctx = HandshakeContext::new(engine, history.clone(), directory.clone());
        let (jobs_tx, jobs_rx) = relay_job_queue();
        let detector = MissedDeliveryDetector::new(identity.user_id.clone(), history, directory, jobs_tx);

        let orchestrator = Orchestrator::new(transport, ctx.clone(), &config, events_tx.clone());
        tokio::spawn(orchestrator.run(jobs_rx, cancel.clone()));
        tokio::spawn(accept_loop(
            listener,
            ctx,
            config.handshake_timeout,
            config.transport.max_frame(),
            events_tx.clone(),
            cancel.clone(),
        ));
        tracing::info!("relay service for {identity} listening on {local_addr}");

        Ok(RelayChannels {
            handle: RelayHandle {
                detector: Arc::new(detector),
                injector,
                identity,
                local_addr,
                events: events_tx,
                cancel,
            },
            events: events_rx,
        })
    }
}

/// One receiver-role task per inbound stream, no upper bound.
async fn accept_loop(
    listener: RelayListener,
    ctx: HandshakeContext,
    timeout: Duration,
    max_frame: usize,
    events: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
) {
    loop {
        let (io, addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("relay accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };
        tracing::debug!("inbound relay stream from {addr}");

        let ctx = ctx.clone();
        let events = events.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = with_deadline(timeout, &cancel, async {
                let mut stream = PeerStream::accept(io, max_frame).await?;
                run_receiver(&ctx, &mut stream).await
            })
            .await;
            match &result {
                Ok(report) => tracing::debug!("inbound relay from {addr} ({}): {}", report.peer, report.outcome),
                Err(e) => tracing::warn!("inbound relay from {addr} failed: {e}"),
            }
            let _ = events.try_send(RelayEvent::InboundFinished {
                addr,
                result: result.map_err(|e| e.to_string()),
            });
        });
    }
    tracing::debug!("relay accept loop stopped");
}
