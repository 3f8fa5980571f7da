//! Connection orchestrator.
//!
//! Takes one [`RelayJob`] at a time off the queue, pulls peers from the
//! transport until everybody the job names has the event (or the seek window
//! closes), and runs one sender-role handshake task per reachable peer.

use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use offgrid_transport::PeerStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::handshake::{run_sender, with_deadline, HandshakeContext, HandshakeReport};
use crate::job::RelayJob;
use crate::queue::JobReceiver;
use crate::runtime::{RelayEvent, RelayTransport};
use crate::types::{EventId, UserId};
use crate::{RelayConfig, RelayError};

type HandshakeResult = (SocketAddr, Result<HandshakeReport, RelayError>);

/// What one relay attempt achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub event_id: EventId,
    /// Users who now have the event (delivered or already present).
    pub delivered: BTreeSet<UserId>,
    /// Users still owed the event when the attempt ended.
    pub remaining: BTreeSet<UserId>,
}

pub struct Orchestrator<T: RelayTransport> {
    transport: T,
    ctx: HandshakeContext,
    handshake_timeout: Duration,
    seek_window: Duration,
    max_frame: usize,
    events: mpsc::Sender<RelayEvent>,
}

impl<T: RelayTransport> Orchestrator<T> {
    pub fn new(
        transport: T,
        ctx: HandshakeContext,
        config: &RelayConfig,
        events: mpsc::Sender<RelayEvent>,
    ) -> Self {
        Self {
            transport,
            ctx,
            handshake_timeout: config.handshake_timeout,
            seek_window: config.seek_window,
            max_frame: config.transport.max_frame(),
            events,
        }
    }

    /// Service jobs until `cancel` fires or the queue is closed.
    pub async fn run(mut self, mut jobs: JobReceiver, cancel: CancellationToken) {
        tracing::info!("relay orchestrator started");
        while let Some(job) = jobs.next(&cancel).await {
            let summary = self.service(job, &cancel).await;
            self.emit(RelayEvent::JobFinished { summary });
            if cancel.is_cancelled() {
                break;
            }
        }
        tracing::info!("relay orchestrator stopped");
    }

    /// One relay attempt for `job`.
    ///
    /// Each peer address is dialed at most once per attempt. A failed dial is
    /// logged and seeking continues; successful dials run their handshakes
    /// concurrently while seeking goes on.
    pub async fn service(&mut self, job: RelayJob, cancel: &CancellationToken) -> JobSummary {
        tracing::info!(
            "relaying {} to {} missing member(s)",
            job.event_id(),
            job.missing().len()
        );
        self.emit(RelayEvent::RelayStarted {
            event_id: job.event_id().clone(),
            missing: job.missing().clone(),
        });

        let job = Arc::new(job);
        let mut remaining = job.missing().clone();
        let mut delivered = BTreeSet::new();
        let mut dialed: HashSet<SocketAddr> = HashSet::new();
        let mut tasks: JoinSet<HandshakeResult> = JoinSet::new();
        let mut seeking = true;

        let window = tokio::time::sleep(self.seek_window);
        tokio::pin!(window);

        while !remaining.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut window => {
                    tracing::debug!("seek window for {} closed", job.event_id());
                    break;
                }
                Some(joined) = tasks.join_next() => {
                    self.record(&job, joined, &mut remaining, &mut delivered);
                    if !seeking && tasks.is_empty() {
                        break;
                    }
                }
                peer = self.transport.next_peer(), if seeking => {
                    let Some(addr) = peer else {
                        tracing::debug!("peer discovery ended");
                        seeking = false;
                        if tasks.is_empty() {
                            break;
                        }
                        continue;
                    };
                    if !dialed.insert(addr) {
                        continue;
                    }
                    let connected = tokio::select! {
                        _ = cancel.cancelled() => break,
                        res = self.transport.connect(addr) => res,
                    };
                    match connected {
                        Ok(io) => self.spawn_handshake(&mut tasks, addr, io, &job, cancel),
                        Err(e) => {
                            tracing::warn!("connect to {addr} failed: {e}");
                            self.emit(RelayEvent::PeerConnectFailed {
                                addr,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            self.record(&job, joined, &mut remaining, &mut delivered);
        }

        if remaining.is_empty() {
            tracing::info!("{} relayed to every missing member", job.event_id());
        } else {
            tracing::info!(
                "{} still owed to {} member(s)",
                job.event_id(),
                remaining.len()
            );
        }
        JobSummary {
            event_id: job.event_id().clone(),
            delivered,
            remaining,
        }
    }

    fn spawn_handshake(
        &self,
        tasks: &mut JoinSet<HandshakeResult>,
        addr: SocketAddr,
        io: T::Io,
        job: &Arc<RelayJob>,
        cancel: &CancellationToken,
    ) {
        tracing::debug!("connected to {addr}, starting handshake");
        let ctx = self.ctx.clone();
        let job = Arc::clone(job);
        let cancel = cancel.clone();
        let timeout = self.handshake_timeout;
        let max_frame = self.max_frame;
        tasks.spawn(async move {
            let res = with_deadline(timeout, &cancel, async {
                let mut stream = PeerStream::open(io, max_frame).await?;
                run_sender(&ctx, &mut stream, &job).await
            })
            .await;
            (addr, res)
        });
    }

    fn record(
        &self,
        job: &RelayJob,
        joined: Result<HandshakeResult, JoinError>,
        remaining: &mut BTreeSet<UserId>,
        delivered: &mut BTreeSet<UserId>,
    ) {
        let (addr, result) = match joined {
            Ok(res) => res,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!("handshake task panicked: {e}");
                }
                return;
            }
        };
        match &result {
            Ok(report) => {
                tracing::debug!("handshake with {addr} ({}): {}", report.peer, report.outcome);
                if report.outcome.peer_has_event() {
                    remaining.remove(&report.peer.user_id);
                    delivered.insert(report.peer.user_id.clone());
                }
            }
            Err(e) => tracing::warn!("handshake with {addr} failed: {e}"),
        }
        self.emit(RelayEvent::HandshakeFinished {
            event_id: job.event_id().clone(),
            addr,
            result: result.map_err(|e| e.to_string()),
        });
    }

    fn emit(&self, event: RelayEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("relay event channel full or closed");
        }
    }
}
