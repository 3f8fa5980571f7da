//! Offgrid relay layer.
//!
//! Delivers room events to members who missed them while the homeserver was
//! unreachable, by handing them over directly between devices on the local
//! network. Missing group keys are forwarded in the same handshake.
//!
//! Wire format: newline-delimited JSON (see `offgrid-transport`).
//! Crypto: Ed25519 identities, X25519 + XChaCha20-Poly1305 sealing.

pub mod config;
pub mod crypto;
pub mod detector;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod types;
pub mod wire;

pub use config::RelayConfig;
pub use crypto::{EncryptedPayload, GroupKey};
pub use detector::MissedDeliveryDetector;
pub use engine::{CryptoEngine, ExportError, ExportedSession, GroupDecryptError, MemoryCryptoEngine};
pub use error::RelayError;
pub use handshake::{
    run_receiver, run_sender, with_deadline, HandshakeContext, HandshakeOutcome, HandshakeReport,
    UndeliverableReason,
};
pub use job::RelayJob;
pub use orchestrator::{JobSummary, Orchestrator};
pub use queue::{relay_job_queue, EnqueueOutcome, JobReceiver, JobSender};
pub use runtime::{
    LanTransport, RelayChannels, RelayEvent, RelayHandle, RelayService, RelayTransport,
};
pub use store::{
    CachedDirectory, Clock, HistoryStore, ManualClock, Membership, MemoryHistory, RoomDirectory,
    RoomState, RoomStateCache, SystemClock,
};
pub use types::{
    now_ms, DeviceId, DeviceIdentity, EncryptedContent, EventContent, EventId, MessageContent,
    ReceiptContent, RoomEvent, RoomId, UserId,
};
pub use wire::{
    ForwardedRoomKey, KeyRequest, RelayPayload, RelayResult, RelayStatus, SealedBody, WireMessage,
};
