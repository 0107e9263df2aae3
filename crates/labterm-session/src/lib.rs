//! labterm-session: session registry and window orchestration for labterm.
//!
//! Sessions outlive the windows showing them. The registry owns each driver
//! and a bounded scrollback; any number of surfaces subscribe to the event
//! bridge and bind to sessions by ID.
//!
//! # Architecture
//!
//! - [`SessionRegistry`] — Live sessions keyed by ID: create, write, resize,
//!   snapshot, idempotent dispose.
//! - [`Bridge`] — Fan-out of [`BridgeEvent`]s to every subscribed surface,
//!   in per-session order.
//! - [`Orchestrator`] — Binds surfaces to sessions: create, attach with
//!   scrollback replay, detach into a new window, merge back.
//! - [`HostnameSniffer`] — Relabels tabs from device prompts.
//! - [`ConnectWatch`] — Tells client chatter from the remote device while
//!   connecting.

pub mod bridge;
pub mod error;
mod io_thread;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod ring_buffer;
pub mod session;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeEvent, SubscriberId, Subscription};
pub use error::{SessionError, SessionResult};
pub use orchestrator::{BindingState, DetachRequest, Orchestrator, WindowHost};
pub use prompt::{ConnectWatch, HostnameSniffer};
pub use registry::{RegistryConfig, SessionRegistry};
pub use ring_buffer::RingBuffer;
pub use session::{
    default_label, validate_port, CreateRequest, LabelSource, SessionId, SessionInfo,
    SessionMeta, SessionStatus, SurfaceId, DEFAULT_TELNET_PORT,
};
