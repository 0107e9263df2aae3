//! labterm-pty: transport drivers for labterm sessions.
//!
//! A transport opens a raw bidirectional byte channel to a lab device by
//! launching a Telnet client. The output half is a blocking reader meant for a
//! dedicated I/O thread; the control half writes input, resizes and kills.
//!
//! # Architecture
//!
//! - [`Transport`] — Opens a [`Connection`] for a [`Target`].
//! - [`PtyTransport`] — Runs the client inside a pseudo-terminal (full
//!   interactive fidelity: echo, control sequences, resize).
//! - [`PipeTransport`] — Degraded fallback that runs the client as a plain
//!   child process with piped stdio. Resize is a no-op.
//! - [`select_transport`] — Picks a variant once, at construction time.

pub mod pipe;
pub mod pty;
pub mod transport;

pub use pipe::PipeTransport;
pub use pty::{pty_available, PtyTransport};
pub use transport::{
    select_transport, shutdown, Connection, DriverControl, ExitInfo, LaunchCommand, Shutdown,
    Target, TermSize, Transport, TransportError, TransportKind, TransportMode,
};
