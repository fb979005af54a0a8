//! Per-peer connection state machines and their drivers.

mod conn;
mod machine;
mod repo;

#[doc(inline)]
pub use self::{
    conn::{ConnError, ConnectionManager},
    machine::{FailureOutcome, PeerPhase, PeerStateMachine},
    repo::PeerRepository,
};
