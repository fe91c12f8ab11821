//! Wire protocol: strictly-tagged message types for both WebSocket
//! populations (agents, clients). Grounded on the teacher's `state.rs`
//! `LogEntry`/event broadcast shape, generalized per spec.md §9's
//! "reject unknown tags" redesign flag — see [`agent`] and [`client`].

pub mod agent;
pub mod client;

pub use agent::{AgentFrameError, AgentMessage, InboundAgentFrame, NodeHandshakeResponse, StartServerCommand};
pub use client::{ClientFrameError, ClientMessage, ErrorEvent};
