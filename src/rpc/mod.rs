//! Binary RPC transport.
//!
//! # Data Flow
//! ```text
//! Capability ─▶ client.rs (Transport::invoke) ══ TCP ══▶ server.rs ─▶ Registry
//!                   ▲                                         │
//!                   └──────────── wire.rs frames ◀────────────┘
//! ```
//!
//! # Design Decisions
//! - Length-delimited MessagePack frames; many calls share one connection
//! - Status codes follow the gRPC numbering
//! - Trace and deadline travel as string metadata on every request

pub mod client;
pub mod downstream;
pub mod server;
pub mod status;
pub mod wire;

pub use client::{ConnectPolicy, RpcClient, Transport};
pub use downstream::DownstreamTable;
pub use server::RpcServer;
pub use status::{Code, Status};
pub use wire::Encoding;
