//! # Application Interface
//!
//! The application state machine and the two ways a consensus engine can
//! reach it:
//!
//! - **socket**: out of process, length-prefixed frames over a unix or TCP
//!   socket ([`server`], with [`client`] as the engine side),
//! - **embedded**: in process, direct calls through [`local::LocalClient`].
//!
//! Both paths end in [`Application::dispatch`] and share its semantics.

pub mod application;
pub mod client;
pub mod codec;
pub mod local;
pub mod net;
pub mod server;
pub mod types;

pub use application::{AppError, Application, Phase};
pub use client::{ClientError, SocketClient};
pub use local::{ConsensusEngine, EngineContext, LocalClient};
pub use net::ListenAddr;
pub use server::{ServerError, SocketServer};
pub use types::{Request, Response};
