//! # Request / Response Envelopes
//!
//! Typed messages exchanged between the consensus engine and the
//! application. The same types are used by the socket transport (bincode
//! inside length-prefixed frames, see [`codec`](super::codec)) and by the
//! embedded transport (passed by value, no encoding).
//!
//! ## Method Index
//!
//! | Request      | Response     | Description                               |
//! |--------------|--------------|-------------------------------------------|
//! | `Echo`       | `Echo`       | liveness probe                            |
//! | `Flush`      | `Flush`      | flush buffered responses                  |
//! | `Info`       | `Info`       | last committed height and app hash        |
//! | `InitChain`  | `InitChain`  | genesis handshake                         |
//! | `Query`      | `Query`      | committed-state key lookup                |
//! | `BeginBlock` | `BeginBlock` | open the block's write batch              |
//! | `CheckTx`    | `CheckTx`    | mempool admission check                   |
//! | `DeliverTx`  | `DeliverTx`  | execute a transaction in the open block   |
//! | `EndBlock`   | `EndBlock`   | end of block transactions                 |
//! | `Commit`     | `Commit`     | persist the block, return new app hash    |
//!
//! Any request can instead be answered with `Exception` when the application
//! refuses it (protocol misuse or a halted application).

use serde::{Deserialize, Serialize};

use crate::config::CODE_OK;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A request from the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Echo(RequestEcho),
    Flush,
    Info(RequestInfo),
    InitChain(RequestInitChain),
    Query(RequestQuery),
    BeginBlock(RequestBeginBlock),
    CheckTx(RequestCheckTx),
    DeliverTx(RequestDeliverTx),
    EndBlock(RequestEndBlock),
    Commit,
}

impl Request {
    /// Method name, for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Request::Echo(_) => "echo",
            Request::Flush => "flush",
            Request::Info(_) => "info",
            Request::InitChain(_) => "init_chain",
            Request::Query(_) => "query",
            Request::BeginBlock(_) => "begin_block",
            Request::CheckTx(_) => "check_tx",
            Request::DeliverTx(_) => "deliver_tx",
            Request::EndBlock(_) => "end_block",
            Request::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEcho {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Engine software version.
    pub version: String,
    pub block_version: u64,
    pub p2p_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInitChain {
    pub chain_id: String,
    /// Genesis time, seconds since the Unix epoch.
    pub time_seconds: i64,
    pub app_state_bytes: Vec<u8>,
    pub initial_height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQuery {
    pub data: Vec<u8>,
    pub path: String,
    /// Accepted and ignored: only the latest committed state is served.
    pub height: u64,
    /// Accepted and ignored: proofs are not produced.
    pub prove: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBeginBlock {
    pub hash: Vec<u8>,
    pub height: u64,
    pub proposer_address: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCheckTx {
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDeliverTx {
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEndBlock {
    pub height: u64,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A response to the consensus engine. Always the variant matching the
/// request, or `Exception`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Exception(ResponseException),
    Echo(ResponseEcho),
    Flush,
    Info(ResponseInfo),
    InitChain(ResponseInitChain),
    Query(ResponseQuery),
    BeginBlock(ResponseBeginBlock),
    CheckTx(ResponseCheckTx),
    DeliverTx(ResponseDeliverTx),
    EndBlock(ResponseEndBlock),
    Commit(ResponseCommit),
}

impl Response {
    /// Method name, for logs. Exceptions report `"exception"`.
    pub fn method(&self) -> &'static str {
        match self {
            Response::Exception(_) => "exception",
            Response::Echo(_) => "echo",
            Response::Flush => "flush",
            Response::Info(_) => "info",
            Response::InitChain(_) => "init_chain",
            Response::Query(_) => "query",
            Response::BeginBlock(_) => "begin_block",
            Response::CheckTx(_) => "check_tx",
            Response::DeliverTx(_) => "deliver_tx",
            Response::EndBlock(_) => "end_block",
            Response::Commit(_) => "commit",
        }
    }

    pub fn exception(error: impl Into<String>) -> Self {
        Response::Exception(ResponseException {
            error: error.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseException {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEcho {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    /// Application name.
    pub data: String,
    pub version: String,
    pub app_version: u64,
    pub last_block_height: u64,
    /// Empty before the first commit.
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInitChain {
    /// Empty: genesis state carries no application data.
    pub app_hash: Vec<u8>,
    pub validators: Vec<ValidatorUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseQuery {
    pub code: u32,
    pub log: String,
    pub key: Vec<u8>,
    /// `None` when the key is not in committed state.
    pub value: Option<Vec<u8>>,
    /// Height of the state the answer was read from.
    pub height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBeginBlock {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCheckTx {
    pub code: u32,
    pub log: String,
}

impl ResponseCheckTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDeliverTx {
    pub code: u32,
    pub log: String,
}

impl ResponseDeliverTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCommit {
    pub height: u64,
    pub app_hash: Vec<u8>,
}

/// A change to the validator set. This application never emits any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: Vec<u8>,
    pub power: i64,
}
