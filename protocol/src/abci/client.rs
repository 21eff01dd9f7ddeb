//! Engine-side socket client.
//!
//! Speaks the same framing as [`SocketServer`](super::server::SocketServer).
//! Requests may be pipelined with [`send`](SocketClient::send) and collected
//! later with [`recv`](SocketClient::recv); responses arrive in send order.
//! The typed helpers do one round trip each.

use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};

use super::codec::{self, CodecError};
use super::net::{Connection, ListenAddr};
use super::types::*;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("application refused request: {0}")]
    Exception(String),

    #[error("expected {expected} response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("connection closed by the application")]
    Closed,
}

pub struct SocketClient {
    reader: BufReader<ReadHalf<Connection>>,
    writer: BufWriter<WriteHalf<Connection>>,
}

impl SocketClient {
    pub async fn connect(addr: &ListenAddr) -> Result<Self, ClientError> {
        let (reader, writer) = tokio::io::split(Connection::connect(addr).await?);
        Ok(Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        })
    }

    /// Buffer a request without waiting for its response.
    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        codec::write_message(&mut self.writer, request).await?;
        Ok(())
    }

    /// Push buffered requests to the socket.
    pub async fn flush(&mut self) -> Result<(), ClientError> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Next response in send order.
    pub async fn recv(&mut self) -> Result<Response, ClientError> {
        codec::read_message(&mut self.reader)
            .await?
            .ok_or(ClientError::Closed)
    }

    /// One round trip. Exceptions are returned as [`ClientError::Exception`].
    pub async fn request(&mut self, request: Request) -> Result<Response, ClientError> {
        self.send(&request).await?;
        self.flush().await?;
        match self.recv().await? {
            Response::Exception(e) => Err(ClientError::Exception(e.error)),
            response => Ok(response),
        }
    }

    pub async fn echo(&mut self, message: impl Into<String>) -> Result<ResponseEcho, ClientError> {
        let req = Request::Echo(RequestEcho {
            message: message.into(),
        });
        match self.request(req).await? {
            Response::Echo(res) => Ok(res),
            other => Err(unexpected("echo", &other)),
        }
    }

    pub async fn info(&mut self) -> Result<ResponseInfo, ClientError> {
        match self.request(Request::Info(RequestInfo::default())).await? {
            Response::Info(res) => Ok(res),
            other => Err(unexpected("info", &other)),
        }
    }

    pub async fn query(&mut self, key: &[u8]) -> Result<ResponseQuery, ClientError> {
        let req = Request::Query(RequestQuery {
            data: key.to_vec(),
            ..Default::default()
        });
        match self.request(req).await? {
            Response::Query(res) => Ok(res),
            other => Err(unexpected("query", &other)),
        }
    }

    pub async fn check_tx(&mut self, tx: &[u8]) -> Result<ResponseCheckTx, ClientError> {
        let req = Request::CheckTx(RequestCheckTx { tx: tx.to_vec() });
        match self.request(req).await? {
            Response::CheckTx(res) => Ok(res),
            other => Err(unexpected("check_tx", &other)),
        }
    }

    pub async fn begin_block(&mut self, height: u64) -> Result<ResponseBeginBlock, ClientError> {
        let req = Request::BeginBlock(RequestBeginBlock {
            height,
            ..Default::default()
        });
        match self.request(req).await? {
            Response::BeginBlock(res) => Ok(res),
            other => Err(unexpected("begin_block", &other)),
        }
    }

    pub async fn deliver_tx(&mut self, tx: &[u8]) -> Result<ResponseDeliverTx, ClientError> {
        let req = Request::DeliverTx(RequestDeliverTx { tx: tx.to_vec() });
        match self.request(req).await? {
            Response::DeliverTx(res) => Ok(res),
            other => Err(unexpected("deliver_tx", &other)),
        }
    }

    pub async fn end_block(&mut self, height: u64) -> Result<ResponseEndBlock, ClientError> {
        match self.request(Request::EndBlock(RequestEndBlock { height })).await? {
            Response::EndBlock(res) => Ok(res),
            other => Err(unexpected("end_block", &other)),
        }
    }

    pub async fn commit(&mut self) -> Result<ResponseCommit, ClientError> {
        match self.request(Request::Commit).await? {
            Response::Commit(res) => Ok(res),
            other => Err(unexpected("commit", &other)),
        }
    }
}

fn unexpected(expected: &'static str, got: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        got: got.method(),
    }
}
