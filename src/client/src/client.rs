use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::message::Message;
use crate::opcodes::*;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Async client for a node's client protocol.
///
/// Keeps one lazily established connection; requests are serialised by
/// the connection mutex and the connection is dropped on any error so
/// the next call reconnects cleanly.
pub struct FluxClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl FluxClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_timeout(addr, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(addr: impl Into<String>, timeout: Duration) -> Self {
        FluxClient {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write a key; the returned message carries success, version and
    /// the HLC stamp, or the error string on quorum failure.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> io::Result<Message> {
        self.request(Message::request(OP_PUT, key, value)).await
    }

    /// Quorum read; `found`, `is_stale` and `error` describe the
    /// outcome.
    pub async fn get(&self, key: &str) -> io::Result<Message> {
        self.request(Message::request(OP_GET, key, Vec::new())).await
    }

    /// Read the node's local copy only, without a quorum.
    pub async fn get_local(&self, key: &str) -> io::Result<Message> {
        self.request(Message::request(OP_GET_LOCAL, key, Vec::new()))
            .await
    }

    /// Fetch the node's JSON status document.
    pub async fn stats(&self) -> io::Result<String> {
        let response = self.request(Message::request(OP_STATS, "", Vec::new())).await?;
        Ok(String::from_utf8_lossy(&response.value).to_string())
    }

    async fn request(&self, message: Message) -> io::Result<Message> {
        let mut conn = self.conn.lock().await;

        let result =
            tokio::time::timeout(self.timeout, Self::exchange(&self.addr, &mut conn, &message))
                .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                *conn = None;
                Err(e)
            }
            Err(_) => {
                *conn = None;
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("request to {} exceeded {:?}", self.addr, self.timeout),
                ))
            }
        }
    }

    async fn exchange(
        addr: &str,
        conn: &mut Option<TcpStream>,
        message: &Message,
    ) -> io::Result<Message> {
        let stream = match conn.take() {
            Some(stream) => conn.insert(stream),
            None => conn.insert(TcpStream::connect(addr).await?),
        };

        message.send_async(stream).await?;
        Message::receive_async(stream).await
    }
}
