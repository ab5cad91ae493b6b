//! Persistent-socket JSON request/reply client

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Connection settings for an instrument client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Instrument id routed by the server ("function_gen", "power_supply")
    pub instrument: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl ClientConfig {
    /// Default settings for an instrument id
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8888,
            instrument: instrument.into(),
            timeout_ms: 5_000,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Serialize)]
struct Request<'a> {
    instrument: &'a str,
    method: &'a str,
    args: &'a [Value],
    kwargs: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Client proxy for one instrument behind the shared server
///
/// Holds a single persistent connection; the internal lock guarantees at
/// most one in-flight request, so replies can never be attributed to the
/// wrong caller.
pub struct InstrumentClient {
    config: ClientConfig,
    conn: Mutex<Option<Conn>>,
}

impl InstrumentClient {
    /// Create a client (does not connect yet)
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Instrument id this client is bound to
    pub fn instrument(&self) -> &str {
        &self.config.instrument
    }

    /// Establish the persistent connection; a no-op when already live
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let addr = self.config.addr();
        let stream = timeout(self.config.timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::Timeout {
                method: "connect".to_string(),
                timeout: self.config.timeout(),
            })?
            .map_err(|e| ClientError::ConnectFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let (read, write) = stream.into_split();
        *guard = Some(Conn {
            reader: BufReader::new(read),
            writer: write,
        });
        info!("connected to instrument server at {}", addr);
        Ok(())
    }

    /// Drop the persistent connection
    pub async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            info!("disconnected from instrument server at {}", self.config.addr());
        }
    }

    /// Single request attempt; marks the connection dead on any transport
    /// failure so the retry layer knows to reconnect
    async fn send_request(
        &self,
        method: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let frame = serde_json::to_string(&Request {
            instrument: &self.config.instrument,
            method,
            args,
            kwargs,
        })?;
        debug!("-> {}", frame);

        let exchange = async {
            conn.writer.write_all(frame.as_bytes()).await?;
            conn.writer.write_all(b"\n").await?;
            conn.writer.flush().await?;

            let mut line = String::new();
            let n = conn.reader.read_line(&mut line).await?;
            Ok::<_, std::io::Error>((n, line))
        };

        let (n, line) = match timeout(self.config.timeout(), exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                *guard = None;
                return Err(ClientError::ConnectionLost(e.to_string()));
            }
            Err(_) => {
                *guard = None;
                return Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout: self.config.timeout(),
                });
            }
        };

        if n == 0 {
            *guard = None;
            return Err(ClientError::ConnectionLost(
                "server closed the connection".to_string(),
            ));
        }

        debug!("<- {}", line.trim_end());
        let reply: Reply = serde_json::from_str(&line)?;
        if let Some(error) = reply.error {
            return Err(ClientError::Server(error));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// Issue a request with positional arguments
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.call_with_kwargs(method, args, Map::new()).await
    }

    /// Issue a request, retrying once through a reconnect on transport
    /// failure
    ///
    /// If the reconnect itself fails, the ORIGINAL error propagates; a
    /// second request failure propagates as-is.
    pub async fn call_with_kwargs(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        match self.send_request(method, &args, &kwargs).await {
            Err(original) if original.is_transport() => {
                warn!(
                    "instrument link failed ({}), attempting one reconnect",
                    original
                );
                if self.connect().await.is_err() {
                    return Err(original);
                }
                self.send_request(method, &args, &kwargs).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn config_for(port: u16, timeout_ms: u64) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            instrument: "function_gen".to_string(),
            timeout_ms,
        }
    }

    /// Server answering every request with {"result": <method name>}
    async fn echo_server(listener: TcpListener) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let request: Value = serde_json::from_str(&line).unwrap();
                    let reply = serde_json::json!({ "result": request["method"] });
                    write
                        .write_all(format!("{}\n", reply).as_bytes())
                        .await
                        .unwrap();
                }
            });
        }
    }

    #[tokio::test]
    async fn call_round_trips_method_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(echo_server(listener));

        let client = InstrumentClient::new(config_for(port, 1_000));
        client.connect().await.unwrap();

        let result = client
            .call("set_output", vec![Value::from(1), Value::from(1)])
            .await
            .unwrap();
        assert_eq!(result, Value::from("set_output"));
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = requests.clone();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                seen.fetch_add(1, Ordering::SeqCst);
                write
                    .write_all(b"{\"error\": \"unknown method\"}\n")
                    .await
                    .unwrap();
            }
        });

        let client = InstrumentClient::new(config_for(port, 1_000));
        client.connect().await.unwrap();

        let err = client.call("bogus", vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_connection_reconnects_exactly_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counted = connections.clone();

        tokio::spawn(async move {
            // First connection is dropped without an answer; the second is
            // served normally.
            let (first, _) = listener.accept().await.unwrap();
            counted.fetch_add(1, Ordering::SeqCst);
            drop(first);

            let (stream, _) = listener.accept().await.unwrap();
            counted.fetch_add(1, Ordering::SeqCst);
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                write.write_all(b"{\"result\": 42}\n").await.unwrap();
            }
        });

        let client = InstrumentClient::new(config_for(port, 1_000));
        client.connect().await.unwrap();

        let result = client.call("get_output", vec![Value::from(1)]).await.unwrap();
        assert_eq!(result, Value::from(42));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reconnect_propagates_original_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = InstrumentClient::new(config_for(port, 200));
        client.connect().await.unwrap();

        // Kill the server entirely: the in-flight request breaks and the
        // reconnect attempt is refused.
        let (accepted, _) = listener.accept().await.unwrap();
        drop(accepted);
        drop(listener);

        let err = client.call("get_output", vec![]).await.unwrap_err();
        assert!(err.is_transport(), "expected transport error, got {err}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            // Accept connections but never answer.
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                std::mem::forget(stream);
            }
        });

        let client = InstrumentClient::new(config_for(port, 50));
        client.connect().await.unwrap();

        let err = client.call("get_output", vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
    }
}
