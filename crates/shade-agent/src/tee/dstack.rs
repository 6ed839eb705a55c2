//! dstack capability - intel tdx guest agent
//!
//! talks json over http to the guest agent, either through its unix socket
//! (`/var/run/dstack.sock`) or through a plain url when running against the
//! simulator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::tee::{TcbReport, TeeCapability, REPORT_DATA_SIZE};
use crate::{Error, Result};

/// well-known guest agent socket
pub const DEFAULT_SOCKET: &str = "/var/run/dstack.sock";

/// env var pointing at a simulator url
pub const SIMULATOR_ENV: &str = "DSTACK_SIMULATOR_ENDPOINT";

enum Transport {
    #[cfg(unix)]
    Unix(PathBuf),
    Http { url: String, http: reqwest::Client },
}

/// guest agent client
pub struct DstackClient {
    transport: Transport,
}

#[derive(Deserialize)]
struct InfoResponse {
    /// json encoded string on current agents, an object on older ones
    tcb_info: Value,
}

#[derive(Deserialize)]
struct QuoteResponse {
    quote: String,
}

#[derive(Deserialize)]
struct KeyResponse {
    key: String,
}

impl DstackClient {
    /// client over a unix socket
    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            transport: Transport::Unix(path.into()),
        }
    }

    /// client over http (simulator)
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: Transport::Http {
                url: url.into().trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
            },
        }
    }

    /// find a live guest agent, `None` when not running in a tee
    pub async fn probe() -> Option<Self> {
        let client = match std::env::var(SIMULATOR_ENV) {
            Ok(url) => {
                debug!("using dstack simulator at {}", url);
                Self::http(url)
            }
            Err(_) => Self::local_socket()?,
        };

        if client.is_live().await {
            info!("tee detected");
            Some(client)
        } else {
            warn!("dstack endpoint present but not responding, running without tee");
            None
        }
    }

    #[cfg(unix)]
    fn local_socket() -> Option<Self> {
        if !Path::new(DEFAULT_SOCKET).exists() {
            debug!("no dstack socket at {}, running without tee", DEFAULT_SOCKET);
            return None;
        }
        Some(Self::unix(DEFAULT_SOCKET))
    }

    #[cfg(not(unix))]
    fn local_socket() -> Option<Self> {
        None
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let body = serde_json::to_vec(&payload)?;
        let bytes = match &self.transport {
            #[cfg(unix)]
            Transport::Unix(path) => post_unix(path, method, body).await?,
            Transport::Http { url, http } => {
                let resp = http
                    .post(format!("{}/{}", url, method))
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| Error::Tee(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(Error::Tee(format!("{} returned {}", method, resp.status())));
                }
                resp.bytes().await.map_err(|e| Error::Tee(e.to_string()))?.to_vec()
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::Tee(format!("{}: {}", method, e)))
    }
}

#[cfg(unix)]
async fn post_unix(path: &Path, method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::header::{CONTENT_TYPE, HOST};
    use hyper_util::rt::TokioIo;

    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| Error::Tee(format!("connect {}: {}", path.display(), e)))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::Tee(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("dstack connection closed: {}", e);
        }
    });

    let req = hyper::Request::post(format!("/{}", method))
        .header(HOST, "localhost")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| Error::Tee(e.to_string()))?;
    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| Error::Tee(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Tee(format!("{} returned {}", method, status)));
    }
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Tee(e.to_string()))?
        .to_bytes();
    Ok(bytes.to_vec())
}

fn parse_tcb_info(raw: Value) -> Result<TcbReport> {
    let parsed = match raw {
        Value::String(s) => serde_json::from_str(&s),
        other => serde_json::from_value(other),
    };
    parsed.map_err(|e| Error::InvalidTcbInfo(e.to_string()))
}

#[async_trait]
impl TeeCapability for DstackClient {
    async fn info(&self) -> Result<TcbReport> {
        let info: InfoResponse = self.rpc("Info", json!({})).await?;
        parse_tcb_info(info.tcb_info)
    }

    async fn get_quote(&self, report_data: &[u8; REPORT_DATA_SIZE]) -> Result<Vec<u8>> {
        let resp: QuoteResponse = self
            .rpc("GetQuote", json!({ "report_data": hex::encode(report_data) }))
            .await?;
        hex::decode(resp.quote.trim_start_matches("0x"))
            .map_err(|e| Error::Tee(format!("quote is not hex: {}", e)))
    }

    async fn derive_key(&self, material: &str) -> Result<Vec<u8>> {
        let resp: KeyResponse = self
            .rpc("GetKey", json!({ "path": material, "purpose": "" }))
            .await?;
        hex::decode(resp.key.trim_start_matches("0x"))
            .map_err(|e| Error::Tee(format!("key is not hex: {}", e)))
    }
}
