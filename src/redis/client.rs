//! Minimal cluster client over plain TCP or mutual TLS
//!
//! Only the handful of read-only `CLUSTER` commands the topology verifier
//! needs are exposed.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use k8s_openapi::api::core::v1::Secret;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::resp::{RespError, RespValue, encode_command, parse};

/// Largest reply buffered before the connection gives up
pub const MAX_REPLY_LEN: usize = 64 * 1024 * 1024;
use crate::store::{ResourceStore, StoreError};
use crate::topology::{SlotEntry, SlotNode, SlotRange};

/// Errors that can occur talking to a cluster member
#[derive(Error, Debug)]
pub enum RedisClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] RespError),

    #[error("Server replied with error: {0}")]
    Server(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Reply exceeds {0} bytes")]
    ReplyTooLarge(usize),

    #[error("Connection closed by server")]
    Closed,

    #[error("Connection timeout")]
    Timeout,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("TLS secret not found: {0}")]
    SecretNotFound(String),

    #[error("Secret missing required key: {0}")]
    SecretMissingKey(String),

    #[error("Invalid UTF-8 in secret data")]
    InvalidUtf8,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type RedisClientResult<T> = Result<T, RedisClientError>;

/// TLS mode for cluster connections
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Plain TCP
    Disabled,
    /// Verify the server against `ca_cert_pem` and present a client certificate
    Mutual {
        ca_cert_pem: String,
        client_cert_pem: String,
        client_key_pem: String,
    },
}

/// Secret holding the CA that signed the server certificates.
pub fn server_cert_secret_name(database: &str) -> String {
    format!("{}-server-cert", database)
}

/// Secret holding the operator's client certificate pair.
pub fn client_cert_secret_name(database: &str) -> String {
    format!("{}-client-cert", database)
}

fn secret_key(secret: &Secret, key: &str) -> RedisClientResult<String> {
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| RedisClientError::SecretMissingKey("no data in secret".into()))?;

    let bytes = data
        .get(key)
        .ok_or_else(|| RedisClientError::SecretMissingKey(key.to_string()))?;

    String::from_utf8(bytes.0.clone()).map_err(|_| RedisClientError::InvalidUtf8)
}

async fn fetch_secret(
    secrets: &ResourceStore<Secret>,
    namespace: &str,
    name: &str,
) -> RedisClientResult<Secret> {
    secrets
        .get(namespace, name)
        .await?
        .ok_or_else(|| RedisClientError::SecretNotFound(name.to_string()))
}

/// Load the mutual-TLS material issued for `database`.
///
/// The CA comes from `{database}-server-cert` (`ca.crt`), the client pair from
/// `{database}-client-cert` (`tls.crt`, `tls.key`).
pub async fn fetch_tls_material(
    secrets: &ResourceStore<Secret>,
    namespace: &str,
    database: &str,
) -> RedisClientResult<TlsMode> {
    let server = fetch_secret(secrets, namespace, &server_cert_secret_name(database)).await?;
    let client = fetch_secret(secrets, namespace, &client_cert_secret_name(database)).await?;

    Ok(TlsMode::Mutual {
        ca_cert_pem: secret_key(&server, "ca.crt")?,
        client_cert_pem: secret_key(&client, "tls.crt")?,
        client_key_pem: secret_key(&client, "tls.key")?,
    })
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// One connection to one cluster member
pub struct RedisConnection {
    stream: Box<dyn Stream>,
    buf: BytesMut,
    timeout: Duration,
    max_reply_len: usize,
}

impl RedisConnection {
    /// Connect to `host:port`, wrapping the socket in TLS when requested.
    pub async fn connect(
        host: &str,
        port: u16,
        tls_mode: &TlsMode,
        timeout: Duration,
    ) -> RedisClientResult<Self> {
        let tcp = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| RedisClientError::Timeout)??;

        let stream: Box<dyn Stream> = match tls_mode {
            TlsMode::Disabled => Box::new(tcp),
            TlsMode::Mutual { .. } => {
                let connector = TlsConnector::from(Arc::new(build_client_config(tls_mode)?));
                let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
                    RedisClientError::TlsConfig(format!("invalid server name {}: {}", host, e))
                })?;
                let tls = tokio::time::timeout(timeout, connector.connect(server_name, tcp))
                    .await
                    .map_err(|_| RedisClientError::Timeout)??;
                Box::new(tls)
            }
        };

        tracing::debug!(
            host,
            port,
            tls = matches!(tls_mode, TlsMode::Mutual { .. }),
            "Cluster connection established"
        );

        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            timeout,
            max_reply_len: MAX_REPLY_LEN,
        })
    }

    /// Lower or raise the reply size limit.
    pub fn with_max_reply_len(mut self, max_reply_len: usize) -> Self {
        self.max_reply_len = max_reply_len;
        self
    }

    /// Send one command and read its reply. Error replies become
    /// `RedisClientError::Server`.
    pub async fn command(&mut self, args: &[&str]) -> RedisClientResult<RespValue> {
        let mut out = BytesMut::new();
        encode_command(args, &mut out);

        tokio::time::timeout(self.timeout, self.stream.write_all(&out))
            .await
            .map_err(|_| RedisClientError::Timeout)??;

        loop {
            if let Some((value, used)) = parse(&self.buf)? {
                self.buf.advance(used);
                return match value {
                    RespValue::Error(message) => Err(RedisClientError::Server(message)),
                    value => Ok(value),
                };
            }
            if self.buf.len() > self.max_reply_len {
                self.buf.clear();
                return Err(RedisClientError::ReplyTooLarge(self.max_reply_len));
            }

            let read = tokio::time::timeout(self.timeout, self.stream.read_buf(&mut self.buf))
                .await
                .map_err(|_| RedisClientError::Timeout)??;
            if read == 0 {
                return Err(RedisClientError::Closed);
            }
        }
    }

    async fn text_command(&mut self, args: &[&str]) -> RedisClientResult<String> {
        let reply = self.command(args).await?;
        reply
            .as_text()
            .ok_or_else(|| RedisClientError::UnexpectedReply(format!("{:?}", reply)))
    }

    /// `CLUSTER INFO` as raw `key:value` lines.
    pub async fn cluster_info(&mut self) -> RedisClientResult<String> {
        self.text_command(&["CLUSTER", "INFO"]).await
    }

    /// `CLUSTER NODES` as the raw table.
    pub async fn cluster_nodes(&mut self) -> RedisClientResult<String> {
        self.text_command(&["CLUSTER", "NODES"]).await
    }

    /// `CLUSTER SLOTS`, decoded.
    pub async fn cluster_slots(&mut self) -> RedisClientResult<Vec<SlotEntry>> {
        let reply = self.command(&["CLUSTER", "SLOTS"]).await?;
        decode_cluster_slots(&reply)
    }
}

/// Decode a `CLUSTER SLOTS` reply:
/// `[[start, end, [host, port, id?, ...], [host, port, id?, ...]...], ...]`.
pub fn decode_cluster_slots(reply: &RespValue) -> RedisClientResult<Vec<SlotEntry>> {
    let unexpected =
        |what: &str| RedisClientError::UnexpectedReply(format!("CLUSTER SLOTS: {}", what));

    let entries = reply.as_array().ok_or_else(|| unexpected("not an array"))?;
    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        let fields = entry.as_array().ok_or_else(|| unexpected("entry is not an array"))?;
        if fields.len() < 3 {
            return Err(unexpected("entry without a master"));
        }

        let slot = |v: &RespValue| {
            v.as_integer()
                .and_then(|i| u16::try_from(i).ok())
                .ok_or_else(|| unexpected("slot is not an integer"))
        };
        let range = SlotRange::new(slot(&fields[0])?, slot(&fields[1])?);

        let mut nodes = fields[2..]
            .iter()
            .map(|node| {
                let parts = node.as_array().ok_or_else(|| unexpected("node is not an array"))?;
                let host = parts
                    .first()
                    .and_then(RespValue::as_text)
                    .ok_or_else(|| unexpected("node without host"))?;
                let port = parts
                    .get(1)
                    .and_then(RespValue::as_integer)
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| unexpected("node without port"))?;
                let id = parts.get(2).and_then(RespValue::as_text);
                Ok(SlotNode { host, port, id })
            })
            .collect::<RedisClientResult<Vec<_>>>()?;

        let master = nodes.remove(0);
        out.push(SlotEntry {
            range,
            master,
            replicas: nodes,
        });
    }

    Ok(out)
}

// =============================================================================
// TLS Configuration
// =============================================================================

/// Parse PEM-encoded certificates into DER format
fn parse_pem_certificates(pem_data: &str) -> RedisClientResult<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data.as_bytes());

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            RedisClientError::InvalidCertificate(format!("Failed to parse certificate: {}", e))
        })?;

    if certs.is_empty() {
        return Err(RedisClientError::InvalidCertificate(
            "No certificates found in PEM data".to_string(),
        ));
    }

    Ok(certs)
}

fn parse_private_key(pem_data: &str) -> RedisClientResult<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data.as_bytes());

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            RedisClientError::InvalidCertificate(format!("Failed to parse private key: {}", e))
        })?
        .ok_or_else(|| {
            RedisClientError::InvalidCertificate("No private key found in PEM data".to_string())
        })
}

/// Build a rustls client config that verifies the server and authenticates
/// with the client pair.
fn build_client_config(tls_mode: &TlsMode) -> RedisClientResult<rustls::ClientConfig> {
    match tls_mode {
        TlsMode::Disabled => Err(RedisClientError::TlsConfig(
            "Cannot build TLS config for disabled TLS mode".to_string(),
        )),
        TlsMode::Mutual {
            ca_cert_pem,
            client_cert_pem,
            client_key_pem,
        } => {
            let mut root_store = rustls::RootCertStore::empty();
            for cert in parse_pem_certificates(ca_cert_pem)? {
                root_store.add(cert).map_err(|e| {
                    RedisClientError::InvalidCertificate(format!("Failed to add CA cert: {}", e))
                })?;
            }

            let chain = parse_pem_certificates(client_cert_pem)?;
            let key = parse_private_key(client_key_pem)?;

            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_client_auth_cert(chain, key)
                .map_err(|e| RedisClientError::TlsConfig(e.to_string()))
        }
    }
}
