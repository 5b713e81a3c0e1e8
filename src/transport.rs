use std::{io::Write, sync::Arc, time::Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::{write::GzEncoder, Compression};
use reqwest::header;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{
    config::ClientConfig,
    serializer,
    types::Sizes,
    wire::{ErrorBody, SqlRequest},
    CrateDbError, Result,
};

/// One raw request/response exchange, before envelope decoding.
pub(crate) struct RawExchange {
    pub body: Vec<u8>,
    pub sizes: Sizes,
    /// Wall-clock milliseconds spent on the exchange.
    pub elapsed_ms: f64,
}

/// HTTP(S) transport for `POST /_sql?types`.
///
/// Owns a keep-alive connection pool and a semaphore bounding in-flight
/// requests at the pool size. Cursors construct their own transport with a
/// pool of exactly one to pin a single backend session.
pub(crate) struct Transport {
    http: reqwest::Client,
    endpoint: String,
    auth_header: Option<String>,
    default_schema: Option<String>,
    enable_compression: bool,
    compression_threshold: usize,
    limiter: Arc<Semaphore>,
}

impl Transport {
    pub fn new(config: &ClientConfig, pool_size: usize) -> Result<Self> {
        let pool_size = pool_size.max(1);
        let mut builder = reqwest::Client::builder();
        builder = if config.keep_alive {
            builder.pool_max_idle_per_host(pool_size)
        } else {
            builder.pool_max_idle_per_host(0)
        };
        let http = builder
            .build()
            .map_err(|err| CrateDbError::request("could not construct HTTP client", err))?;

        Ok(Self {
            http,
            endpoint: config.endpoint(),
            auth_header: auth_header(config),
            default_schema: config.default_schema.clone(),
            enable_compression: config.enable_compression,
            compression_threshold: config.compression_threshold,
            limiter: Arc::new(Semaphore::new(pool_size)),
        })
    }

    /// Sends one payload and returns the raw body on HTTP 200. Any other
    /// status is classified as a server error from the structured error
    /// body; transport-layer failures classify as request errors.
    pub async fn send(&self, payload: &SqlRequest<'_>) -> Result<RawExchange> {
        let raw_body = serializer::encode_payload(payload)?;
        let uncompressed_len = raw_body.len() as u64;

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|err| CrateDbError::request("connection limiter closed", err))?;

        let (body, compressed) = self.maybe_compress(raw_body)?;
        let request_len = body.len() as u64;
        debug!(
            bytes = request_len,
            compressed,
            endpoint = %self.endpoint,
            "dispatching sql request"
        );

        let started = Instant::now();
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .header(header::CONNECTION, "keep-alive")
            .body(body);
        if let Some(auth) = &self.auth_header {
            request = request.header(header::AUTHORIZATION, auth);
        }
        if let Some(schema) = &self.default_schema {
            request = request.header("Default-Schema", schema);
        }
        if compressed {
            request = request.header(header::CONTENT_ENCODING, "gzip");
        }

        let response = request
            .send()
            .await
            .map_err(|err| CrateDbError::request("request dispatch failed", err))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CrateDbError::request("could not read response body", err))?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        debug!(status = status.as_u16(), bytes = bytes.len(), elapsed_ms, "sql response received");

        if status.as_u16() != 200 {
            return Err(classify_error(status.as_u16(), &bytes));
        }

        Ok(RawExchange {
            body: bytes.to_vec(),
            sizes: Sizes {
                request: request_len,
                response: bytes.len() as u64,
                request_uncompressed: self.enable_compression.then_some(uncompressed_len),
            },
            elapsed_ms,
        })
    }

    fn maybe_compress(&self, body: Vec<u8>) -> Result<(Vec<u8>, bool)> {
        if !self.enable_compression || body.len() <= self.compression_threshold {
            return Ok((body, false));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&body)
            .and_then(|()| encoder.finish())
            .map(|compressed| (compressed, true))
            .map_err(|err| CrateDbError::request("gzip compression failed", err))
    }
}

fn auth_header(config: &ClientConfig) -> Option<String> {
    if let Some(jwt) = &config.jwt {
        return Some(format!("Bearer {jwt}"));
    }
    if !config.user.is_empty() && !config.password.is_empty() {
        let credentials = BASE64.encode(format!("{}:{}", config.user, config.password));
        return Some(format!("Basic {credentials}"));
    }
    None
}

fn classify_error(status: u16, body: &[u8]) -> CrateDbError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => CrateDbError::Server {
            message: parsed.error.message,
            code: parsed.error.code,
            error_trace: parsed.error_trace,
            status,
        },
        Err(_) => CrateDbError::Server {
            message: String::from_utf8_lossy(body).trim().to_owned(),
            code: 0,
            error_trace: None,
            status,
        },
    }
}
