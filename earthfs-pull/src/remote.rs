//! Remote peer access: a shared URI stream plus per-reader fetchers.
//!
//! The traits exist so the pipeline can be driven by anything that yields a
//! URI stream; the production implementation speaks the `/efs` HTTP protocol
//! over `reqwest::blocking`.

use earthfs_core::{ContentUri, EfsError, PullConfig};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// A file fetched from the peer.
pub struct RemoteFile {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// The peer's line-delimited query stream. Exactly one exists per pull job,
/// shared by all readers under the connection mutex.
pub trait UriStream: Send {
    /// (Re)issue the query request. Errors are retried by the caller after a
    /// delay; an authentication round-trip counts as an error so the caller
    /// reconnects with the fresh cookie.
    fn reconnect(&mut self) -> Result<(), EfsError>;

    /// Next URI line. `Transient` on end-of-stream or a broken connection.
    fn read_uri(&mut self) -> Result<String, EfsError>;
}

/// Dereferences one URI. Each reader owns its fetcher, so downloads run in
/// parallel outside the connection mutex.
pub trait Fetch: Send {
    fn fetch(&mut self, uri: &ContentUri) -> Result<RemoteFile, EfsError>;
}

/// A replication peer a pull job can follow.
pub trait Peer {
    fn stream(&self) -> Box<dyn UriStream>;
    fn fetcher(&self) -> Box<dyn Fetch>;
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

struct HttpShared {
    host: String,
    username: String,
    password: String,
    query: String,
    client: reqwest::blocking::Client,
    /// Session cookie, written by the auth flow and read by every request.
    cookie: Mutex<Option<String>>,
}

impl HttpShared {
    /// Authenticate against `/efs/auth` and store the session cookie from
    /// the response. The stale cookie is cleared first so concurrent
    /// requests stop using it.
    fn auth(&self) -> Result<(), EfsError> {
        *self.cookie.lock().unwrap() = None;

        let resp = self
            .client
            .post(format!("{}/efs/auth", self.host))
            .json(&AuthRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .map_err(|e| EfsError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            warn!(host = %self.host, status = %resp.status(), "pull auth rejected");
            return Err(EfsError::AuthRequired);
        }

        let cookie = resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .ok_or(EfsError::AuthRequired)?;

        info!(host = %self.host, "pull session established");
        *self.cookie.lock().unwrap() = Some(cookie);
        Ok(())
    }

    fn cookie(&self) -> Option<String> {
        self.cookie.lock().unwrap().clone()
    }
}

/// HTTP peer implementing the `/efs` pull protocol.
pub struct HttpPeer {
    shared: Arc<HttpShared>,
}

impl HttpPeer {
    pub fn new(config: &PullConfig) -> Result<Self, EfsError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EfsError::Transient(e.to_string()))?;
        Ok(Self {
            shared: Arc::new(HttpShared {
                host: config.host.trim_end_matches('/').to_string(),
                username: config.username.clone(),
                password: config.password.clone(),
                query: config.query.clone(),
                client,
                cookie: Mutex::new(config.cookie.clone()),
            }),
        })
    }
}

impl Peer for HttpPeer {
    fn stream(&self) -> Box<dyn UriStream> {
        Box::new(HttpUriStream { shared: self.shared.clone(), lines: None })
    }

    fn fetcher(&self) -> Box<dyn Fetch> {
        Box::new(HttpFetcher { shared: self.shared.clone() })
    }
}

struct HttpUriStream {
    shared: Arc<HttpShared>,
    lines: Option<BufReader<reqwest::blocking::Response>>,
}

impl UriStream for HttpUriStream {
    fn reconnect(&mut self) -> Result<(), EfsError> {
        self.lines = None;

        let mut req = self
            .shared
            .client
            .get(format!("{}/efs/query", self.shared.host))
            .query(&[("count", "all")]);
        if !self.shared.query.is_empty() {
            req = req.query(&[("q", self.shared.query.as_str())]);
        }
        if let Some(cookie) = self.shared.cookie() {
            req = req.header(reqwest::header::COOKIE, cookie);
        }

        let resp = req.send().map_err(|e| EfsError::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::FORBIDDEN {
            self.shared.auth()?;
            // Reconnect again with the new cookie.
            return Err(EfsError::AuthRequired);
        }
        if !resp.status().is_success() {
            return Err(EfsError::Transient(format!(
                "query returned {}",
                resp.status()
            )));
        }
        self.lines = Some(BufReader::new(resp));
        Ok(())
    }

    fn read_uri(&mut self) -> Result<String, EfsError> {
        let read = match self.lines.as_mut() {
            Some(reader) => {
                let mut line = String::new();
                reader.read_line(&mut line).map(|n| (n, line))
            }
            None => return Err(EfsError::Transient("not connected".into())),
        };
        match read {
            Ok((0, _)) => {
                self.lines = None;
                Err(EfsError::Transient("stream ended".into()))
            }
            // Over-long lines come back intact; the URI parser rejects
            // anything past URI_MAX and the reader bubbles it.
            Ok((_, line)) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) => {
                self.lines = None;
                Err(EfsError::Transient(e.to_string()))
            }
        }
    }
}

struct HttpFetcher {
    shared: Arc<HttpShared>,
}

impl Fetch for HttpFetcher {
    fn fetch(&mut self, uri: &ContentUri) -> Result<RemoteFile, EfsError> {
        let mut req = self.shared.client.get(format!(
            "{}/efs/file/{}/{}",
            self.shared.host, uri.algo, uri.hash
        ));
        if let Some(cookie) = self.shared.cookie() {
            req = req.header(reqwest::header::COOKIE, cookie);
        }

        let resp = req.send().map_err(|e| EfsError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EfsError::Transient(format!(
                "fetch of {uri} returned {}",
                resp.status()
            )));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = resp
            .bytes()
            .map_err(|e| EfsError::Transient(e.to_string()))?
            .to_vec();
        Ok(RemoteFile { content_type, body })
    }
}
