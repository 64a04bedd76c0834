use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::SessionCell;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/96.0.4664.45 Safari/537.36";
const DASHBOARD_PREFIX: &str = "/jsc/gen_dashboard_";
const DASHBOARD_SUFFIX: &str = ".js\"";
const CSRF_COOKIE: &str = "csrftoken";

/// Credentials obtained by the login handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Script version token merged into every request body as `v`.
    pub version: String,
    pub csrf_token: String,
    pub cookie_header: String,
}

/// Splits a browser style `k=v; k2=v2` cookie string.
pub fn parse_cookies(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pulls the version token out of the dashboard page's script tag.
pub(crate) fn find_version_token(page: &str) -> Option<&str> {
    let mut tokens = page.match_indices(DASHBOARD_PREFIX).filter_map(|(at, _)| {
        let rest = &page[at + DASHBOARD_PREFIX.len()..];
        let end = rest.find(DASHBOARD_SUFFIX)?;
        let token = &rest[..end];
        (!token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            .then_some(token)
    });
    let token = tokens.next()?;
    // More than one candidate means the page layout changed under us.
    tokens.next().is_none().then_some(token)
}

/// [`Transport`] over HTTPS with cookie based login.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    cookies: BTreeMap<String, String>,
    session: Arc<SessionCell<SessionState>>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let cookies = config
            .cookies
            .as_deref()
            .map(parse_cookies)
            .unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        let origin = config.base_url.trim_end_matches('/').to_string();
        headers.insert(
            header::ORIGIN,
            HeaderValue::from_str(&origin).map_err(|e| Error::Config(e.to_string()))?,
        );
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(&format!("{origin}/intel"))
                .map_err(|e| Error::Config(e.to_string()))?,
        );

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .pool_max_idle_per_host(10);
        if let Some(proxy) = &config.proxy {
            info!(%proxy, "routing through proxy, concurrency limited to 1");
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| Error::Config(format!("proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: origin,
            cookies,
            session: Arc::new(SessionCell::new()),
        })
    }

    pub fn session(&self) -> &SessionCell<SessionState> {
        &self.session
    }

    /// Runs the login handshake now instead of on the first request.
    pub async fn connect(&self) -> Result<()> {
        self.session
            .get_or_refresh(|| self.login())
            .await
            .map(|_| ())
            .map_err(|e| Error::Login(e.to_string()))
    }

    async fn login(&self) -> std::result::Result<SessionState, TransportError> {
        let mut cookies = self.cookies.clone();
        let response = self
            .http
            .get(format!("{}/intel", self.base_url))
            .header(header::COOKIE, cookie_header(&cookies))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        for cookie in response.cookies() {
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }
        let page = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let Some(version) = find_version_token(&page) else {
            error!("cookie verification failed");
            return Err(TransportError::Login("dashboard version not found".into()));
        };
        let Some(csrf_token) = cookies.get(CSRF_COOKIE).cloned() else {
            error!("no csrf token issued");
            return Err(TransportError::Login("missing csrftoken cookie".into()));
        };

        info!(version, "logged in");
        Ok(SessionState {
            version: version.to_string(),
            csrf_token,
            cookie_header: cookie_header(&cookies),
        })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        method: &str,
        payload: Value,
    ) -> std::result::Result<Value, TransportError> {
        let session = self.session.get_or_refresh(|| self.login()).await?;

        let mut body = payload;
        if let Value::Object(map) = &mut body {
            map.insert("v".to_string(), Value::String(session.version.clone()));
        }

        let url = format!("{}/r/{method}", self.base_url);
        debug!(%url, "posting");
        let response = self
            .http
            .post(&url)
            .header(header::COOKIE, session.cookie_header.as_str())
            .header("x-csrftoken", session.csrf_token.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            return Err(TransportError::BadRequest);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(err) => {
                if self.session.invalidate(&session).await {
                    warn!(method, "session dropped after unparseable response");
                }
                Err(TransportError::Malformed(err.to_string()))
            }
        }
    }
}
