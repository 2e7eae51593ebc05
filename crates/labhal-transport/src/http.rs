use std::time::Duration;

use bytes::Bytes;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use tracing::{debug, info};

use crate::config::{ConnectionParameters, HttpAuthMode, HttpConfig, HttpMethod, TimeoutKind, TransportKind};
use crate::error::{Result, TransportError};
use crate::traits::{Backend, HttpRequest};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP endpoint control (web power switches and similar).
///
/// Each `send` is one request whose URL is the sent bytes. Method, form
/// body and headers come from the last [`HttpRequest`] staged with
/// `prepare_request`. Responses are not read back.
pub struct Http {
    config: HttpConfig,
    timeout: Duration,
    client: Option<Client>,
    request: HttpRequest,
}

impl Http {
    pub fn new(params: &ConnectionParameters) -> Self {
        Self {
            config: params.http().clone(),
            timeout: params
                .timeout(TimeoutKind::Connect)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            client: None,
            request: HttpRequest::default(),
        }
    }

    /// The request settings staged for the next `send`.
    pub fn staged_request(&self) -> &HttpRequest {
        &self.request
    }

    fn authenticate(&self, client: &Client) -> Result<()> {
        if self.config.auth_url.is_empty() {
            return Ok(());
        }
        let url = format!("http://{}", self.config.auth_url);
        info!(%url, "logging in to http endpoint");
        let response = client
            .request(method(self.config.auth_method), &url)
            .form(&self.config.auth_data)
            .timeout(self.timeout)
            .send()?;
        check_status(&url, response.status())
    }

    fn with_credentials(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.config.auth_url.is_empty() && self.config.http_auth_mode == HttpAuthMode::Basic {
            builder.basic_auth(&self.config.login, Some(&self.config.password))
        } else {
            builder
        }
    }
}

impl Backend for Http {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn open(&mut self) -> Result<()> {
        debug!(url = %self.config.url, "connecting to http endpoint");
        let client = Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()?;
        self.authenticate(&client)?;
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let client = self.client.as_ref().ok_or(TransportError::NotOpen)?;
        let url = std::str::from_utf8(data)
            .map_err(|_| TransportError::Protocol("http url is not valid utf-8".to_string()))?;

        let mut builder = client
            .request(method(self.request.method), url)
            .timeout(self.timeout);
        if !self.request.form.is_empty() {
            builder = builder.form(&self.request.form);
        }
        for (name, value) in &self.request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = self.with_credentials(builder).send()?;
        check_status(url, response.status())
    }

    fn recv(&mut self, _size: Option<usize>) -> Result<Bytes> {
        Err(TransportError::unsupported(TransportKind::Http, "recv"))
    }

    fn query(&mut self, _data: &[u8], _size: Option<usize>) -> Result<Bytes> {
        Err(TransportError::unsupported(TransportKind::Http, "query"))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn prepare_request(&mut self, request: HttpRequest) -> Result<()> {
        self.request = request;
        Ok(())
    }
}

impl std::fmt::Debug for Http {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .field("open", &self.client.is_some())
            .field("request", &self.request)
            .finish()
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
    }
}

fn check_status(url: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}
