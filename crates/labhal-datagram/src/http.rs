use std::collections::BTreeMap;

use labhal_transport::{Backend, HttpMethod, HttpRequest, Transport};

use crate::datagram::Datagram;
use crate::error::Result;

/// One HTTP request against an HTTP transport.
///
/// `send` stages the method, form body and headers on the transport and then
/// requests `url`. The response body is not read back, so `recv` does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpDatagram {
    pub url: String,
    pub method: HttpMethod,
    pub form: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl HttpDatagram {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            form: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn request(&self) -> HttpRequest {
        HttpRequest {
            method: self.method,
            form: self.form.clone(),
            headers: self.headers.clone(),
        }
    }
}

impl Datagram for HttpDatagram {
    fn send<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()> {
        transport.prepare_request(self.request())?;
        transport.send_raw(self.url.as_bytes())?;
        Ok(())
    }

    fn recv<B: Backend>(&mut self, _transport: &mut Transport<B>) -> Result<()> {
        Ok(())
    }
}
