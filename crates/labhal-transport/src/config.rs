use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: f64 = 30.0;
/// Default receive timeout in seconds.
pub const DEFAULT_RECV_TIMEOUT: f64 = 15.0;
/// Default send timeout in seconds.
pub const DEFAULT_SEND_TIMEOUT: f64 = 15.0;

pub const DEFAULT_READ_TERMINATOR: &str = "\n";
pub const DEFAULT_WRITE_TERMINATOR: &str = "\r\n";

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_DATA_BITS: u8 = 8;

pub const DEFAULT_HISLIP_VENDOR_ID: &str = "xx";
pub const DEFAULT_HISLIP_SUB_ADDRESS: &str = "hislip0";
/// IANA-registered HiSLIP port, used when no port is configured.
pub const DEFAULT_HISLIP_PORT: u16 = 4880;

/// The concrete backend a [`ConnectionParameters`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Socket,
    Usbtmc,
    Vxi11,
    Http,
    Dmx,
    Visa,
    Hislip,
    Remote,
    Loopback,
}

impl TransportKind {
    pub const ALL: [TransportKind; 10] = [
        TransportKind::Serial,
        TransportKind::Socket,
        TransportKind::Usbtmc,
        TransportKind::Vxi11,
        TransportKind::Http,
        TransportKind::Dmx,
        TransportKind::Visa,
        TransportKind::Hislip,
        TransportKind::Remote,
        TransportKind::Loopback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Serial => "serial",
            TransportKind::Socket => "socket",
            TransportKind::Usbtmc => "usbtmc",
            TransportKind::Vxi11 => "vxi11",
            TransportKind::Http => "http",
            TransportKind::Dmx => "dmx",
            TransportKind::Visa => "visa",
            TransportKind::Hislip => "hislip",
            TransportKind::Remote => "remote",
            TransportKind::Loopback => "loopback",
        }
    }

    /// Whether this kind addresses its instrument by network host and port.
    pub fn needs_host(self) -> bool {
        matches!(self, TransportKind::Socket | TransportKind::Hislip)
    }

    /// Whether this kind addresses its instrument by resource string.
    pub fn needs_resource(self) -> bool {
        matches!(
            self,
            TransportKind::Serial
                | TransportKind::Usbtmc
                | TransportKind::Vxi11
                | TransportKind::Dmx
                | TransportKind::Visa
        )
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the three configured timeouts to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Recv,
    Send,
}

/// Serial parity, serialized as its single-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "O")]
    Odd,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "M")]
    Mark,
    #[serde(rename = "S")]
    Space,
}

/// Serial stop bits, serialized as `1`, `1.5` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl TryFrom<f32> for StopBits {
    type Error = String;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(StopBits::One)
        } else if value == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if value == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(format!("unsupported stop bits {value}"))
        }
    }
}

impl From<StopBits> for f32 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

/// Serial flow control, serialized as the VISA `ASRL_FLOW` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FlowControl {
    #[default]
    None,
    XonXoff,
    RtsCts,
    DtrDsr,
}

impl FlowControl {
    pub fn code(self) -> u8 {
        match self {
            FlowControl::None => 0,
            FlowControl::XonXoff => 1,
            FlowControl::RtsCts => 2,
            FlowControl::DtrDsr => 4,
        }
    }
}

impl TryFrom<u8> for FlowControl {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FlowControl::None),
            1 => Ok(FlowControl::XonXoff),
            2 => Ok(FlowControl::RtsCts),
            4 => Ok(FlowControl::DtrDsr),
            other => Err(format!("unsupported flow control code {other}")),
        }
    }
}

impl From<FlowControl> for u8 {
    fn from(value: FlowControl) -> Self {
        value.code()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminatorConfig {
    pub read: String,
    pub write: String,
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            read: DEFAULT_READ_TERMINATOR.to_string(),
            write: DEFAULT_WRITE_TERMINATOR.to_string(),
        }
    }
}

/// Timeouts in seconds. A negative value means "leave the current timeout unchanged".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub connect: f64,
    pub recv: f64,
    pub send: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            recv: DEFAULT_RECV_TIMEOUT,
            send: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: StopBits::default(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: i64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: -1,
        }
    }
}

impl NetworkConfig {
    /// `host:port`, as used for connecting and diagnostics.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpAuthMode {
    #[default]
    None,
    Basic,
    Digest,
}

/// HTTP method used for requests and for the login form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    pub url: String,
    pub http_auth_mode: HttpAuthMode,
    pub login: String,
    pub password: String,
    /// Login form endpoint, without scheme. When set it replaces `http_auth_mode`.
    pub auth_url: String,
    pub auth_method: HttpMethod,
    pub auth_data: BTreeMap<String, String>,
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("url", &self.url)
            .field("http_auth_mode", &self.http_auth_mode)
            .field("login", &self.login)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .field("auth_url", &self.auth_url)
            .field("auth_method", &self.auth_method)
            .field("auth_data_keys", &self.auth_data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HislipConfig {
    pub vendor_id: String,
    pub sub_address: String,
}

impl Default for HislipConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_HISLIP_VENDOR_ID.to_string(),
            sub_address: DEFAULT_HISLIP_SUB_ADDRESS.to_string(),
        }
    }
}

/// Unvalidated connection settings as supplied by the caller.
///
/// Every field has a default, so a JSON document only needs the keys it
/// changes. Turn it into [`ConnectionParameters`] before use.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// VISA-style resource string, e.g. `USB0::0x0957::0x1798::MY1234::INSTR`.
    pub resource: String,
    /// Explicit transport; auto-selected from `resource`/`network` when absent.
    pub interface: Option<TransportKind>,
    pub terminator: TerminatorConfig,
    pub timeout: TimeoutConfig,
    pub serial: SerialConfig,
    pub network: NetworkConfig,
    pub http: HttpConfig,
    pub hislip: HislipConfig,
    /// Address of a remote board that owns the instrument. Forces the remote transport.
    pub board_address: String,
}

/// Validated, immutable connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParameters {
    config: ConnectionConfig,
    kind: TransportKind,
    inner_kind: TransportKind,
    timeouts: [Option<Duration>; 3],
}

impl ConnectionParameters {
    /// Validate `config` and resolve its transport kind.
    pub fn new(config: ConnectionConfig) -> Result<Self, ConfigError> {
        let has_resource = !config.resource.is_empty();
        let has_host = !config.network.host.is_empty();

        if has_resource && has_host {
            return Err(ConfigError::ResourceAndHost {
                resource: config.resource.clone(),
                host: config.network.host.clone(),
            });
        }

        let inner_kind = match config.interface {
            Some(TransportKind::Remote) | None => auto_select(&config)?,
            Some(kind) => kind,
        };

        if has_host {
            let port = config.network.port;
            debug!(host = %config.network.host, port, "checking socket port");
            // HiSLIP falls back to its registered port.
            let defaulted = port == -1 && inner_kind == TransportKind::Hislip;
            if !defaulted && !(0..=65535).contains(&port) {
                return Err(ConfigError::PortOutOfRange(port));
            }
        }

        if inner_kind.needs_host() && !has_host {
            return Err(ConfigError::MissingTarget);
        }
        if inner_kind.needs_resource() && !has_resource {
            return Err(ConfigError::MissingTarget);
        }

        let timeouts = [
            timeout_from_secs(TimeoutKind::Connect, config.timeout.connect)?,
            timeout_from_secs(TimeoutKind::Recv, config.timeout.recv)?,
            timeout_from_secs(TimeoutKind::Send, config.timeout.send)?,
        ];

        validate_serial(&config.serial)?;
        if inner_kind == TransportKind::Http {
            validate_http(&config.http)?;
        }
        if inner_kind == TransportKind::Hislip {
            validate_hislip(&config.hislip)?;
        }

        let kind = if !config.board_address.is_empty()
            || config.interface == Some(TransportKind::Remote)
        {
            if config.board_address.is_empty() {
                return Err(ConfigError::MissingBoardAddress);
            }
            TransportKind::Remote
        } else {
            inner_kind
        };

        debug!(%kind, %inner_kind, "resolved transport kind");

        Ok(Self {
            config,
            kind,
            inner_kind,
            timeouts,
        })
    }

    /// Parse a JSON configuration document and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ConnectionConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    /// The transport to construct locally.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The transport that talks to the instrument itself.
    ///
    /// Equal to [`kind`](Self::kind) unless a remote board owns the instrument,
    /// in which case this is the kind the board should use.
    pub fn inner_kind(&self) -> TransportKind {
        self.inner_kind
    }

    /// Human-readable connection name (`host:port`, resource string or URL).
    pub fn name(&self) -> String {
        if !self.config.network.host.is_empty() {
            self.config.network.address()
        } else if !self.config.resource.is_empty() {
            self.config.resource.clone()
        } else if !self.config.http.url.is_empty() {
            self.config.http.url.clone()
        } else {
            self.inner_kind.to_string()
        }
    }

    pub fn resource(&self) -> &str {
        &self.config.resource
    }

    pub fn read_terminator(&self) -> &[u8] {
        self.config.terminator.read.as_bytes()
    }

    pub fn write_terminator(&self) -> &[u8] {
        self.config.terminator.write.as_bytes()
    }

    /// The configured timeout, or `None` when it is negative (leave unchanged).
    pub fn timeout(&self, kind: TimeoutKind) -> Option<Duration> {
        match kind {
            TimeoutKind::Connect => self.timeouts[0],
            TimeoutKind::Recv => self.timeouts[1],
            TimeoutKind::Send => self.timeouts[2],
        }
    }

    pub fn serial(&self) -> &SerialConfig {
        &self.config.serial
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.config.network
    }

    pub fn http(&self) -> &HttpConfig {
        &self.config.http
    }

    pub fn hislip(&self) -> &HislipConfig {
        &self.config.hislip
    }

    pub fn board_address(&self) -> &str {
        &self.config.board_address
    }

    /// The underlying settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl TryFrom<ConnectionConfig> for ConnectionParameters {
    type Error = ConfigError;

    fn try_from(config: ConnectionConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

/// Convert a configured timeout in seconds. Negative values yield `None`.
///
/// Non-finite values and values too large for a [`Duration`] are rejected.
pub fn timeout_from_secs(kind: TimeoutKind, secs: f64) -> Result<Option<Duration>, ConfigError> {
    if secs < 0.0 && secs.is_finite() {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| ConfigError::InvalidTimeout { kind, value: secs })
}

fn auto_select(config: &ConnectionConfig) -> Result<TransportKind, ConfigError> {
    let resource = config.resource.as_str();
    if !config.network.host.is_empty() {
        Ok(TransportKind::Socket)
    } else if resource.starts_with("USB") {
        Ok(TransportKind::Usbtmc)
    } else if resource.starts_with("ASRL") || resource.starts_with("/dev/") {
        Ok(TransportKind::Serial)
    } else if resource.starts_with("TCPIP") {
        Ok(TransportKind::Vxi11)
    } else if resource.is_empty() {
        Err(ConfigError::MissingTarget)
    } else {
        Err(ConfigError::UnknownResource(resource.to_string()))
    }
}

fn validate_serial(serial: &SerialConfig) -> Result<(), ConfigError> {
    if serial.baud_rate == 0 {
        return Err(ConfigError::Serial("baud rate must be positive".to_string()));
    }
    if !(5..=8).contains(&serial.data_bits) {
        return Err(ConfigError::Serial(format!(
            "data bits {} out of range (5..=8)",
            serial.data_bits
        )));
    }
    Ok(())
}

fn validate_http(http: &HttpConfig) -> Result<(), ConfigError> {
    if http.url.is_empty() {
        return Err(ConfigError::Http("url is required".to_string()));
    }
    if http.auth_url.is_empty() && http.http_auth_mode == HttpAuthMode::Digest {
        return Err(ConfigError::Http(
            "digest authentication is not supported".to_string(),
        ));
    }
    Ok(())
}

fn validate_hislip(hislip: &HislipConfig) -> Result<(), ConfigError> {
    if hislip.vendor_id.len() != 2 || !hislip.vendor_id.is_ascii() {
        return Err(ConfigError::Hislip(format!(
            "vendor id '{}' must be exactly two ASCII characters",
            hislip.vendor_id
        )));
    }
    Ok(())
}
