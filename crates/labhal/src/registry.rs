//! Maps a resolved [`TransportKind`] to the backend that implements it.

use std::fmt;
use std::sync::Arc;

use labhal_datagram::DataHandler;
use labhal_hislip::Hislip;
use labhal_transport::{
    Backend, BoardClient, ConnectionParameters, Dmx, Http, Loopback, LoopbackHandle, RemoteProxy,
    Result, Serial, Socket, Transport, TransportError, TransportKind, UsbTmc, Visa, VisaLibrary,
    Vxi11,
};
use tracing::debug;

/// Services some backends need but cannot build themselves.
#[derive(Clone, Default)]
pub struct Collaborators {
    visa: Option<Arc<dyn VisaLibrary>>,
    board: Option<Arc<dyn BoardClient>>,
    loopback: Option<LoopbackHandle>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// VISA library used by the `visa` transport.
    pub fn with_visa(mut self, library: Arc<dyn VisaLibrary>) -> Self {
        self.visa = Some(library);
        self
    }

    /// Board client used whenever a board address is configured.
    pub fn with_board(mut self, client: Arc<dyn BoardClient>) -> Self {
        self.board = Some(client);
        self
    }

    /// Handle shared with the `loopback` transport. A fresh one is created when unset.
    pub fn with_loopback(mut self, handle: LoopbackHandle) -> Self {
        self.loopback = Some(handle);
        self
    }

    pub fn visa(&self) -> Option<&Arc<dyn VisaLibrary>> {
        self.visa.as_ref()
    }

    pub fn loopback(&self) -> Option<&LoopbackHandle> {
        self.loopback.as_ref()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("visa", &self.visa.is_some())
            .field("board", &self.board.is_some())
            .field("loopback", &self.loopback.is_some())
            .finish()
    }
}

/// Construct the backend for `params.kind()`. Nothing is opened.
pub fn build_backend(
    params: &ConnectionParameters,
    collaborators: &Collaborators,
) -> Result<Box<dyn Backend>> {
    let kind = params.kind();
    debug!(%kind, target = %params.name(), "building backend");

    let backend: Box<dyn Backend> = match kind {
        TransportKind::Serial => Box::new(Serial::new(params)),
        TransportKind::Socket => Box::new(Socket::new(params)),
        TransportKind::Usbtmc => Box::new(UsbTmc::new(params)),
        TransportKind::Vxi11 => Box::new(Vxi11::new(params)),
        TransportKind::Http => Box::new(Http::new(params)),
        TransportKind::Dmx => Box::new(Dmx::new(params)),
        TransportKind::Hislip => Box::new(Hislip::new(params)),
        TransportKind::Visa => {
            let library = collaborators
                .visa
                .clone()
                .ok_or(TransportError::MissingCollaborator(kind))?;
            Box::new(Visa::new(params, library))
        }
        TransportKind::Remote => {
            let client = collaborators
                .board
                .clone()
                .ok_or(TransportError::MissingCollaborator(kind))?;
            Box::new(RemoteProxy::new(params, client))
        }
        TransportKind::Loopback => {
            let handle = collaborators.loopback.clone().unwrap_or_default();
            Box::new(Loopback::new(handle))
        }
    };
    Ok(backend)
}

/// Build a closed [`Transport`] for `params`.
pub fn build_transport(
    params: &ConnectionParameters,
    collaborators: &Collaborators,
) -> Result<Transport> {
    let backend = build_backend(params, collaborators)?;
    Ok(Transport::new(params.clone(), backend))
}

/// Build and open a transport, ready for commands.
pub fn connect(params: &ConnectionParameters, collaborators: &Collaborators) -> Result<DataHandler> {
    let mut transport = build_transport(params, collaborators)?;
    transport.open()?;
    Ok(DataHandler::new(transport))
}
