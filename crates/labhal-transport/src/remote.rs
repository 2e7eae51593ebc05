use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use crate::config::{ConnectionParameters, TransportKind};
use crate::error::{Result, TransportError};
use crate::traits::Backend;

/// Connection to a board that owns instruments on behalf of this process.
///
/// The board opens the real transport described by the registered
/// parameters (using their inner kind) and answers forwarded calls by the
/// name it returned. One client is shared by every proxy talking to the
/// same board. Failures reported by the board are [`TransportError::Remote`].
pub trait BoardClient: Send + Sync {
    /// Ask the board to open an instrument. Returns the name it is known by.
    fn register(&self, board_address: &str, params: &ConnectionParameters) -> Result<String>;

    fn unregister(&self, name: &str) -> Result<()>;

    fn send(&self, name: &str, data: &[u8]) -> Result<()>;

    fn recv(&self, name: &str, size: Option<usize>) -> Result<Bytes>;

    fn query(&self, name: &str, data: &[u8], size: Option<usize>) -> Result<Bytes> {
        self.send(name, data)?;
        self.recv(name, size)
    }

    fn set_timeout(&self, name: &str, timeout: Duration) -> Result<()>;
}

/// Forwards every call to an instrument registered on a remote board.
pub struct RemoteProxy {
    params: ConnectionParameters,
    client: Arc<dyn BoardClient>,
    name: Option<String>,
}

impl RemoteProxy {
    pub fn new(params: &ConnectionParameters, client: Arc<dyn BoardClient>) -> Self {
        Self {
            params: params.clone(),
            client,
            name: None,
        }
    }

    /// The name the board assigned, while open.
    pub fn remote_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn name(&self) -> Result<&str> {
        self.name.as_deref().ok_or(TransportError::NotOpen)
    }
}

impl Backend for RemoteProxy {
    fn kind(&self) -> TransportKind {
        TransportKind::Remote
    }

    fn open(&mut self) -> Result<()> {
        let board = self.params.board_address();
        let name = self.client.register(board, &self.params)?;
        info!(%board, remote = %name, inner = %self.params.inner_kind(), "registered instrument on board");
        self.name = Some(name);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(name) = self.name.take() else {
            return Ok(());
        };
        self.client.unregister(&name).inspect_err(|err| {
            warn!(remote = %name, error = %err, "board failed to release instrument");
        })
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.client.send(self.name()?, data)
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        self.client.recv(self.name()?, size)
    }

    fn query(&mut self, data: &[u8], size: Option<usize>) -> Result<Bytes> {
        self.client.query(self.name()?, data, size)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.client.set_timeout(self.name()?, timeout)
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("board", &self.params.board_address())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::config::ConnectionConfig;

    #[derive(Default)]
    struct FakeBoard {
        registered: Mutex<HashMap<String, TransportKind>>,
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl BoardClient for FakeBoard {
        fn register(&self, board_address: &str, params: &ConnectionParameters) -> Result<String> {
            if board_address != "10.0.0.9:50051" {
                return Err(TransportError::Remote(format!("no board at {board_address}")));
            }
            let name = format!("inst{}", self.registered.lock().unwrap().len());
            self.registered
                .lock()
                .unwrap()
                .insert(name.clone(), params.inner_kind());
            Ok(name)
        }

        fn unregister(&self, name: &str) -> Result<()> {
            self.registered.lock().unwrap().remove(name);
            Ok(())
        }

        fn send(&self, name: &str, data: &[u8]) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((name.to_string(), data.to_vec()));
            Ok(())
        }

        fn recv(&self, name: &str, _size: Option<usize>) -> Result<Bytes> {
            Ok(Bytes::from(format!("reply from {name}")))
        }

        fn set_timeout(&self, _name: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn params(board: &str) -> ConnectionParameters {
        let mut config = ConnectionConfig::default();
        config.network.host = "192.168.1.50".to_string();
        config.network.port = 5025;
        config.board_address = board.to_string();
        ConnectionParameters::new(config).unwrap()
    }

    #[test]
    fn open_registers_with_inner_kind_and_close_unregisters() {
        let board = Arc::new(FakeBoard::default());
        let mut proxy = RemoteProxy::new(&params("10.0.0.9:50051"), board.clone());
        proxy.open().unwrap();
        assert_eq!(proxy.remote_name(), Some("inst0"));
        assert_eq!(
            board.registered.lock().unwrap().get("inst0"),
            Some(&TransportKind::Socket)
        );

        proxy.close().unwrap();
        assert!(board.registered.lock().unwrap().is_empty());
        assert_eq!(proxy.remote_name(), None);
        proxy.close().unwrap();
    }

    #[test]
    fn calls_are_forwarded_by_name() {
        let board = Arc::new(FakeBoard::default());
        let mut proxy = RemoteProxy::new(&params("10.0.0.9:50051"), board.clone());
        proxy.open().unwrap();
        let reply = proxy.query(b"*IDN?\n", None).unwrap();
        assert_eq!(reply.as_ref(), b"reply from inst0");
        assert_eq!(
            *board.sent.lock().unwrap(),
            vec![("inst0".to_string(), b"*IDN?\n".to_vec())]
        );
    }

    #[test]
    fn calls_before_open_fail() {
        let board = Arc::new(FakeBoard::default());
        let mut proxy = RemoteProxy::new(&params("10.0.0.9:50051"), board);
        assert!(matches!(proxy.send(b"x"), Err(TransportError::NotOpen)));
        assert!(matches!(proxy.recv(None), Err(TransportError::NotOpen)));
    }

    #[test]
    fn board_errors_propagate() {
        let board = Arc::new(FakeBoard::default());
        let mut proxy = RemoteProxy::new(&params("10.0.0.1:1"), board);
        assert!(matches!(proxy.open(), Err(TransportError::Remote(_))));
        assert_eq!(proxy.remote_name(), None);
    }
}
