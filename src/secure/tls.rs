//! rustls-backed sessions.
//!
//! Handshake and record processing are left to rustls. Nothing here blocks:
//! the session is fed whatever bytes the read handler drained and returns
//! whatever rustls wants to send.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ServerConfig, ServerConnection,
};

use super::{Session, SessionFactory};

pub struct TlsSessionFactory {
    config: Arc<ServerConfig>,
}

impl TlsSessionFactory {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Server config without client authentication, presenting `cert_chain`.
    pub fn with_single_cert(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> io::Result<Self> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(Self::new(Arc::new(config)))
    }
}

impl SessionFactory for TlsSessionFactory {
    fn open(&self) -> io::Result<Box<dyn Session>> {
        let conn = ServerConnection::new(self.config.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Box::new(TlsSession { conn }))
    }
}

pub struct TlsSession {
    conn: ServerConnection,
}

impl TlsSession {
    fn drain_records(&mut self, wire_out: &mut Vec<u8>) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(wire_out)?;
        }
        Ok(())
    }
}

impl Session for TlsSession {
    fn decode(
        &mut self,
        mut wire: &[u8],
        plain: &mut Vec<u8>,
        wire_out: &mut Vec<u8>,
    ) -> io::Result<()> {
        while !wire.is_empty() {
            if self.conn.read_tls(&mut wire)? == 0 {
                break;
            }

            let state = match self.conn.process_new_packets() {
                Ok(state) => state,
                Err(e) => {
                    // queue the alert rustls prepared before giving up
                    self.drain_records(wire_out)?;
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            };

            let pending = state.plaintext_bytes_to_read();
            if pending > 0 {
                let start = plain.len();
                plain.resize(start + pending, 0);
                self.conn.reader().read_exact(&mut plain[start..])?;
            }
        }
        self.drain_records(wire_out)
    }

    fn encode(&mut self, plain: &[u8], wire_out: &mut Vec<u8>) -> io::Result<()> {
        self.conn.writer().write_all(plain)?;
        self.drain_records(wire_out)
    }
}
