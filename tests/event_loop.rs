use anyhow::{bail, Result};
use mill_harness::{
    handler, BoxError, EventLoopServer, Handler, HarnessError, Responder, ServerConfig, Session,
    SessionFactory,
};
use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn local_config() -> ServerConfig {
    ServerConfig::builder()
        .host(Ipv4Addr::LOCALHOST.into())
        .poll_timeout(Duration::from_millis(20))
        .build()
        .unwrap()
}

struct RunningServer {
    server: Arc<EventLoopServer>,
    addr: SocketAddr,
    handle: Option<JoinHandle<mill_harness::Result<()>>>,
}

impl RunningServer {
    fn start<H: Handler>(config: ServerConfig, handler: H) -> Result<Self> {
        init_logging();
        let server = Arc::new(EventLoopServer::new(config));
        server.set_handler(handler);

        let loop_server = server.clone();
        let handle = thread::spawn(move || loop_server.start());

        let deadline = Instant::now() + TIMEOUT;
        let addr = loop {
            if let Some(addr) = server.local_addr() {
                break addr;
            }
            if handle.is_finished() || Instant::now() > deadline {
                bail!("server never came up");
            }
            thread::sleep(Duration::from_millis(5));
        };

        Ok(Self {
            server,
            addr,
            handle: Some(handle),
        })
    }

    fn connect(&self) -> Result<Client> {
        Client::connect(self.addr)
    }

    fn wait_for_clients(&self, expected: usize) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if self.server.clients().len() == expected {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn shutdown(mut self) -> mill_harness::Result<()> {
        self.server.stop();
        match self.handle.take() {
            Some(handle) => handle.join().expect("event loop thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(TIMEOUT))?;
        Ok(Self {
            writer: stream.try_clone()?,
            reader: BufReader::new(stream),
        })
    }

    fn send(&mut self, raw: &str) -> Result<()> {
        self.writer.write_all(raw.as_bytes())?;
        Ok(())
    }

    fn recv(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            bail!("connection closed");
        }
        Ok(line.trim_end_matches('\n').to_string())
    }

    fn request(&mut self, line: &str) -> Result<String> {
        self.send(&format!("{line}\n"))?;
        self.recv()
    }

    /// True once the server has closed its side.
    fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
    }
}

fn ping_pong() -> impl Handler {
    handler::from_fn(|line| match line {
        "ping" => Some("pong".to_string()),
        "ping2" => Some("pong2".to_string()),
        other => Some(format!("echo: {other}")),
    })
}

#[test]
fn test_ping_pong_on_one_connection() -> Result<()> {
    let server = RunningServer::start(local_config(), ping_pong())?;
    let mut client = server.connect()?;

    assert_eq!(client.request("ping")?, "pong");
    assert_eq!(client.request("ping2")?, "pong2");
    assert_eq!(client.request("anything")?, "echo: anything");
    Ok(())
}

#[test]
fn test_message_split_across_writes() -> Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let server = RunningServer::start(
        local_config(),
        handler::from_fn(move |line| {
            recorded.lock().unwrap().push(line.to_string());
            Some(format!("got {line}"))
        }),
    )?;
    let mut client = server.connect()?;

    client.send("hel")?;
    thread::sleep(Duration::from_millis(100));
    client.send("lo\n")?;

    assert_eq!(client.recv()?, "got hello");
    assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    Ok(())
}

#[test]
fn test_disconnect_mid_line_is_cleaned_up() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = RunningServer::start(
        local_config(),
        handler::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        }),
    )?;

    let mut client = server.connect()?;
    assert!(server.wait_for_clients(1));
    client.send("half a mess")?;
    client.writer.shutdown(Shutdown::Both)?;
    drop(client);

    assert!(server.wait_for_clients(0));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_many_connections_are_isolated() -> Result<()> {
    let server = RunningServer::start(local_config(), handler::from_fn(|l| Some(l.to_string())))?;

    let mut clients = (0..16)
        .map(|_| server.connect())
        .collect::<Result<Vec<_>>>()?;
    assert!(server.wait_for_clients(16));

    for (i, client) in clients.iter_mut().enumerate() {
        client.send(&format!("client-{i}\n"))?;
    }
    for (i, client) in clients.iter_mut().enumerate() {
        assert_eq!(client.recv()?, format!("client-{i}"));
    }
    Ok(())
}

struct Picky;

impl Handler for Picky {
    fn handle(&self, message: &str, _: &Responder) -> Result<Option<String>, BoxError> {
        match message {
            "boom" => Err("refusing boom".into()),
            "panic" => panic!("handler panicked on purpose"),
            other => Ok(Some(other.to_uppercase())),
        }
    }
}

#[test]
fn test_handler_failure_closes_only_its_connection() -> Result<()> {
    let server = RunningServer::start(local_config(), Picky)?;
    let mut failing = server.connect()?;
    let mut panicking = server.connect()?;
    let mut healthy = server.connect()?;
    assert!(server.wait_for_clients(3));

    failing.send("boom\n")?;
    panicking.send("panic\n")?;
    assert!(failing.is_closed());
    assert!(panicking.is_closed());
    assert!(server.wait_for_clients(1));

    assert_eq!(healthy.request("still here")?, "STILL HERE");
    assert!(server.server.is_running());
    Ok(())
}

struct Deferred;

impl Handler for Deferred {
    fn handle(&self, message: &str, responder: &Responder) -> Result<Option<String>, BoxError> {
        let responder = responder.clone();
        let message = message.to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = responder.respond(format!("later: {message}"));
            if message == "bye" {
                let _ = responder.close();
            }
        });
        Ok(None)
    }
}

#[test]
fn test_responder_from_another_thread() -> Result<()> {
    let server = RunningServer::start(local_config(), Deferred)?;
    let mut client = server.connect()?;

    assert_eq!(client.request("one")?, "later: one");
    assert_eq!(client.request("two")?, "later: two");
    assert_eq!(client.request("bye")?, "later: bye");
    assert!(client.is_closed());
    assert!(server.wait_for_clients(0));
    Ok(())
}

#[test]
fn test_large_response_then_next_round() -> Result<()> {
    const SIZE: usize = 4 * 1024 * 1024;
    let server = RunningServer::start(
        local_config(),
        handler::from_fn(|line| match line {
            "big" => Some("x".repeat(SIZE)),
            _ => Some("pong".to_string()),
        }),
    )?;
    let mut client = server.connect()?;

    let big = client.request("big")?;
    assert_eq!(big.len(), SIZE);
    assert!(big.bytes().all(|b| b == b'x'));
    assert_eq!(client.request("ping")?, "pong");
    Ok(())
}

#[test]
fn test_stop_clears_registry_and_port_can_be_reused() -> Result<()> {
    let server = RunningServer::start(local_config(), ping_pong())?;
    let addr = server.addr;
    let mut clients = (0..3)
        .map(|_| server.connect())
        .collect::<Result<Vec<_>>>()?;
    for client in clients.iter_mut() {
        assert_eq!(client.request("ping")?, "pong");
    }
    assert_eq!(server.server.clients().len(), 3);

    let handle = server.server.clone();
    server.shutdown()?;
    assert!(handle.clients().is_empty());
    assert!(!handle.is_running());
    assert!(handle.local_addr().is_none());
    for client in clients.iter_mut() {
        assert!(client.is_closed());
    }

    let config = ServerConfig::builder()
        .host(addr.ip())
        .port(addr.port())
        .build()?;
    let again = RunningServer::start(config, ping_pong())?;
    assert_eq!(again.addr, addr);
    assert_eq!(again.connect()?.request("ping")?, "pong");
    Ok(())
}

#[test]
fn test_stop_twice_and_restart_is_refused() -> Result<()> {
    let server = RunningServer::start(local_config(), ping_pong())?;
    let handle = server.server.clone();
    server.shutdown()?;

    handle.stop();
    assert!(!handle.is_running());
    assert!(matches!(handle.start(), Err(HarnessError::Stopped)));
    Ok(())
}

#[test]
fn test_stop_before_start() {
    let server = EventLoopServer::new(local_config());
    server.stop();
    assert!(matches!(server.start(), Err(HarnessError::Stopped)));
}

#[test]
fn test_bind_conflict_is_reported() -> Result<()> {
    let first = RunningServer::start(local_config(), ping_pong())?;
    let config = ServerConfig::builder()
        .host(first.addr.ip())
        .port(first.addr.port())
        .build()?;

    let second = EventLoopServer::new(config);
    match second.start() {
        Err(HarnessError::Bind { addr, .. }) => assert_eq!(addr, first.addr),
        other => bail!("expected a bind error, got {other:?}"),
    }
    assert!(!second.is_running());

    let mut client = first.connect()?;
    assert_eq!(client.request("ping")?, "pong");
    Ok(())
}

struct Xor(u8);

impl Session for Xor {
    fn decode(&mut self, wire: &[u8], plain: &mut Vec<u8>, _: &mut Vec<u8>) -> io::Result<()> {
        plain.extend(wire.iter().map(|b| b ^ self.0));
        Ok(())
    }

    fn encode(&mut self, plain: &[u8], wire_out: &mut Vec<u8>) -> io::Result<()> {
        wire_out.extend(plain.iter().map(|b| b ^ self.0));
        Ok(())
    }
}

struct XorFactory(u8);

impl SessionFactory for XorFactory {
    fn open(&self) -> io::Result<Box<dyn Session>> {
        Ok(Box::new(Xor(self.0)))
    }
}

#[test]
fn test_secure_sessions_are_transparent_to_the_handler() -> Result<()> {
    const KEY: u8 = 0x5c;
    let config = ServerConfig::builder()
        .host(Ipv4Addr::LOCALHOST.into())
        .session_factory(Arc::new(XorFactory(KEY)))
        .build()?;
    let server = RunningServer::start(config, ping_pong())?;

    let mut stream = TcpStream::connect(server.addr)?;
    stream.set_read_timeout(Some(TIMEOUT))?;
    let wire: Vec<u8> = b"ping\n".iter().map(|b| b ^ KEY).collect();
    stream.write_all(&wire)?;

    let mut reply = [0u8; 5];
    stream.read_exact(&mut reply)?;
    assert_ne!(&reply, b"pong\n");
    let plain: Vec<u8> = reply.iter().map(|b| b ^ KEY).collect();
    assert_eq!(plain, b"pong\n");
    Ok(())
}

#[cfg(feature = "tls")]
mod tls {
    use super::*;
    use mill_harness::secure::tls::TlsSessionFactory;
    use rustls::{
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName},
        ClientConfig, ClientConnection, RootCertStore, StreamOwned,
    };

    #[test]
    fn test_tls_line_round_trip() -> Result<()> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
        let cert_der = CertificateDer::from(cert.serialize_der()?);
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
        let factory = TlsSessionFactory::with_single_cert(vec![cert_der.clone()], key)?;

        let config = ServerConfig::builder()
            .host(Ipv4Addr::LOCALHOST.into())
            .session_factory(Arc::new(factory))
            .build()?;
        let server = RunningServer::start(config, ping_pong())?;

        let mut roots = RootCertStore::empty();
        roots.add(cert_der)?;
        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let conn = ClientConnection::new(
            Arc::new(client_config),
            ServerName::try_from("localhost")?,
        )?;

        let tcp = TcpStream::connect(server.addr)?;
        tcp.set_read_timeout(Some(TIMEOUT))?;
        let mut tls = BufReader::new(StreamOwned::new(conn, tcp));

        for (request, expected) in [("ping", "pong"), ("ping2", "pong2")] {
            tls.get_mut().write_all(format!("{request}\n").as_bytes())?;
            let mut line = String::new();
            tls.read_line(&mut line)?;
            assert_eq!(line, format!("{expected}\n"));
        }
        Ok(())
    }
}
