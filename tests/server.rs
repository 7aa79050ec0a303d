mod common;

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{init_tracing, loopback, wait_until};
use mill_tcp::{
    ConnectionId, ConnectionRef, NetworkError, ServerHandler, TcpServer, TcpServerConfig,
};

fn spawn<H: ServerHandler>(server: TcpServer<H>) -> (Arc<TcpServer<H>>, thread::JoinHandle<mill_tcp::Result<()>>) {
    let server = Arc::new(server);
    let runner = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };
    (server, runner)
}

fn connect<H: ServerHandler>(server: &TcpServer<H>) -> TcpStream {
    let stream = TcpStream::connect(loopback(server.local_addr().port())).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn test_echo_round_trip() {
    init_tracing();
    let server = TcpServer::bind(0, |data: &[u8], conn: &ConnectionRef| conn.write(data)).unwrap();
    let (server, runner) = spawn(server);

    let mut client = connect(&server);
    client.write_all(b"hello, mill").unwrap();

    let mut reply = [0u8; 11];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"hello, mill");

    server.stop();
    runner.join().unwrap().unwrap();
}

#[test]
fn test_broadcast_reaches_each_client_exactly_once() {
    init_tracing();
    let server = TcpServer::bind(0, |_: &[u8], _: &ConnectionRef| {}).unwrap();
    let (server, runner) = spawn(server);

    let mut clients: Vec<_> = (0..3).map(|_| connect(&server)).collect();
    assert!(wait_until(|| server.connection_count() == 3));

    server.write(b"tick".to_vec());

    for client in &mut clients {
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"tick");

        // Nothing else follows the single broadcast.
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut extra = [0u8; 1];
        assert!(client.read(&mut extra).is_err());
    }

    server.stop();
    runner.join().unwrap().unwrap();
}

#[test]
fn test_connection_count_after_retirements() {
    init_tracing();
    let server = TcpServer::bind(0, |_: &[u8], _: &ConnectionRef| {}).unwrap();
    let (server, runner) = spawn(server);

    let mut clients: Vec<_> = (0..5).map(|_| connect(&server)).collect();
    assert!(wait_until(|| server.connection_count() == 5));

    for client in clients.drain(..2) {
        client.shutdown(Shutdown::Both).unwrap();
    }
    assert!(wait_until(|| server.connection_count() == 3));

    // Broadcasting after retirement only reaches the survivors.
    server.write(b"ok".to_vec());
    for client in &mut clients {
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    server.stop();
    runner.join().unwrap().unwrap();
}

#[derive(Clone, Default)]
struct Lifecycle {
    connects: Arc<AtomicUsize>,
    connected: Arc<Mutex<Vec<ConnectionId>>>,
    disconnects: Arc<Mutex<Vec<ConnectionId>>>,
    errors: Arc<AtomicUsize>,
}

impl ServerHandler for Lifecycle {
    fn on_data(&mut self, _conn: &ConnectionRef, _data: &[u8]) {}

    fn on_connect(&mut self, conn: &ConnectionRef) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.lock().unwrap().push(conn.id());
    }

    fn on_disconnect(&mut self, conn_id: ConnectionId) {
        self.disconnects.lock().unwrap().push(conn_id);
    }

    fn on_error(&mut self, _conn_id: Option<ConnectionId>, _error: &NetworkError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_stop_is_idempotent_and_closes_connections() {
    init_tracing();
    let lifecycle = Lifecycle::default();
    let server = TcpServer::bind(0, lifecycle.clone()).unwrap();
    let (server, runner) = spawn(server);

    let mut a = connect(&server);
    let mut b = connect(&server);
    assert!(wait_until(|| server.connection_count() == 2));

    server.stop();
    server.stop();
    runner.join().unwrap().unwrap();
    server.stop();

    assert_eq!(server.connection_count(), 0);
    for client in [&mut a, &mut b] {
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }

    assert_eq!(lifecycle.connects.load(Ordering::SeqCst), 2);
    assert_eq!(lifecycle.disconnects.lock().unwrap().len(), 2);
    // A deliberate stop is not an error.
    assert_eq!(lifecycle.errors.load(Ordering::SeqCst), 0);

    // The acceptor is closed.
    assert!(wait_until(|| TcpStream::connect(loopback(server.local_addr().port())).is_err()));
}

#[test]
fn test_run_after_stop_returns_immediately() {
    init_tracing();
    let server = TcpServer::bind(0, |_: &[u8], _: &ConnectionRef| {}).unwrap();
    server.stop();
    server.run().unwrap();
    server.run().unwrap();

    // Writes after stop are dropped.
    server.write(b"late".to_vec());
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_bind_fails_when_port_is_taken() {
    init_tracing();
    let first = TcpServer::bind(0, |_: &[u8], _: &ConnectionRef| {}).unwrap();
    let port = first.local_addr().port();

    let second = TcpServer::bind(port, |_: &[u8], _: &ConnectionRef| {});
    assert!(matches!(second, Err(NetworkError::Bind { .. })));
}

#[test]
fn test_server_handle_controls_server_from_another_thread() {
    init_tracing();
    let config = TcpServerConfig::builder()
        .address(loopback(0))
        .buffer_size(1024)
        .build();
    let server = TcpServer::with_config(config, |_: &[u8], _: &ConnectionRef| {}).unwrap();
    let handle = server.handle();
    let (server, runner) = spawn(server);

    let mut client = connect(&server);
    assert!(wait_until(|| handle.connection_count() == 1));

    thread::spawn(move || {
        handle.write(b"from afar".to_vec());
        thread::sleep(Duration::from_millis(100));
        handle.stop();
    })
    .join()
    .unwrap();

    let mut buf = [0u8; 9];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"from afar");
    runner.join().unwrap().unwrap();
}

#[test]
fn test_server_handle_targets_single_connection() {
    init_tracing();
    let lifecycle = Lifecycle::default();
    let server = TcpServer::bind(0, lifecycle.clone()).unwrap();
    let handle = server.handle();
    let (server, runner) = spawn(server);

    let mut first = connect(&server);
    assert!(wait_until(|| lifecycle.connected.lock().unwrap().len() == 1));
    let mut second = connect(&server);
    assert!(wait_until(|| lifecycle.connected.lock().unwrap().len() == 2));
    let ids = lifecycle.connected.lock().unwrap().clone();

    handle.write_to(ids[0], b"first only".to_vec());
    let mut buf = [0u8; 10];
    first.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"first only");

    second
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut extra = [0u8; 1];
    assert!(second.read(&mut extra).is_err());

    handle.close(ids[1]);
    assert!(wait_until(|| handle.connection_count() == 1));
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(second.read(&mut extra).unwrap_or(0), 0);
    assert_eq!(*lifecycle.disconnects.lock().unwrap(), vec![ids[1]]);

    // Writes to a closed connection are dropped; the survivor is untouched.
    handle.write_to(ids[1], b"gone".to_vec());
    handle.write_to(ids[0], b"!".to_vec());
    first.read_exact(&mut extra).unwrap();
    assert_eq!(&extra, b"!");

    server.stop();
    runner.join().unwrap().unwrap();
}

#[test]
fn test_large_write_arrives_intact() {
    init_tracing();
    let server = TcpServer::bind(0, |_: &[u8], _: &ConnectionRef| {}).unwrap();
    let (server, runner) = spawn(server);

    let mut client = connect(&server);
    assert!(wait_until(|| server.connection_count() == 1));

    // Large enough to fill the socket buffers and park the write loop.
    let payload: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    server.write(payload.clone());
    server.write(b"end".to_vec());

    let mut received = vec![0u8; payload.len() + 3];
    client.read_exact(&mut received).unwrap();
    assert_eq!(&received[..payload.len()], &payload[..]);
    assert_eq!(&received[payload.len()..], b"end");

    server.stop();
    runner.join().unwrap().unwrap();
}
