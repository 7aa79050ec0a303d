use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mill_tcp::{ConnectionRef, TcpServer, TcpServerConfig};
use std::{
    io::{Read, Write},
    net::TcpStream,
    sync::Arc,
    thread,
    time::Duration,
};

type Echo = fn(&[u8], &ConnectionRef);

fn echo(data: &[u8], conn: &ConnectionRef) {
    conn.write(data);
}

fn ignore(_: &[u8], _: &ConnectionRef) {}

/// Runs a server on a background thread and stops it on drop.
struct ServerGuard {
    server: Arc<TcpServer<Echo>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServerGuard {
    fn start(handler: Echo) -> Self {
        let config = TcpServerConfig::builder()
            .address("127.0.0.1:0".parse().unwrap())
            .build();
        let server = Arc::new(TcpServer::with_config(config, handler).unwrap());
        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || {
            let _ = runner.run();
        });
        Self {
            server,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.server.local_addr()).unwrap();
        stream.set_nodelay(true).unwrap();
        stream
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn bench_echo_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("tcp_echo");

    for msg_size in [128, 1024, 4096] {
        group.throughput(Throughput::Bytes((msg_size * 100) as u64));

        group.bench_with_input(
            BenchmarkId::new("message_size", msg_size),
            &msg_size,
            |b, &size| {
                let guard = ServerGuard::start(echo);
                let mut stream = guard.connect();

                let data = vec![42u8; size];
                let mut response = vec![0u8; size];

                b.iter(|| {
                    for _ in 0..100 {
                        stream.write_all(&data).unwrap();
                        stream.read_exact(&mut response).unwrap();
                    }
                    black_box(&response);
                });
            },
        );
    }
    group.finish();
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("tcp_broadcast");
    group.sample_size(20);

    for clients in [3, 16, 64] {
        group.throughput(Throughput::Bytes((clients * 512) as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(clients),
            &clients,
            |b, &count| {
                let guard = ServerGuard::start(ignore);
                let mut streams: Vec<_> = (0..count).map(|_| guard.connect()).collect();
                while guard.server.connection_count() < count {
                    thread::sleep(Duration::from_millis(1));
                }

                let message = vec![7u8; 512];
                let mut buf = vec![0u8; 512];

                b.iter(|| {
                    guard.server.write(message.clone());
                    for stream in &mut streams {
                        stream.read_exact(&mut buf).unwrap();
                    }
                    black_box(&buf);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_echo_throughput, bench_broadcast_fanout);
criterion_main!(benches);
