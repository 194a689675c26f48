use minisocks::{Config, ServerState, Socks5Server};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(config: Config) -> Socks5Server {
    let mut server = Socks5Server::bind("127.0.0.1:0", config).await.unwrap();
    server.start().unwrap();
    server
}

/// greet performs the method negotiation and returns the client stream
async fn greet(proxy: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, 0x00]);
    client
}

/// connect_ipv4 runs a full CONNECT to target and returns the raw reply
async fn connect_ipv4(proxy: SocketAddr, target: SocketAddr) -> (TcpStream, Vec<u8>) {
    let mut client = greet(proxy).await;
    let SocketAddr::V4(target) = target else {
        panic!("IPv4 target expected");
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = vec![0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    (client, reply)
}

async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// read_until_closed collects everything the proxy sends before it hangs up
async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    let _ = timeout(WAIT, stream.read_to_end(&mut rest)).await.unwrap();
    rest
}

#[tokio::test]
async fn connect_and_relay() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = destination.local_addr().unwrap();
    let mut server = start_server(Config::default()).await;

    let (mut client, reply) = connect_ipv4(server.local_addr(), target).await;
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    let bound_port = u16::from_be_bytes([reply[8], reply[9]]);

    let (mut upstream, upstream_peer) = destination.accept().await.unwrap();
    assert_eq!(upstream_peer.port(), bound_port);

    client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    let mut request = [0u8; 18];
    upstream.read_exact(&mut request).await.unwrap();
    assert_eq!(&request, b"GET / HTTP/1.0\r\n\r\n");

    upstream.write_all(b"HTTP/1.0 200 OK\r\n").await.unwrap();
    let mut response = [0u8; 17];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"HTTP/1.0 200 OK\r\n");

    drop(client);
    assert!(read_until_closed(&mut upstream).await.is_empty());
    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn bind_command_is_rejected() {
    let mut server = start_server(Config::default()).await;
    let mut client = greet(server.local_addr()).await;

    client
        .write_all(&[0x05, 0x02, 0x00, 0x01, 10, 0, 0, 1, 0x1f, 0x90])
        .await
        .unwrap();
    let reply = read_until_closed(&mut client).await;
    assert_eq!(reply, vec![0x05, 0x07, 0x00, 0x01, 10, 0, 0, 1, 0x1f, 0x90]);

    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn unknown_address_type_is_rejected() {
    let mut server = start_server(Config::default()).await;
    let mut client = greet(server.local_addr()).await;

    client.write_all(&[0x05, 0x01, 0x00, 0x05, 0x00, 0x50]).await.unwrap();
    let reply = read_until_closed(&mut client).await;
    assert_eq!(reply, vec![0x05, 0x08, 0x00, 0x05, 0x00, 0x50]);

    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn no_acceptable_method_closes_connection() {
    let mut server = start_server(Config::default()).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let reply = read_until_closed(&mut client).await;
    assert_eq!(reply, vec![0x05, 0xff]);

    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn unreachable_destination_replies_connect_failed() {
    let target = closed_port().await;
    let mut server = start_server(Config::default()).await;

    let (mut client, reply) = connect_ipv4(server.local_addr(), target).await;
    assert_eq!(reply[1], 0x05);
    assert_eq!(&reply[3..8], &[0x01, 127, 0, 0, 1]);
    assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), target.port());
    assert!(read_until_closed(&mut client).await.is_empty());

    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn destination_close_ends_tunnel_during_stop() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = destination.local_addr().unwrap();
    let mut server = start_server(Config::default()).await;

    let (mut client, reply) = connect_ipv4(server.local_addr(), target).await;
    assert_eq!(reply[1], 0x00);
    let (upstream, _) = destination.accept().await.unwrap();

    let stopping = tokio::spawn(async move {
        let drained = server.stop(WAIT).await;
        (drained, server.state())
    });

    drop(upstream);
    assert!(read_until_closed(&mut client).await.is_empty());

    let (drained, state) = timeout(WAIT, stopping).await.unwrap().unwrap();
    assert!(drained);
    assert_eq!(state, ServerState::Stopped);
}

#[tokio::test]
async fn stop_times_out_with_live_tunnel() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = destination.local_addr().unwrap();
    let mut server = start_server(Config::default()).await;

    let (_client, reply) = connect_ipv4(server.local_addr(), target).await;
    assert_eq!(reply[1], 0x00);
    let (_upstream, _) = destination.accept().await.unwrap();

    let drained = timeout(WAIT, server.stop(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(!drained);
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn stopped_server_refuses_connections() {
    let mut server = start_server(Config::default()).await;
    let addr = server.local_addr();
    assert_eq!(server.state(), ServerState::Running);

    assert!(server.stop(WAIT).await);
    assert!(TcpStream::connect(addr).await.is_err());

    // A second stop is a no-op
    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn bind_fails_on_used_address() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let err = Socks5Server::new(&addr).await.err().unwrap();
    assert!(err.to_string().contains(&addr));
}

#[tokio::test]
async fn start_twice_fails() {
    let mut server = start_server(Config::default()).await;
    assert!(server.start().is_err());
    assert!(server.stop(WAIT).await);
}

#[tokio::test]
async fn connection_cap_rejects_extra_clients() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = destination.local_addr().unwrap();
    let mut server = start_server(Config::default().with_max_connections(Some(1))).await;

    let (_first, reply) = connect_ipv4(server.local_addr(), target).await;
    assert_eq!(reply[1], 0x00);
    let (_upstream, _) = destination.accept().await.unwrap();

    let mut second = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut buf = [0u8; 2];
    match timeout(WAIT, second.read(&mut buf)).await.unwrap() {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("rejected client received {n} bytes"),
    }

    server.stop(Duration::from_millis(100)).await;
}
