//! Connection startup and queries against an in-process server over a socket pair.

mod common;

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use common::{frame, select_one_response};
use pgvictoria::protocol::backend::outbound;
use pgvictoria::protocol::frontend::{self, md5_password};
use pgvictoria::sync::{CancelToken, Conn, ExchangeOptions, Stream};
use pgvictoria::{Error, Opts, SslMode, TransactionStatus};

fn read_untagged(stream: &mut UnixStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let mut body = vec![0u8; i32::from_be_bytes(len) as usize - 4];
    stream.read_exact(&mut body).unwrap();
    let mut out = len.to_vec();
    out.extend(body);
    out
}

fn read_tagged(stream: &mut UnixStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).unwrap();
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload).unwrap();
    (header[0], payload)
}

/// Write `bytes` in small pieces with pauses, so the client sees fragmented reads.
fn write_fragmented(stream: &mut UnixStream, bytes: &[u8]) {
    for piece in bytes.chunks(7) {
        stream.write_all(piece).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(1));
    }
}

fn opts() -> Opts {
    Opts {
        user: "victoria".into(),
        password: Some("s3cret".into()),
        ssl_mode: SslMode::Disable,
        query_timeout: Some(Duration::from_secs(5)),
        ..Opts::default()
    }
}

#[test]
fn md5_startup_and_query() {
    let (client, mut server) = UnixStream::pair().unwrap();

    let server = thread::spawn(move || {
        let startup = read_untagged(&mut server);
        assert_eq!(&startup[4..8], &196608_i32.to_be_bytes());
        let params = String::from_utf8_lossy(&startup[8..]).into_owned();
        assert!(params.contains("user\0victoria\0"));
        assert!(params.contains("application_name\0pgvictoria\0"));

        let salt = [9, 8, 7, 6];
        let mut request = 5_i32.to_be_bytes().to_vec();
        request.extend_from_slice(&salt);
        server.write_all(&frame(b'R', &request)).unwrap();

        let (kind, payload) = read_tagged(&mut server);
        assert_eq!(kind, b'p');
        let expected = md5_password("victoria", "s3cret", &salt);
        assert_eq!(&payload[..payload.len() - 1], expected.as_bytes());

        let mut ready = outbound::auth_success().unwrap().into_data();
        ready.extend(frame(b'S', b"server_version\x0017.2\0"));
        ready.extend(frame(b'K', &[0, 0, 1, 0, 0, 0, 0, 1]));
        ready.extend(frame(b'Z', b"I"));
        write_fragmented(&mut server, &ready);

        let (kind, payload) = read_tagged(&mut server);
        assert_eq!(kind, b'Q');
        assert_eq!(payload, b"SELECT 1;\0");
        write_fragmented(&mut server, &select_one_response());

        let (kind, _) = read_tagged(&mut server);
        assert_eq!(kind, b'X');
    });

    let mut conn = Conn::connect_with_stream(Stream::unix(client), opts()).unwrap();
    assert_eq!(conn.connection_id(), 256);
    assert_eq!(conn.server_param("server_version"), Some("17.2"));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    let response = conn.query_execute("SELECT 1;").unwrap();
    assert_eq!(response.names(), ["?column?"]);
    assert_eq!(response.get_data(0), Some("1"));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn refused_connection() {
    let (client, mut server) = UnixStream::pair().unwrap();

    let server = thread::spawn(move || {
        read_untagged(&mut server);
        server
            .write_all(outbound::connection_refused().unwrap().data())
            .unwrap();
    });

    let err = Conn::connect_with_stream(Stream::unix(client), opts())
        .err()
        .unwrap();
    assert_eq!(err.sqlstate(), Some("53300"));
    assert!(err.is_connection_broken());
    server.join().unwrap();
}

#[test]
fn server_closing_during_startup_times_out() {
    let (client, server) = UnixStream::pair().unwrap();
    drop(server);

    let opts = Opts {
        query_timeout: Some(Duration::from_millis(100)),
        ..opts()
    };
    match Conn::connect_with_stream(Stream::unix(client), opts) {
        Err(Error::Io(_)) | Err(Error::Timeout) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("startup against a closed peer succeeded"),
    }
}

#[test]
fn peer_closing_mid_exchange_without_deadline_needs_cancel() {
    let (client, mut server) = UnixStream::pair().unwrap();

    let server = thread::spawn(move || {
        read_untagged(&mut server);
        let mut ready = outbound::auth_success().unwrap().into_data();
        ready.extend(frame(b'Z', b"I"));
        server.write_all(&ready).unwrap();

        read_tagged(&mut server);
        let response = select_one_response();
        server.write_all(&response[..10]).unwrap();
    });

    let opts = Opts {
        password: None,
        query_timeout: None,
        ..opts()
    };
    let mut conn = Conn::connect_with_stream(Stream::unix(client), opts).unwrap();
    server.join().unwrap();

    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        })
    };

    let options = ExchangeOptions::default().with_cancel(cancel);
    let msg = frontend::query("SELECT 1;").unwrap();
    assert!(matches!(
        conn.execute_with(&msg, &options),
        Err(Error::Cancelled)
    ));
    assert!(conn.is_broken());
    canceller.join().unwrap();
}
