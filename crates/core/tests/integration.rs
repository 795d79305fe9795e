//! End-to-end tests over real loopback sockets.
//!
//! Each test stands up its own `NetworkSession` with an `mpsc` channel as
//! the event sink and talks to it with plain blocking std sockets. Ports
//! are fixed and distinct per test so the suite can run in parallel.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream, UdpSocket};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use wfdnet::{MessageKind, NetError, NetworkSession, SessionEvent, SessionId, TextParser};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn started() -> NetworkSession {
    let mut net = NetworkSession::new();
    net.start().expect("worker start");
    net
}

fn recv_event(rx: &mpsc::Receiver<SessionEvent>) -> SessionEvent {
    rx.recv_timeout(EVENT_TIMEOUT).expect("timed out waiting for event")
}

fn expect_client_connected(rx: &mpsc::Receiver<SessionEvent>) -> SessionId {
    match recv_event(rx) {
        SessionEvent::ClientConnected { id, .. } => id,
        other => panic!("expected ClientConnected, got {:?}", other),
    }
}

#[test]
fn udp_datagram_carries_source_and_arrival() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    let peer = UdpSocket::bind("127.0.0.1:0").expect("peer bind");
    let peer_port = peer.local_addr().unwrap().port();

    let id = net
        .create_udp_session(18600, Some(("127.0.0.1", peer_port)), Arc::new(tx))
        .expect("udp session");

    peer.send_to(b"HELLO", ("127.0.0.1", 18600)).expect("peer send");

    match recv_event(&rx) {
        SessionEvent::Datagram {
            id: got,
            data,
            from,
            arrival_time_us,
        } => {
            assert_eq!(got, id);
            assert_eq!(&data[..], b"HELLO");
            assert_eq!(from, Some(("127.0.0.1".to_string(), peer_port)));
            assert!(arrival_time_us.expect("UDP datagrams are stamped") > 0);
        }
        other => panic!("expected Datagram, got {:?}", other),
    }

    net.stop().unwrap();
}

#[test]
fn rtsp_accept_reports_both_endpoints() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    net.create_rtsp_server(Ipv4Addr::UNSPECIFIED, 18554, Arc::new(TextParser), Arc::new(tx))
        .expect("rtsp server");

    let client = TcpStream::connect(("127.0.0.1", 18554)).expect("client connect");
    let expected_client_port = client.local_addr().unwrap().port();

    match recv_event(&rx) {
        SessionEvent::ClientConnected {
            server_ip,
            server_port,
            client_ip,
            client_port,
            ..
        } => {
            assert_eq!(server_ip, "127.0.0.1");
            assert_eq!(server_port, 18554);
            assert_eq!(client_ip, "127.0.0.1");
            assert_eq!(client_port, expected_client_port);
        }
        other => panic!("expected ClientConnected, got {:?}", other),
    }

    net.stop().unwrap();
}

#[test]
fn tcp_datagrams_are_framed_across_chunks() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    net.create_tcp_datagram_server(Ipv4Addr::LOCALHOST, 18610, Arc::new(tx))
        .expect("tcp datagram server");

    let mut peer = TcpStream::connect(("127.0.0.1", 18610)).expect("peer connect");
    let child = expect_client_connected(&rx);

    // First chunk ends mid-payload; no event may fire yet.
    peer.write_all(&[0x00, 0x03, b'A', b'B']).unwrap();
    peer.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    peer.write_all(&[b'C', 0x00, 0x02, b'X', b'Y']).unwrap();
    peer.flush().unwrap();

    match recv_event(&rx) {
        SessionEvent::Datagram {
            id,
            data,
            from,
            arrival_time_us,
        } => {
            assert_eq!(id, child);
            assert_eq!(&data[..], b"ABC");
            assert!(from.is_none());
            assert!(arrival_time_us.is_none());
        }
        other => panic!("expected Datagram, got {:?}", other),
    }
    match recv_event(&rx) {
        SessionEvent::Datagram { data, .. } => assert_eq!(&data[..], b"XY"),
        other => panic!("expected Datagram, got {:?}", other),
    }

    net.stop().unwrap();
}

#[test]
fn interleaved_binary_frame_is_extracted() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    net.create_rtsp_server(Ipv4Addr::LOCALHOST, 18620, Arc::new(TextParser), Arc::new(tx))
        .expect("rtsp server");

    let mut peer = TcpStream::connect(("127.0.0.1", 18620)).expect("peer connect");
    let child = expect_client_connected(&rx);

    peer.write_all(&[0x24, 0x05, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF])
        .unwrap();

    match recv_event(&rx) {
        SessionEvent::BinaryData {
            id,
            channel,
            data,
            arrival_time_us,
        } => {
            assert_eq!(id, child);
            assert_eq!(channel, 5);
            assert_eq!(&data[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
            assert!(arrival_time_us > 0);
        }
        other => panic!("expected BinaryData, got {:?}", other),
    }

    net.stop().unwrap();
}

#[test]
fn idr_request_with_bad_content_length_resyncs() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    net.create_rtsp_server(Ipv4Addr::LOCALHOST, 18630, Arc::new(TextParser), Arc::new(tx))
        .expect("rtsp server");

    let mut peer = TcpStream::connect(("127.0.0.1", 18630)).expect("peer connect");
    expect_client_connected(&rx);

    // Declared Content-Length 17, actual body 19 bytes on the wire: the
    // known dongle bug the framer compensates for.
    peer.write_all(
        b"SET_PARAMETER rtsp://127.0.0.1/wfd1.0 RTSP/1.0\r\n\
          CSeq: 3\r\n\
          Content-Length: 17\r\n\
          \r\n\
          wfd_idr_request\r\n\r\n",
    )
    .unwrap();
    peer.write_all(b"OPTIONS rtsp://127.0.0.1/wfd1.0 RTSP/1.0\r\nCSeq: 4\r\n\r\n")
        .unwrap();

    match recv_event(&rx) {
        SessionEvent::Data { message, .. } => {
            assert!(message.is_request("SET_PARAMETER"));
            assert_eq!(message.content(), Some(&b"wfd_idr_request\r\n"[..]));
        }
        other => panic!("expected Data, got {:?}", other),
    }
    match recv_event(&rx) {
        SessionEvent::Data { message, .. } => {
            assert!(message.is_request("OPTIONS"));
            assert_eq!(message.cseq(), Some("4"));
        }
        other => panic!("expected second Data, got {:?}", other),
    }

    net.stop().unwrap();
}

#[test]
fn outbound_rtp_timestamps_are_refreshed() {
    let mut net = started();
    let (tx, _rx) = mpsc::channel();

    let peer = UdpSocket::bind("127.0.0.1:0").expect("peer bind");
    peer.set_read_timeout(Some(EVENT_TIMEOUT)).unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    let id = net
        .create_udp_session(0, Some(("127.0.0.1", peer_port)), Arc::new(tx))
        .expect("udp session");

    let packet: [u8; 12] = [
        0x80, 0x21, 0x00, 0x01, 0, 0, 0, 0, 0xAA, 0xBB, 0xCC, 0xDD,
    ];

    let recv_timestamp = || {
        net.send_request(id, &packet).expect("queue datagram");
        let mut buf = [0u8; 64];
        let (n, _) = peer.recv_from(&mut buf).expect("peer recv");
        assert_eq!(n, packet.len());
        assert_eq!(&buf[..4], &packet[..4], "header before timestamp untouched");
        assert_eq!(&buf[8..12], &packet[8..12], "payload untouched");
        u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]])
    };

    let first = recv_timestamp();
    assert_ne!(first, 0, "timestamp must be rewritten from the clock");

    thread::sleep(Duration::from_millis(100));
    let second = recv_timestamp();

    // 90 kHz clock: 100 ms is 9000 ticks. Allow generous scheduling slack.
    let elapsed = second.wrapping_sub(first);
    assert!(
        (4_500..=1_800_000).contains(&elapsed),
        "expected roughly 9000 ticks between sends, got {elapsed}"
    );

    net.stop().unwrap();
}

#[test]
fn rtsp_client_connects_sends_and_parses_response() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    let listener = TcpListener::bind("127.0.0.1:0").expect("listener bind");
    let port = listener.local_addr().unwrap().port();

    let id = net
        .create_rtsp_client("127.0.0.1", port, Arc::new(TextParser), Arc::new(tx))
        .expect("rtsp client");

    let (mut peer, _) = listener.accept().expect("accept");

    match recv_event(&rx) {
        SessionEvent::Connected { id: got } => assert_eq!(got, id),
        other => panic!("expected Connected, got {:?}", other),
    }

    let request = b"OPTIONS rtsp://127.0.0.1/wfd1.0 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
    net.send_request(id, request).expect("queue request");

    let mut wire = vec![0u8; request.len()];
    peer.read_exact(&mut wire).expect("peer read");
    assert_eq!(&wire[..], request, "RTSP bytes go out verbatim");

    peer.write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, SET_PARAMETER\r\n\r\n")
        .unwrap();

    match recv_event(&rx) {
        SessionEvent::Data { message, .. } => match message.kind {
            MessageKind::Response { status, .. } => assert_eq!(status, 200),
            other => panic!("expected Response, got {:?}", other),
        },
        other => panic!("expected Data, got {:?}", other),
    }

    net.stop().unwrap();
}

#[test]
fn tcp_datagram_client_length_prefixes_on_the_wire() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    let listener = TcpListener::bind("127.0.0.1:0").expect("listener bind");
    let port = listener.local_addr().unwrap().port();

    let id = net
        .create_tcp_datagram_client(0, "127.0.0.1", port, Arc::new(tx))
        .expect("tcp datagram client");

    let (mut peer, _) = listener.accept().expect("accept");

    match recv_event(&rx) {
        SessionEvent::Connected { id: got } => assert_eq!(got, id),
        other => panic!("expected Connected, got {:?}", other),
    }

    net.send_request(id, b"ABC").expect("queue datagram");

    let mut wire = [0u8; 5];
    peer.read_exact(&mut wire).expect("peer read");
    assert_eq!(wire, [0x00, 0x03, b'A', b'B', b'C']);

    net.stop().unwrap();
}

#[test]
fn malformed_rtsp_surfaces_then_fails_the_session() {
    let mut net = started();
    let (tx, rx) = mpsc::channel();

    net.create_rtsp_server(Ipv4Addr::LOCALHOST, 18650, Arc::new(TextParser), Arc::new(tx))
        .expect("rtsp server");

    let mut peer = TcpStream::connect(("127.0.0.1", 18650)).expect("peer connect");
    let child = expect_client_connected(&rx);

    peer.write_all(b"THIS IS NOT AN RTSP START LINE\r\n\r\n").unwrap();

    match recv_event(&rx) {
        SessionEvent::Data { id, .. } => assert_eq!(id, child),
        other => panic!("expected Data for the malformed message, got {:?}", other),
    }
    match recv_event(&rx) {
        SessionEvent::Error { id, send, err, .. } => {
            assert_eq!(id, child);
            assert!(!send, "malformed input is a receive failure");
            assert!(err < 0, "errno-style code, got {err}");
        }
        other => panic!("expected Error, got {:?}", other),
    }

    // Teardown is the consumer's contract.
    net.destroy_session(child).unwrap();
    net.stop().unwrap();
}

#[test]
fn destroy_closes_the_socket_exactly_once() {
    let mut net = started();
    let (tx, _rx) = mpsc::channel();

    let id = net
        .create_udp_session(18640, None, Arc::new(tx))
        .expect("udp session");

    assert!(
        UdpSocket::bind("0.0.0.0:18640").is_err(),
        "port must be held while the session lives"
    );

    net.destroy_session(id).unwrap();
    UdpSocket::bind("0.0.0.0:18640").expect("port must be free after destroy");

    assert!(matches!(
        net.destroy_session(id),
        Err(NetError::SessionNotFound(_))
    ));

    net.stop().unwrap();
}

#[test]
fn lifecycle_misuse_is_reported() {
    let mut net = NetworkSession::new();
    let (tx, _rx) = mpsc::channel();

    assert!(matches!(
        net.create_udp_session(0, None, Arc::new(tx)),
        Err(NetError::NotStarted)
    ));
    assert!(matches!(net.stop(), Err(NetError::NotStarted)));

    net.start().unwrap();
    assert!(matches!(net.start(), Err(NetError::AlreadyRunning)));
    assert!(matches!(
        net.destroy_session(42),
        Err(NetError::SessionNotFound(42))
    ));
    assert!(matches!(
        net.send_request(42, b"x"),
        Err(NetError::SessionNotFound(42))
    ));

    net.stop().unwrap();
    assert!(matches!(net.stop(), Err(NetError::NotStarted)));
}
