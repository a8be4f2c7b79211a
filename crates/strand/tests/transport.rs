//! Transport behavior over the simulated fabric: handshake, stop-and-wait
//! data transfer, duplicate suppression, teardown, loss recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use strand::{
    spawn, DatagramReceiver, DatagramSender, Endpoint, Fabric, LossPolicy, NetAddr, NetConfig,
    NetError, NetStack, Runtime, RuntimeConfig, StreamSocket,
};
use strand_net::wire::{MsgType, StreamHeader};

const HOST: u64 = 1;

fn fast_rt() -> Runtime {
    Runtime::new(RuntimeConfig::new().tick_ms(2).park_timeout_ms(10)).unwrap()
}

fn fast_net() -> NetConfig {
    NetConfig::new().max_segment(128).rto_ms(20).rto_ceil_ms(640)
}

fn ep(port: u16) -> Endpoint {
    Endpoint::new(NetAddr::new(HOST), port)
}

/// Server thread body: accept on `port`, accumulate bytes until the peer
/// closes, then record everything received.
fn echoless_server(stack: NetStack, port: u16, sink: Arc<Mutex<Vec<u8>>>) {
    let sock = StreamSocket::server(&stack, port).expect("server handshake");
    let mut buf = [0u8; 80];
    loop {
        match sock.recv(&mut buf) {
            Ok(0) => break,
            Ok(n) => sink.lock().unwrap().extend_from_slice(&buf[..n]),
            Err(e) => panic!("server recv failed: {}", e),
        }
    }
}

#[test]
fn roundtrip_across_fragmentation_and_partial_reads() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), fast_net()).unwrap();

    // 250 bytes through 128-byte segments, read back with an 80-byte buffer
    let payload: Vec<u8> = (0..250u32).map(|i| (i * 7 % 251) as u8).collect();
    let received = Arc::new(Mutex::new(Vec::new()));

    let server_stack = stack.clone();
    let sink = Arc::clone(&received);
    let expected = payload.clone();
    rt.run(move || {
        spawn(move || echoless_server(server_stack, 80, sink)).unwrap();

        let sock = StreamSocket::connect(&stack, ep(80)).expect("connect");
        let sent = sock.send(&payload).expect("send");
        assert_eq!(sent, payload.len());
        sock.close();
    })
    .unwrap();

    assert_eq!(*received.lock().unwrap(), expected);
}

#[test]
fn duplicate_segment_is_not_redelivered() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), fast_net()).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let server_stack = stack.clone();
    let sink = Arc::clone(&received);
    rt.run(move || {
        spawn(move || echoless_server(server_stack, 80, sink)).unwrap();

        let sock = StreamSocket::connect(&stack, ep(80)).expect("connect");
        sock.send(b"hello").expect("send");

        // Redeliver the just-acknowledged data segment byte-identically:
        // client seq 2 (1 was the SYN), ack 1 (the SYN-ACK)
        let dup = StreamHeader {
            src: Endpoint::new(stack.local_addr(), sock.local_port()),
            dst: ep(80),
            msg_type: MsgType::Ack,
            seq: 2,
            ack: 1,
        };
        let mut frame = dup.encode();
        frame.extend_from_slice(b"hello");
        stack.deliver(&frame);

        sock.send(b" world").expect("send");
        sock.close();
    })
    .unwrap();

    assert_eq!(received.lock().unwrap().as_slice(), b"hello world");
}

#[test]
fn fin_unblocks_receiver_with_eos_then_errors() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), fast_net()).unwrap();

    let eos_seen = Arc::new(AtomicBool::new(false));
    let server_stack = stack.clone();
    let flag = Arc::clone(&eos_seen);
    rt.run(move || {
        spawn(move || {
            let sock = StreamSocket::server(&server_stack, 80).expect("server handshake");
            let mut buf = [0u8; 16];
            // Blocked with no data in flight; the FIN must unblock us
            // with a clean zero-length result
            assert_eq!(sock.recv(&mut buf).unwrap(), 0);
            assert!(matches!(
                sock.recv(&mut buf),
                Err(NetError::ConnectionClosed)
            ));
            assert!(matches!(sock.send(b"x"), Err(NetError::ConnectionClosed)));
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let sock = StreamSocket::connect(&stack, ep(80)).expect("connect");
        sock.close();
        assert!(matches!(sock.send(b"x"), Err(NetError::ConnectionClosed)));
        assert!(matches!(
            sock.recv(&mut [0u8; 8]),
            Err(NetError::ConnectionClosed)
        ));
    })
    .unwrap();

    assert!(eos_seen.load(Ordering::SeqCst));
}

#[test]
fn connect_without_listener_reports_unreachable() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let config = NetConfig::new().rto_ms(10).rto_ceil_ms(40);
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), config).unwrap();

    rt.run(move || {
        let err = StreamSocket::connect(&stack, ep(999)).unwrap_err();
        assert_eq!(err, NetError::PeerUnreachable { acked: 0 });
    })
    .unwrap();
}

#[test]
fn connect_to_live_connection_is_busy() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), fast_net()).unwrap();

    let server_stack = stack.clone();
    rt.run(move || {
        spawn(move || {
            let sock = StreamSocket::server(&server_stack, 80).expect("server handshake");
            let mut buf = [0u8; 16];
            // Rejects the competing SYN, then sees the real peer's FIN
            assert_eq!(sock.recv(&mut buf).unwrap(), 0);
        })
        .unwrap();

        let first = StreamSocket::connect(&stack, ep(80)).expect("first connect");
        let err = StreamSocket::connect(&stack, ep(80)).unwrap_err();
        assert_eq!(err, NetError::Busy);
        first.close();
    })
    .unwrap();
}

#[test]
fn transfer_survives_packet_loss() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let config = NetConfig::new().max_segment(64).rto_ms(20).rto_ceil_ms(1280);
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), config).unwrap();

    let payload: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
    let received = Arc::new(Mutex::new(Vec::new()));

    let server_stack = stack.clone();
    let sink = Arc::clone(&received);
    let expected = payload.clone();
    let loss_fabric = fabric.clone();
    rt.run(move || {
        // Handshake and data run lossy; close runs clean so the test does
        // not wait out a full FIN backoff ladder
        loss_fabric.set_loss(LossPolicy::EveryNth(3));
        spawn(move || echoless_server(server_stack, 80, sink)).unwrap();

        let sock = StreamSocket::connect(&stack, ep(80)).expect("connect despite loss");
        let sent = sock.send(&payload).expect("send despite loss");
        assert_eq!(sent, payload.len());

        loss_fabric.set_loss(LossPolicy::None);
        sock.close();
    })
    .unwrap();

    assert!(fabric.dropped() > 0, "loss policy never engaged");
    assert_eq!(*received.lock().unwrap(), expected);
}

#[test]
fn datagram_ports_roundtrip() {
    let rt = fast_rt();
    let fabric = Fabric::new();
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(HOST), fast_net()).unwrap();

    let got = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&got);
    rt.run(move || {
        let rx = DatagramReceiver::bind(&stack, 200).expect("bind");
        spawn(move || {
            let mut buf = [0u8; 64];
            let (n, src) = rx.recv(&mut buf).expect("recv");
            assert_eq!(&buf[..n], b"ping");
            assert!(src.port >= 32768, "sender port {} not ephemeral", src.port);
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let tx = DatagramSender::create(&stack, ep(200)).expect("create sender");
        assert_eq!(tx.send(b"ping").unwrap(), 4);
    })
    .unwrap();

    assert!(got.load(Ordering::SeqCst));
}
