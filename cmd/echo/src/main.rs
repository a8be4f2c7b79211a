//! Echo example
//!
//! A server and a client on the same runtime streaming over a fabric that
//! drops every fifth frame; retransmission makes the conversation come out
//! intact anyway.
//!
//! # Environment Variables
//!
//! - `STRAND_LOG_LEVEL=debug` - set log level (off, error, warn, info, debug, trace)
//! - `STRAND_FLUSH_EPRINT=1` - flush debug output immediately

use strand::{
    spawn, Endpoint, Fabric, LossPolicy, NetAddr, NetConfig, NetStack, Runtime, RuntimeConfig,
    StreamSocket,
};
use strand::{kinfo, init_logging};

// STRAND_LOG_LEVEL=debug cargo run -p strand-echo
fn main() {
    println!("=== strand echo example ===\n");

    init_logging();

    let rt = Runtime::new(RuntimeConfig::from_env()).expect("runtime");
    let fabric = Fabric::with_loss(LossPolicy::EveryNth(5));
    let config = NetConfig::from_env()
        .max_segment(64)
        .rto_ms(50)
        .rto_ceil_ms(1600);
    let stack = NetStack::attach(&rt.handle(), &fabric, NetAddr::new(1), config).expect("attach");

    let server_stack = stack.clone();
    let report_fabric = fabric.clone();
    rt.run(move || {
        kinfo!("starting echo server on port 80");
        spawn(move || {
            let sock = StreamSocket::server(&server_stack, 80).expect("server handshake");
            let mut buf = [0u8; 256];
            loop {
                match sock.recv(&mut buf) {
                    Ok(0) => {
                        println!("server: peer closed, shutting down");
                        break;
                    }
                    Ok(n) => {
                        println!("server: echoing {} bytes", n);
                        if sock.send(&buf[..n]).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        println!("server: {}", e);
                        break;
                    }
                }
            }
        })
        .expect("spawn server");

        let sock = StreamSocket::connect(&stack, Endpoint::new(NetAddr::new(1), 80))
            .expect("connect");
        for msg in ["one small step", "across a lossy wire", "goodbye"] {
            sock.send(msg.as_bytes()).expect("send");
            let mut buf = [0u8; 256];
            let n = sock.recv(&mut buf).expect("recv");
            println!(
                "client: echoed back {:?}",
                std::str::from_utf8(&buf[..n]).unwrap()
            );
        }
        sock.close();
    })
    .expect("run");

    println!(
        "\ndone; the fabric dropped {} frames along the way",
        report_fabric.dropped()
    );
}
