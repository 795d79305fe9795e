use std::io;
use std::net::Ipv4Addr;
use std::sync::{mpsc, Arc};
use std::thread;

use clap::Parser;
use wfdnet::{NetworkSession, SessionEvent, TextParser};

#[derive(Parser)]
#[command(
    name = "wfdnet",
    about = "Event inspector for the wfdnet network-session core"
)]
struct Args {
    /// Bind address for the RTSP control listener
    #[arg(long, default_value = "0.0.0.0")]
    bind: Ipv4Addr,

    /// RTSP control port (7236 is the Wi-Fi Display default)
    #[arg(long, short, default_value_t = 7236)]
    rtsp_port: u16,

    /// Also open a UDP media endpoint on this port
    #[arg(long)]
    udp_port: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut net = NetworkSession::new();
    if let Err(e) = net.start() {
        eprintln!("Failed to start worker: {e}");
        return;
    }

    let (tx, rx) = mpsc::channel();

    if let Err(e) = net.create_rtsp_server(args.bind, args.rtsp_port, Arc::new(TextParser), Arc::new(tx.clone()))
    {
        eprintln!("Failed to open RTSP listener: {e}");
        return;
    }
    println!("RTSP listener on {}:{}", args.bind, args.rtsp_port);

    if let Some(udp_port) = args.udp_port {
        if let Err(e) = net.create_udp_session(udp_port, None, Arc::new(tx)) {
            eprintln!("Failed to open UDP endpoint: {e}");
            return;
        }
        println!("UDP endpoint on port {udp_port}");
    }

    thread::spawn(move || {
        for event in rx {
            match event {
                SessionEvent::Data { id, message } => {
                    println!("[{id}] message: {:?}", message.kind)
                }
                SessionEvent::Datagram { id, data, from, .. } => {
                    println!("[{id}] datagram: {} bytes from {from:?}", data.len())
                }
                SessionEvent::BinaryData { id, channel, data, .. } => {
                    println!("[{id}] binary: channel {channel}, {} bytes", data.len())
                }
                other => println!("[{}] {other:?}", other.session_id()),
            }
        }
    });

    println!("Press Enter to stop");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    if let Err(e) = net.stop() {
        eprintln!("Failed to stop worker: {e}");
    }
}
