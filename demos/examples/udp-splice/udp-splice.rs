use anyhow::Result;
use bytes::BytesMut;
use clap::Parser;
use ipc::{Cancellation, ChannelKey, ExchangeChannel, MemoryBus, MessageClass};
use rand::Rng;
use rtc_splice_demos::{is_rtcp, rtp_packet};
use shared::error::Error;
use splice::{MediaTransport, PacketHandler, SpliceBuilder, TransportInfo};
use std::net::{SocketAddr, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const PAYLOAD_TYPE: u8 = 111;
const SSRC: u32 = 0x5eed_cafe;
const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "udp-splice")]
#[command(author = "Rusty Rain <y@liu.mx>")]
#[command(version = "0.1.0")]
#[command(about = "An example of payload splicing over a loopback UDP transport")]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(short, long, default_value_t = format!(""))]
    output_log_file: String,
    /// Number of RTP packets to send
    #[arg(short, long, default_value_t = 50)]
    count: u16,
    /// Payload size in bytes
    #[arg(short, long, default_value_t = 160)]
    size: usize,
    /// Milliseconds between packets
    #[arg(short, long, default_value_t = 20)]
    interval: u64,
    /// XOR mask the peer applies to captured payloads
    #[arg(short, long, default_value_t = 0xff)]
    mask: u8,
    #[arg(short, long, default_value_t = format!("udp_splice_times.log"))]
    timing_log_file: String,
}

type Handlers = Arc<Mutex<Option<(PacketHandler, PacketHandler)>>>;

/// Transport sending datagrams to a fixed remote and delivering what arrives
/// on its socket from a reader thread.
struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    handlers: Handlers,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl UdpTransport {
    fn bind(local: &str, remote: Option<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(local)?;
        let remote = match remote {
            Some(remote) => remote,
            None => socket.local_addr()?,
        };
        Ok(Self {
            socket,
            remote,
            handlers: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        })
    }

    fn spawn_reader(&self) -> shared::error::Result<JoinHandle<()>> {
        let socket = self.socket.try_clone()?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let handlers = Arc::clone(&self.handlers);
        let running = Arc::clone(&self.running);

        Ok(thread::spawn(move || {
            let mut buf = vec![0u8; 1500];
            while running.load(Ordering::Acquire) {
                let n = match socket.recv(&mut buf) {
                    Ok(n) => n,
                    Err(err)
                        if matches!(
                            err.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(err) => {
                        log::error!("udp recv: {}", err);
                        break;
                    }
                };
                let datagram = &buf[..n];
                if let Ok(mut guard) = handlers.lock()
                    && let Some((rtp, rtcp)) = guard.as_mut()
                {
                    if is_rtcp(datagram) {
                        rtcp(datagram);
                    } else {
                        rtp(datagram);
                    }
                }
            }
        }))
    }

    fn stop_reader(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl MediaTransport for UdpTransport {
    fn info(&self) -> TransportInfo {
        TransportInfo {
            name: "udp".to_string(),
            local_addr: self.socket.local_addr().ok(),
            remote_addr: Some(self.remote),
        }
    }

    fn attach(&mut self, rtp: PacketHandler, rtcp: PacketHandler) -> shared::error::Result<()> {
        *self.handlers.lock()? = Some((rtp, rtcp));
        if self.reader.is_none() {
            self.running.store(true, Ordering::Release);
            self.reader = Some(self.spawn_reader()?);
        }
        Ok(())
    }

    fn detach(&mut self) -> shared::error::Result<()> {
        self.stop_reader();
        *self.handlers.lock()? = None;
        Ok(())
    }

    fn send_rtp(&mut self, packet: BytesMut) -> shared::error::Result<()> {
        self.socket.send_to(&packet, self.remote)?;
        Ok(())
    }

    fn send_rtcp(&mut self, packet: BytesMut) -> shared::error::Result<()> {
        self.socket.send_to(&packet, self.remote)?;
        Ok(())
    }

    fn send_rtcp_to(&mut self, addr: SocketAddr, packet: BytesMut) -> shared::error::Result<()> {
        self.socket.send_to(&packet, addr)?;
        Ok(())
    }

    fn close(&mut self) -> shared::error::Result<()> {
        self.stop_reader();
        Ok(())
    }
}

/// In-process stand-in for the cooperating process: answers every captured
/// payload with its XOR under `mask`.
fn spawn_peer(bus: &MemoryBus, mask: u8, stop: Cancellation) -> JoinHandle<u64> {
    let captured = bus.create(ChannelKey::OUTBOUND);
    let answers = bus.create(ChannelKey::INBOUND);
    thread::spawn(move || {
        let mut answered = 0;
        loop {
            match captured.recv_timeout(MessageClass::PAYLOAD, Duration::from_millis(100), &stop) {
                Ok(payload) => {
                    let substitute: Vec<u8> = payload.iter().map(|b| b ^ mask).collect();
                    if answers.publish(MessageClass::PAYLOAD, &substitute).is_ok() {
                        answered += 1;
                    }
                }
                Err(err) if err.is_timeout() => continue,
                Err(Error::ErrExchangeCancelled) | Err(Error::ErrChannelRemoved) => break,
                Err(err) => {
                    log::error!("peer: {}", err);
                    break;
                }
            }
        }
        answered
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        let log_level = log::LevelFilter::from_str(&cli.log_level)?;
        rtc_splice_demos::init_logger(log_level, &cli.output_log_file)?;
    }

    let bus = MemoryBus::new();
    let peer_stop = Cancellation::new();
    let peer = spawn_peer(&bus, cli.mask, peer_stop.clone());

    // loopback: everything sent comes back as received media
    let mut transport = UdpTransport::bind("127.0.0.1:0", None)?.with(
        SpliceBuilder::new()
            .with_receive_timeout(Duration::from_millis(100))
            .with_timing_log_path(&cli.timing_log_file)
            .build(&bus),
    );
    println!(
        "Splicing over {:?}, substitution {}",
        transport.info().local_addr,
        transport.engine().substitution()
    );

    let received = Arc::new(AtomicU64::new(0));
    let masked = Arc::new(AtomicU64::new(0));
    {
        let (received, masked) = (Arc::clone(&received), Arc::clone(&masked));
        let expected = cli.mask;
        transport.attach(
            Box::new(move |pkt: &[u8]| {
                received.fetch_add(1, Ordering::Relaxed);
                // payload bytes are all 0 before masking
                if pkt.len() > 12 && pkt[12..].iter().all(|b| *b == expected) {
                    masked.fetch_add(1, Ordering::Relaxed);
                }
            }),
            Box::new(|_: &[u8]| {}),
        )?;
    }
    transport.media_start()?;

    let mut rng = rand::rng();
    let mut timestamp: u32 = rng.random();
    let first_seq: u16 = rng.random();
    for i in 0..cli.count {
        let seq = first_seq.wrapping_add(i);
        let payload = vec![0u8; cli.size];
        let pkt = rtp_packet(PAYLOAD_TYPE, seq, timestamp, SSRC, &payload);
        transport.send_rtp(BytesMut::from(&pkt[..]))?;
        timestamp = timestamp.wrapping_add(960);
        thread::sleep(Duration::from_millis(cli.interval));
    }

    // let the last datagrams arrive
    thread::sleep(Duration::from_millis(100));
    transport.media_stop()?;
    transport.detach()?;
    transport.close()?;

    peer_stop.cancel();
    let answered = peer.join().unwrap_or(0);

    let stats = transport.stats();
    println!("Sent {} packets", cli.count);
    println!(
        "Received {} packets, {} with substituted payload",
        received.load(Ordering::Relaxed),
        masked.load(Ordering::Relaxed)
    );
    println!("Peer answered {} payloads", answered);
    println!("{:#?}", stats);
    println!("Timing log written to {}", cli.timing_log_file);

    Ok(())
}
