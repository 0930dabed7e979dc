//! Helpers shared by the splice examples.

use env_logger::Target;
use std::fs::OpenOptions;
use std::io::{self, Write};

/// Installs a logger writing to `output_log_file`, or stdout when it is empty.
pub fn init_logger(log_level: log::LevelFilter, output_log_file: &str) -> io::Result<()> {
    let target = if !output_log_file.is_empty() {
        Target::Pipe(Box::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(output_log_file)?,
        ))
    } else {
        Target::Stdout
    };

    env_logger::Builder::new()
        .target(target)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, log_level)
        .init();
    Ok(())
}

/// Builds a version 2 RTP packet with no CSRC, extension or padding.
pub fn rtp_packet(payload_type: u8, seq: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(12 + payload.len());
    pkt.push(0x80);
    pkt.push(payload_type & 0x7f);
    pkt.extend_from_slice(&seq.to_be_bytes());
    pkt.extend_from_slice(&timestamp.to_be_bytes());
    pkt.extend_from_slice(&ssrc.to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

/// Whether a datagram multiplexed on an RTP port is RTCP (RFC 5761).
pub fn is_rtcp(datagram: &[u8]) -> bool {
    datagram.len() >= 2 && (192..=223).contains(&datagram[1])
}
