use anyhow::Result;
use clap::Parser;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "splice-peer")]
#[command(author = "Rusty Rain <y@liu.mx>")]
#[command(version = "0.1.0")]
#[command(about = "Cooperating process answering captured RTP payloads with substitutes")]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(short, long, default_value_t = format!(""))]
    output_log_file: String,
    /// Key of the queue carrying captured payloads
    #[arg(long, default_value_t = 81)]
    outbound_key: i32,
    /// Key of the queue carrying substitute payloads
    #[arg(long, default_value_t = 82)]
    inbound_key: i32,
    /// XOR mask applied to every payload byte, 0 echoes payloads unchanged
    #[arg(short, long, default_value_t = 0)]
    mask: u8,
    /// Only capture, never answer
    #[arg(long)]
    capture_only: bool,
    #[arg(short, long, default_value_t = format!("splice_peer_times.log"))]
    timing_log_file: String,
    /// Remove both queues on exit
    #[arg(short, long)]
    remove: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        let log_level = log::LevelFilter::from_str(&cli.log_level)?;
        rtc_splice_demos::init_logger(log_level, &cli.output_log_file)?;
    }
    run(cli)
}

#[cfg(target_os = "linux")]
fn run(cli: Cli) -> Result<()> {
    use ipc::sysv::SysvQueue;
    use ipc::{Cancellation, ChannelKey, ExchangeChannel, MessageClass};
    use shared::error::Error;
    use splice::{OpTag, TimingLog};
    use std::path::Path;
    use std::time::Duration;

    let captured = SysvQueue::create(ChannelKey(cli.outbound_key))?;
    let answers = if cli.capture_only {
        None
    } else {
        Some(SysvQueue::create(ChannelKey(cli.inbound_key))?)
    };
    println!(
        "Listening on queue {} (id {}), answering on {}",
        captured.key(),
        captured.id(),
        answers
            .as_ref()
            .map(|q| q.key().to_string())
            .unwrap_or_else(|| "nothing".to_string())
    );
    println!("Start the spliced stream now, press ctrl-c to stop");

    let stop = Cancellation::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.cancel();
        })
        .expect("Error setting Ctrl-C handler");
    }

    let timing = TimingLog::default();
    let mut answered = 0u64;
    loop {
        let payload = match captured.recv_timeout(
            MessageClass::PAYLOAD,
            Duration::from_millis(500),
            &stop,
        ) {
            Ok(payload) => payload,
            Err(err) if err.is_timeout() => continue,
            Err(Error::ErrExchangeCancelled) => break,
            Err(err) => return Err(err.into()),
        };
        timing.record_now(OpTag::Capture);
        log::trace!("captured {} bytes", payload.len());

        let Some(answers) = answers.as_ref() else {
            continue;
        };
        let substitute: Vec<u8> = payload.iter().map(|b| b ^ cli.mask).collect();
        match answers.publish(MessageClass::PAYLOAD, &substitute) {
            Ok(()) => {
                timing.record_now(OpTag::Substitute);
                answered += 1;
            }
            Err(err) => log::warn!("answer dropped: {}", err),
        }
    }

    println!("Answered {} payloads", answered);
    if let Some(n) = timing.flush(Path::new(&cli.timing_log_file))? {
        println!("Wrote {} timing records to {}", n, cli.timing_log_file);
    }

    if cli.remove {
        captured.destroy()?;
        if let Some(answers) = answers {
            answers.destroy()?;
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run(_cli: Cli) -> Result<()> {
    anyhow::bail!("System V message queues are only supported on Linux")
}
