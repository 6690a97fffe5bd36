use std::io::{self, BufRead};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use log::{error, info};

use polar_pmd::polar_client::{PolarClient, PolarClientConfig};
use polar_pmd::protocol::MeasurementType;
use polar_pmd::types::{MeasurementEvent, PpgData, SampleBatch};

#[derive(Parser)]
#[command(name = "polar-pmd")]
#[command(about = "Stream one Polar PMD measurement and print the decoded samples")]
struct Cli {
    /// Measurement to stream
    #[arg(value_enum, default_value_t = Measurement::Ecg)]
    measurement: Measurement,

    /// Connect to the first device whose name starts with this
    #[arg(short, long, default_value = "Polar")]
    name_prefix: String,

    /// Seconds to scan before giving up
    #[arg(short, long, default_value_t = 15)]
    scan_timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Measurement {
    Ecg,
    Acc,
    Ppg,
    Ppi,
    Gyro,
    Mag,
    Bioz,
    Baro,
}

impl From<Measurement> for MeasurementType {
    fn from(m: Measurement) -> Self {
        match m {
            Measurement::Ecg => MeasurementType::Ecg,
            Measurement::Acc => MeasurementType::Acc,
            Measurement::Ppg => MeasurementType::Ppg,
            Measurement::Ppi => MeasurementType::Ppi,
            Measurement::Gyro => MeasurementType::Gyro,
            Measurement::Mag => MeasurementType::Magnetometer,
            Measurement::Bioz => MeasurementType::Bioz,
            Measurement::Baro => MeasurementType::Barometer,
        }
    }
}

fn print_event(event: &MeasurementEvent) {
    let ts = event.timestamp;
    match &event.batch {
        SampleBatch::Ecg(samples) => {
            let first = samples.first().map_or(0, |s| s.microvolts);
            println!("[ECG]   ts={ts}  n={:3}  sample[0]={first:+7} µV", samples.len());
        }
        SampleBatch::Acc(samples) => {
            if let Some(s) = samples.first() {
                println!(
                    "[ACC]   ts={ts}  n={:3}  x={:+5} mG  y={:+5} mG  z={:+5} mG",
                    samples.len(),
                    s.x,
                    s.y,
                    s.z
                );
            }
        }
        SampleBatch::Gyro(samples) | SampleBatch::Magnetometer(samples) => {
            if let Some(s) = samples.first() {
                println!(
                    "[{}] ts={ts}  n={:3}  x={:+.3}  y={:+.3}  z={:+.3}",
                    event.measurement,
                    samples.len(),
                    s.x,
                    s.y,
                    s.z
                );
            }
        }
        SampleBatch::Ppg(PpgData::Samples(samples)) => {
            if let Some(s) = samples.first() {
                println!("[PPG]   ts={ts}  n={:3}  ch={:?}", samples.len(), s.channels);
            }
        }
        SampleBatch::Ppg(other) => println!("[PPG]   ts={ts}  {other:?}"),
        SampleBatch::Ppi(samples) => {
            for s in samples {
                println!(
                    "[PPI]   hr={:3} bpm  pp={:4} ms  ±{} ms  blocker={} contact={}",
                    s.hr, s.pp_ms, s.pp_error_estimate, s.blocker, s.skin_contact
                );
            }
        }
        SampleBatch::Bioz(samples) => {
            if let Some(s) = samples.first() {
                println!("[BIOZ]  ts={ts}  n={:3}  value={}", samples.len(), s.primary);
            }
        }
        SampleBatch::Barometer(samples) => {
            if let Some(s) = samples.first() {
                println!("[BARO]  ts={ts}  {:.2} hPa", s.pressure);
            }
        }
        SampleBatch::Raw(raw) => println!(
            "[RAW]   type=0x{:02x} frame=0x{:02x}  {} bytes",
            raw.measurement_byte,
            raw.frame_type,
            raw.payload.len()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=polar_pmd=debug cargo run -- acc
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let measurement = MeasurementType::from(cli.measurement);

    // ── Connect ───────────────────────────────────────────────────────────────
    let client = PolarClient::new(PolarClientConfig {
        name_prefix: cli.name_prefix,
        scan_timeout_secs: cli.scan_timeout,
        ..Default::default()
    });
    info!("Connecting to Polar sensor …");
    let (session, handle) = client.connect().await?;
    info!("✅  Connected to: {}", handle.name);

    let features = tokio::time::timeout(Duration::from_secs(10), session.read_features(true))
        .await
        .map_err(|_| anyhow!("no PMD feature bitmap within 10 s"))??;
    info!("Supported measurements: {:?}", features.measurements());

    // ── Negotiate and start ───────────────────────────────────────────────────
    let available = session.query_settings(measurement).await?;
    info!("{measurement} settings offered: {available}");
    let mut stream = session.stream(measurement, available.max_of()).await?;
    info!(
        "{measurement} started with {}",
        session
            .measurement_state(measurement)
            .selected
            .map(|s| s.to_string())
            .unwrap_or_default()
    );

    info!("Commands (type + Enter):");
    info!("  q  – stop and quit");
    info!("  s  – show session state");
    info!("  f  – show supported measurements\n");

    // Stdin is read on an OS thread so no StdinLock is held across awaits.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line.trim().to_owned()).is_err() {
                break;
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(event)) => print_event(&event),
                Some(Err(e)) => {
                    error!("❌  {e}");
                    break;
                }
                None => break,
            },
            Some(line) = line_rx.recv() => match line.as_str() {
                "q" => {
                    info!("Quit requested.");
                    if let Err(e) = stream.close().await {
                        error!("Stop error: {e}");
                    }
                    handle.disconnect().await.ok();
                    return Ok(());
                }
                "s" => info!(
                    "running={:?}  dropped frames={}  overflowed batches={}  {measurement}: {:?}",
                    session.running_measurements(),
                    session.dropped_frames(),
                    session.overflowed_batches(),
                    session.measurement_state(measurement).phase
                ),
                "f" => info!(
                    "Supported measurements: {:?}",
                    session.features().map(|f| f.measurements())
                ),
                "" => {}
                other => info!("Unknown command '{other}'"),
            },
        }
    }

    info!("Event loop finished – exiting.");
    Ok(())
}
