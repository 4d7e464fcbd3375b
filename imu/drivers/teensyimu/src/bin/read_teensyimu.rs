use clap::Parser;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use teensyimu::{list_ports, DriverConfig, ImuError, ImuMsg, ReceiverStatus, TeensyImu};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Print IMU samples streamed by a Teensy sensor board.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial device path
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// TOML file with `port` and `baud`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ask the device to sample at this rate (Hz)
    #[arg(short, long)]
    rate: Option<u16>,

    /// List serial ports and exit
    #[arg(long)]
    list: bool,
}

/// Sample rate from consecutive device timestamps.
#[derive(Default)]
struct RateMeter {
    last_t_ms: Option<u32>,
}

impl RateMeter {
    fn update(&mut self, t_ms: u32) -> Option<f64> {
        let hz = self.last_t_ms.and_then(|last| match t_ms.checked_sub(last) {
            Some(dt) if dt > 0 => Some(1000.0 / dt as f64),
            _ => None,
        });
        self.last_t_ms = Some(t_ms);
        hz
    }
}

fn print_sample(msg: &ImuMsg, hz: Option<f64>) {
    const W: usize = 5;
    let hz = hz
        .map(|hz| format!("{:.1}", hz))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "Got IMU at {} ms ({} Hz): {:>w$.2}, {:>w$.2}, {:>w$.2}\t{:>w$.2}, {:>w$.2}, {:>w$.2}",
        msg.t_ms,
        hz,
        msg.accel.x,
        msg.accel.y,
        msg.accel.z,
        msg.gyro.x,
        msg.gyro.y,
        msg.gyro.z,
        w = W,
    );
}

fn load_config(args: &Args) -> Result<DriverConfig, ImuError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                ImuError::ConfigurationError(format!("{}: {}", path.display(), e))
            })?;
            DriverConfig::from_toml_str(&text)?
        }
        None => DriverConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud = baud;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list {
        return match list_ports() {
            Ok(ports) => {
                for port in ports {
                    println!("{}", port);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "failed to list ports");
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let imu = match TeensyImu::open(&config) {
        Ok(imu) => imu,
        Err(e) => {
            error!(error = %e, port = %config.port, "failed to open IMU");
            return ExitCode::FAILURE;
        }
    };

    let meter = Mutex::new(RateMeter::default());
    imu.register_imu(move |msg| {
        let hz = meter.lock().update(msg.t_ms);
        print_sample(msg, hz);
    });

    if let Some(rate) = args.rate {
        match imu.set_rate(rate) {
            Ok(()) => info!(rate, "requested sample rate"),
            Err(e) => error!(error = %e, "failed to set sample rate"),
        }
    }

    // Runs until the process is interrupted or the device goes away.
    match imu.wait() {
        ReceiverStatus::Stopped => ExitCode::SUCCESS,
        ReceiverStatus::Failed(e) => {
            error!(error = %e, "IMU stream ended");
            ExitCode::FAILURE
        }
    }
}
