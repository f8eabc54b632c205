use std::error::Error;
use std::fmt::Debug;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use linux_embedded_hal::{Delay as HostDelay, I2cdev};
use quad_core::utils::{
    CommandShell, Outcome, Quadcopter, ReadMode, SamplePoller, SampleSink, Sensor,
    controllers::{BusHandle, Delay, HalBus, MotorId},
    math::fusion::{ComplementaryFilter, MadgwickAhrs, SensorFusion},
    sensors::Reading,
};
use tracing::info;

mod dry_run;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// I2C device to use
    #[clap(short = 'i', long, default_value = "/dev/i2c-1", global = true)]
    device: String,
    /// log bus traffic instead of opening the device
    #[clap(long, global = true)]
    dry_run: bool,
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read the ADXL345 accelerometer
    Adxl345(SensorOpts),
    /// Read the ITG3200 gyroscope
    Itg3200(SensorOpts),
    /// Fuse both sensors into attitude angles
    Fusion(FusionOpts),
    /// Drive Afro ESCs from commands on stdin
    Esc(EscOpts),
    /// List responding bus addresses
    Scan,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Raw,
    Physical,
    All,
}

impl From<Mode> for ReadMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Raw => ReadMode::Raw,
            Mode::Physical => ReadMode::Physical,
            Mode::All => ReadMode::All,
        }
    }
}

#[derive(clap::Args)]
struct SensorOpts {
    /// run offset calibration before sampling
    #[clap(short, long)]
    calibrate: bool,
    #[clap(short, long, value_enum, default_value = "physical")]
    mode: Mode,
    /// number of samples, 0 for no limit
    #[clap(short, long, default_value_t = 0)]
    num_samples: u64,
    /// additional delay between samples in seconds
    #[clap(short, long)]
    delay: Option<f64>,
    #[clap(long, default_value_t = 100)]
    calibration_samples: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    Complementary,
    Madgwick,
}

#[derive(clap::Args)]
struct FusionOpts {
    #[clap(short, long, value_enum, default_value = "complementary")]
    filter: Filter,
    /// accelerometer share of the complementary blend
    #[clap(short, long, default_value_t = 0.02)]
    weight: f32,
    /// update rate in Hz
    #[clap(short, long, default_value_t = 100.0)]
    rate: f32,
    /// number of updates, 0 for no limit
    #[clap(short, long, default_value_t = 0)]
    num_samples: u64,
    /// calibrate both sensors first
    #[clap(short, long)]
    calibrate: bool,
}

#[derive(clap::Args)]
struct EscOpts {
    /// motor ids (0-3) or addresses (0x29-0x2C)
    #[clap(short, long, value_delimiter = ',', default_value = "0")]
    motors: Vec<String>,
    /// control loop period in ms
    #[clap(short, long, default_value_t = 10)]
    delay: u32,
}

/// Logs every sample in the requested representation.
struct LogSink;

impl<T: Debug> SampleSink<T> for LogSink {
    fn on_sample(
        &mut self,
        sensor: &'static str,
        mode: ReadMode,
        reading: &Reading<T>,
    ) {
        let (raw, phys) = (&reading.raw, &reading.physical);
        match mode {
            ReadMode::Raw => info!("{sensor}: {:?}  {:?}  {:?}", raw.x, raw.y, raw.z),
            ReadMode::Physical => {
                info!("{sensor}: {:7.3}  {:7.3}  {:7.3}", phys.x, phys.y, phys.z)
            }
            ReadMode::All => info!(
                "{sensor}: {:?}({:7.3})  {:?}({:7.3})  {:?}({:7.3})",
                raw.x, phys.x, raw.y, phys.y, raw.z, phys.z
            ),
        }
    }

    fn on_calibrated(
        &mut self,
        sensor: &'static str,
    ) {
        info!("{sensor}: calibration complete");
    }
}

fn parse_motor(token: &str) -> Result<MotorId, Box<dyn Error>> {
    let raw = match token.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => token.parse()?,
    };
    Ok(MotorId::from_raw(raw)?)
}

fn run_sensor<S>(
    sensor: &mut S,
    opts: &SensorOpts,
) -> Result<(), Box<dyn Error>>
where
    S: Sensor,
    S::Error: 'static,
{
    let mut delay = HostDelay;
    sensor.init()?;

    let mut poller = SamplePoller::new(opts.mode.into());
    poller.subscribe(Box::new(LogSink));
    if opts.calibrate {
        poller.calibrate(sensor, opts.calibration_samples, &mut delay)?;
    }

    let interval_us = opts.delay.map(|s| (s * 1e6) as u32).unwrap_or(0);
    poller.poll(sensor, opts.num_samples, interval_us, &mut delay)?;
    sensor.stop()?;
    Ok(())
}

fn run_fusion<B>(
    quad: &Quadcopter<B>,
    opts: &FusionOpts,
) -> Result<(), Box<dyn Error>>
where
    B: BusHandle + Send + 'static,
    B::Error: 'static,
{
    let mut delay = HostDelay;
    let mut fusion = SensorFusion::with_filter(
        quad.accelerometer(None),
        quad.gyroscope(None),
        ComplementaryFilter::new(opts.weight),
    );
    fusion.accel_mut().init()?;
    fusion.gyro_mut().init()?;
    if opts.calibrate {
        fusion.accel_mut().calibrate(100, &mut delay)?;
        fusion.gyro_mut().calibrate(100, &mut delay)?;
        info!("calibration complete");
    }

    let period = Duration::from_secs_f32(1.0 / opts.rate.max(1.0));
    let mut ahrs = MadgwickAhrs::new(opts.rate.max(1.0));
    let mut last = Instant::now();
    let mut count = 0;
    while opts.num_samples == 0 || count < opts.num_samples {
        thread::sleep(period);
        let dt = last.elapsed().as_secs_f32();
        last = Instant::now();
        match opts.filter {
            Filter::Complementary => {
                let a = fusion.update(dt)?;
                info!("x: {:7.2}  y: {:7.2}  z: {:7.2}", a.x, a.y, a.z);
            }
            Filter::Madgwick => {
                let (accel, gyro) = fusion.read_sample()?;
                ahrs.update_imu(accel, gyro);
                let (roll, pitch, yaw) = ahrs.orientation();
                info!("roll: {roll:7.2}  pitch: {pitch:7.2}  yaw: {yaw:7.2}");
            }
        }
        count += 1;
    }

    let (mut accel, mut gyro) = fusion.into_parts();
    accel.stop()?;
    gyro.stop()?;
    Ok(())
}

fn run_escs<B>(
    quad: &mut Quadcopter<B>,
    opts: &EscOpts,
) -> Result<(), Box<dyn Error>>
where
    B: BusHandle + Send + 'static,
{
    let period = Delay::new(opts.delay)?;
    for token in &opts.motors {
        quad.register_motor(parse_motor(token)?, Some(period), HostDelay)?;
    }

    let mut shell = CommandShell::new(quad.registry(), HostDelay);
    if shell.serve(io::stdin().lock(), io::stdout())? == Outcome::Continue {
        // end of input without `exit`: never leave motors spinning
        shell.stop_all();
    }
    Ok(())
}

fn run<B>(
    bus: B,
    cmd: &Cmd,
) -> Result<(), Box<dyn Error>>
where
    B: BusHandle + Send + 'static,
    B::Error: 'static,
{
    let mut quad = Quadcopter::new(bus);
    match cmd {
        Cmd::Adxl345(opts) => run_sensor(&mut quad.accelerometer(None), opts),
        Cmd::Itg3200(opts) => run_sensor(&mut quad.gyroscope(None), opts),
        Cmd::Fusion(opts) => run_fusion(&quad, opts),
        Cmd::Esc(opts) => run_escs(&mut quad, opts),
        Cmd::Scan => {
            let found = quad.bus().scan();
            info!("{} device(s) found", found.len());
            Ok(())
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    if opts.dry_run {
        info!("Dry run, no hardware access");
        return run(dry_run::LoggingBus::default(), &opts.cmd);
    }

    let i2c = I2cdev::new(&opts.device)?;
    info!("Opened {}", opts.device);
    run(HalBus::new(i2c), &opts.cmd)
}
