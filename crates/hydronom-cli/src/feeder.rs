//! `hydronom-feeder` – simulated vehicle.
//!
//! Posts randomized telemetry to `POST /api/telemetry` at a fixed rate so the
//! dashboard and the live stream can be exercised without hardware. Leak and
//! low-battery conditions can be scheduled to kick in after a delay.

mod observability;

use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use rand::Rng;
use tracing::{debug, info, warn};

use hydronom_types::{
    Ballast, Battery, Imu, MissionState, Pose, Telemetry, Thrusters, VehicleRef,
};

#[derive(Parser, Debug)]
#[command(name = "hydronom-feeder", about = "Simulated vehicle posting telemetry")]
struct Args {
    /// Vehicle id reported in every sample.
    #[arg(long, default_value = "hydronom-boat-01")]
    vehicle: String,

    /// Samples per second, clamped to 1..=10.
    #[arg(long, default_value_t = 5)]
    hz: u32,

    /// Report as a submarine (depth and ballast populated).
    #[arg(long)]
    as_sub: bool,

    /// Start reporting a leak after this many seconds.
    #[arg(long, value_name = "SECS")]
    leak_after: Option<u64>,

    /// Start reporting a low battery after this many seconds.
    #[arg(long, value_name = "SECS")]
    low_batt_after: Option<u64>,

    /// Base URL of the gateway.
    #[arg(long, default_value = "http://localhost:5000")]
    api: String,

    /// Development token sent as `Authorization: Bearer <token>`.
    #[arg(long, default_value = "DEV_TOKEN")]
    token: String,
}

/// Knobs for one generated sample.
#[derive(Debug, Clone, Default)]
struct SampleParams<'a> {
    vehicle_id: &'a str,
    as_sub: bool,
    waypoint_index: i32,
    leak: bool,
    low_battery: bool,
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

fn make_sample<R: Rng>(rng: &mut R, params: &SampleParams<'_>) -> Telemetry {
    let soc = if params.low_battery {
        rng.gen_range(10.0..19.0)
    } else {
        rng.gen_range(70.0..100.0)
    };

    Telemetry {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        vehicle: VehicleRef {
            id: params.vehicle_id.to_string(),
            kind: if params.as_sub { "sub" } else { "boat" }.to_string(),
        },
        pose: Pose {
            lat: 41.025 + rng.gen_range(-1e-4..1e-4),
            lon: 28.85 + rng.gen_range(-1e-4..1e-4),
            heading_deg: rng.gen_range(0.0..360.0),
            speed_mps: rng.gen_range(0.0..2.0),
        },
        depth_m: if params.as_sub { 1.5 } else { 0.0 },
        imu: Imu {
            roll_deg: round_to(rng.gen_range(-2.0..2.0), 2),
            pitch_deg: round_to(rng.gen_range(-2.0..2.0), 2),
            yaw_deg: round_to(rng.gen_range(0.0..360.0), 2),
        },
        thrusters: Thrusters {
            left_pwm: rng.gen_range(1400..=1500),
            right_pwm: rng.gen_range(1400..=1500),
        },
        rudder_deg: round_to(rng.gen_range(-10.0..10.0), 1),
        ballast: Ballast {
            level_pct: if params.as_sub { rng.gen_range(0..=100) } else { 0 },
        },
        battery: Battery {
            voltage: round_to(rng.gen_range(11.5..16.8), 2),
            soc_pct: round_to(soc, 2),
        },
        leak: params.leak,
        temp_c: round_to(rng.gen_range(18.0..55.0), 1),
        mission: MissionState {
            mode: "AUTONOMOUS".to_string(),
            task_id: "task-001".to_string(),
            waypoint_index: params.waypoint_index,
        },
    }
}

/// Sample period for the requested rate.
fn period_for(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(hz.clamp(1, 10)))
}

/// `true` once `elapsed` has reached a scheduled trigger.
fn triggered(after: Option<u64>, elapsed: Duration) -> bool {
    after.is_some_and(|secs| elapsed >= Duration::from_secs(secs))
}

fn main() {
    let _tracing = observability::init_tracing("hydronom-feeder");

    let args = Args::parse();
    let url = format!("{}/api/telemetry", args.api.trim_end_matches('/'));
    let period = period_for(args.hz);

    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("[hydronom-feeder] HTTP client init failed: {e}");
            std::process::exit(1);
        }
    };

    info!(vehicle = %args.vehicle, %url, ?period, "feeder started");

    let mut rng = rand::thread_rng();
    let start = Instant::now();
    let mut i: i32 = 0;
    loop {
        let elapsed = start.elapsed();
        let params = SampleParams {
            vehicle_id: &args.vehicle,
            as_sub: args.as_sub,
            waypoint_index: i % 3,
            leak: triggered(args.leak_after, elapsed),
            low_battery: triggered(args.low_batt_after, elapsed),
        };
        let sample = make_sample(&mut rng, &params);

        match client
            .post(&url)
            .bearer_auth(&args.token)
            .json(&sample)
            .send()
        {
            Ok(resp) if resp.status().is_success() => debug!(status = %resp.status(), "sample posted"),
            Ok(resp) => warn!(status = %resp.status(), "sample rejected"),
            Err(e) => warn!(error = %e, "POST error"),
        }

        std::thread::sleep(period);
        i = i.wrapping_add(1);
    }
}
