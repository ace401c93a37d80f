//! Spacewatch simulator - publishes synthetic detection batches
//!
//! Walks a handful of people between the configured zones and publishes one
//! detection batch per frame, in the same format the person detector uses.
//!
//! Usage:
//!   cargo run --bin spacewatch-sim -- --config config/dev.toml --people 6 --fps 2
//!
//! Options worth knowing:
//! - `--loiter` keeps person 1 at a desk with sub-pixel jitter (idle anomalies
//!   under the displacement movement policy)
//! - `--intruder` sends person 1 through restricted zones
//! - `--iso-ts` stamps batches with RFC 3339 strings instead of epoch ms

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use spacewatch::domain::{epoch_ms, Point, ZoneType};
use spacewatch::infra::Config;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Half-size of the synthetic person box (pixels)
const BOX_HALF_W: f64 = 25.0;
const BOX_HALF_H: f64 = 60.0;

#[derive(Parser, Debug)]
#[command(name = "spacewatch-sim", version)]
#[command(about = "Synthetic detection publisher for local testing")]
struct Args {
    /// Config file path (zones and MQTT settings); built-in layout if missing
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// MQTT broker host (overrides config)
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port (overrides config)
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Detection topic (overrides config)
    #[arg(long)]
    topic: Option<String>,

    /// Number of simulated people
    #[arg(long, default_value_t = 6)]
    people: usize,

    /// Frames per second
    #[arg(long, default_value_t = 2.0)]
    fps: f64,

    /// Seconds each person stays in a zone before moving on
    #[arg(long, default_value_t = 30.0)]
    dwell_secs: f64,

    /// Walking speed in pixels per second
    #[arg(long, default_value_t = 150.0)]
    speed: f64,

    /// Stop after this many seconds (0 runs until Ctrl+C)
    #[arg(long, default_value_t = 0)]
    duration_secs: u64,

    /// Keep person 1 parked at a desk
    #[arg(long)]
    loiter: bool,

    /// Route person 1 through restricted zones
    #[arg(long)]
    intruder: bool,

    /// Use RFC 3339 timestamps
    #[arg(long)]
    iso_ts: bool,
}

/// A zone stop on a simulated route
#[derive(Debug, Clone, Copy)]
struct Stop {
    center: Point,
    zone_type: ZoneType,
    restricted: bool,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Staying put until the given sim time (seconds)
    Dwell { until: f64 },
    Walk,
}

struct SimPerson {
    id: i64,
    position: Point,
    route: Vec<Stop>,
    next: usize,
    phase: Phase,
    /// Phase offset for wander motion
    seed: f64,
    parked: bool,
}

impl SimPerson {
    fn step(&mut self, t: f64, dt: f64, args: &Args) {
        if self.parked {
            // stays inside a 2px radius
            self.position = Point::new(
                self.route[0].center.x + (t * 0.7 + self.seed).sin() * 1.5,
                self.route[0].center.y + (t * 0.9 + self.seed).cos() * 1.5,
            );
            return;
        }

        match self.phase {
            Phase::Dwell { until } if t < until => {
                let anchor = self.route[(self.next + self.route.len() - 1) % self.route.len()].center;
                self.position = Point::new(
                    anchor.x + (t * 0.3 + self.seed).sin() * 20.0,
                    anchor.y + (t * 0.2 + self.seed).cos() * 15.0,
                );
            }
            Phase::Dwell { .. } => self.phase = Phase::Walk,
            Phase::Walk => {
                let target = self.route[self.next].center;
                let dist = self.position.distance_to(&target);
                let travel = args.speed * dt;
                if dist <= travel {
                    self.position = target;
                    let dwell = match self.route[self.next].zone_type {
                        ZoneType::Break => args.dwell_secs * 0.5,
                        ZoneType::Meeting => args.dwell_secs * 1.5,
                        _ => args.dwell_secs,
                    };
                    self.phase = Phase::Dwell { until: t + dwell + self.seed };
                    self.next = (self.next + 1) % self.route.len();
                } else {
                    self.position = Point::new(
                        self.position.x + (target.x - self.position.x) / dist * travel,
                        self.position.y + (target.y - self.position.y) / dist * travel,
                    );
                }
            }
        }
    }

    fn detection(&self) -> serde_json::Value {
        let Point { x, y } = self.position;
        json!({
            "id": self.id,
            "bbox": [x - BOX_HALF_W, y - BOX_HALF_H, x + BOX_HALF_W, y + BOX_HALF_H],
        })
    }
}

fn centroid(coordinates: &[[f64; 2]]) -> Point {
    let n = coordinates.len().max(1) as f64;
    let (sx, sy) = coordinates.iter().fold((0.0_f64, 0.0_f64), |(sx, sy), &[x, y]| (sx + x, sy + y));
    Point::new(sx / n, sy / n)
}

fn build_people(config: &Config, args: &Args) -> Vec<SimPerson> {
    let stops: Vec<Stop> = config
        .zones()
        .iter()
        .map(|zone| Stop {
            center: centroid(&zone.coordinates),
            zone_type: zone.zone_type,
            restricted: zone.restricted,
        })
        .collect();
    let open_stops: Vec<Stop> = stops.iter().copied().filter(|s| !s.restricted).collect();
    let desk = open_stops
        .iter()
        .copied()
        .find(|s| s.zone_type == ZoneType::Desk)
        .or_else(|| open_stops.first().copied())
        .or_else(|| stops.first().copied());

    (0..args.people)
        .filter_map(|i| {
            let first = i == 0;
            let parked = first && args.loiter;
            let route: Vec<Stop> = if parked {
                vec![desk?]
            } else {
                let pool = if first && args.intruder { &stops } else { &open_stops };
                if pool.is_empty() {
                    return None;
                }
                (0..pool.len()).map(|k| pool[(k + i) % pool.len()]).collect()
            };
            let start = route[0].center;
            Some(SimPerson {
                id: i as i64 + 1,
                position: Point::new(start.x, start.y),
                next: 1 % route.len(),
                route,
                phase: Phase::Dwell { until: i as f64 * 2.0 },
                seed: i as f64 * 1.7,
                parked,
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.fps > 0.0, "--fps must be positive");

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "using built-in zone layout");
            Config::default()
        }
    };

    let host = args.mqtt_host.clone().unwrap_or_else(|| config.mqtt_host().to_string());
    let port = args.mqtt_port.unwrap_or(config.mqtt_port());
    let topic = args.topic.clone().unwrap_or_else(|| config.mqtt_topic().to_string());

    let mut mqttoptions = MqttOptions::new(format!("spacewatch-sim-{}", std::process::id()), &host, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("sim_mqtt_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "sim_mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let mut people = build_people(&config, &args);
    info!(
        host = %host,
        port = %port,
        topic = %topic,
        people = %people.len(),
        fps = %args.fps,
        zones = %config.zones().len(),
        "sim_started"
    );

    let dt = 1.0 / args.fps;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(dt));
    let mut frame: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(frames = %frame, "sim_stopped");
                return Ok(());
            }
        }

        let t = frame as f64 * dt;
        if args.duration_secs > 0 && t >= args.duration_secs as f64 {
            info!(frames = %frame, "sim_finished");
            return Ok(());
        }

        for person in &mut people {
            person.step(t, dt, &args);
        }

        let ts = if args.iso_ts {
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
        } else {
            json!(epoch_ms())
        };
        let detections: Vec<serde_json::Value> = people.iter().map(SimPerson::detection).collect();
        let payload = json!({ "ts": ts, "detections": detections }).to_string();

        if let Err(e) = client.publish(&topic, QoS::AtMostOnce, false, payload).await {
            warn!(error = %e, "sim_publish_failed");
        } else {
            debug!(frame = %frame, detections = %people.len(), "sim_frame_published");
        }
        frame += 1;
    }
}
