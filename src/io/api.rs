//! HTTP API for dashboards and scrapers
//!
//! Read-only JSON views of the latest snapshot plus Prometheus text format.
//! Uses hyper for the HTTP server.

use crate::domain::snapshot::AnalyticsSnapshot;
use crate::infra::metrics::{Metrics, PipelineSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::io::snapshot_channel::SnapshotReceiver;
use crate::services::zone_map::ZoneMap;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shared state for request handlers
pub struct ApiState {
    pub site_id: String,
    pub snapshots: SnapshotReceiver,
    pub zone_map: Arc<ZoneMap>,
    pub metrics: Arc<Metrics>,
}

/// One row of `/zones`
#[derive(Debug, Serialize)]
struct ZoneStatus<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    zone_type: &'static str,
    restricted: bool,
    max_capacity: Option<u32>,
    current_count: usize,
    /// current_count / max_capacity as a percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity_pct: Option<f64>,
    cumulative_hours: f64,
}

/// Route a request. Only method and path are inspected.
pub fn route(state: &ApiState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/") => json_response(&serde_json::json!({
            "service": "spacewatch",
            "site": state.site_id,
            "endpoints": ["/metrics", "/zones", "/anomalies", "/heatmap", "/snapshot", "/prometheus", "/health"],
        })),
        (&Method::GET, "/metrics") => json_response(&state.snapshots.latest().metrics),
        (&Method::GET, "/anomalies") => json_response(&state.snapshots.latest().metrics.anomalies),
        (&Method::GET, "/heatmap") => json_response(&state.snapshots.latest().heatmap),
        (&Method::GET, "/snapshot") => json_response(&*state.snapshots.latest()),
        (&Method::GET, "/zones") => {
            let snapshot = state.snapshots.latest();
            json_response(&zone_statuses(&state.zone_map, &snapshot))
        }
        (&Method::GET, "/prometheus") => {
            let body = format_prometheus_metrics(
                &state.metrics.peek(),
                &state.snapshots.latest(),
                &state.site_id,
            );
            text_response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok"),
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail"),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

/// Every response carries `Access-Control-Allow-Origin: *`
fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

fn json_response<T: Serialize + ?Sized>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => text_response(StatusCode::OK, "application/json", body),
        Err(e) => {
            error!(error = %e, "api_serialize_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "serialization failed")
        }
    }
}

fn zone_statuses<'a>(zone_map: &'a ZoneMap, snapshot: &AnalyticsSnapshot) -> Vec<ZoneStatus<'a>> {
    zone_map
        .zones()
        .iter()
        .map(|zone| {
            let current_count =
                snapshot.heatmap.current_occupancy.get(&zone.name).copied().unwrap_or(0);
            let capacity_pct = zone
                .max_capacity
                .filter(|&cap| cap > 0)
                .map(|cap| current_count as f64 / cap as f64 * 100.0);
            ZoneStatus {
                name: &zone.name,
                zone_type: zone.zone_type.as_str(),
                restricted: zone.restricted,
                max_capacity: zone.max_capacity,
                current_count,
                capacity_pct,
                cumulative_hours: snapshot
                    .heatmap
                    .cumulative_hours
                    .get(&zone.name)
                    .copied()
                    .unwrap_or(0.0),
            }
        })
        .collect()
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Per-zone gauge family, one line per zone
fn write_zone_family<'a>(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    values: impl Iterator<Item = (&'a String, f64)>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    for (zone, value) in values {
        let zone = zone.replace('\\', "\\\\").replace('"', "\\\"");
        let _ = writeln!(output, "{name}{{site=\"{site}\",zone=\"{zone}\"}} {value}");
    }
}

/// Format pipeline counters and zone gauges in Prometheus text exposition format
pub fn format_prometheus_metrics(
    summary: &PipelineSummary,
    snapshot: &AnalyticsSnapshot,
    site: &str,
) -> String {
    let mut output = String::with_capacity(4096);

    let counters = [
        ("spacewatch_cycles_total", "Update cycles processed", summary.cycles_total),
        ("spacewatch_detections_total", "Detections received", summary.detections_total),
        (
            "spacewatch_detections_rejected_total",
            "Detections skipped as malformed or duplicate",
            summary.detections_rejected,
        ),
        ("spacewatch_zone_transitions_total", "Zone changes observed", summary.zone_transitions),
        ("spacewatch_intervals_closed_total", "Residency intervals closed", summary.intervals_closed),
        ("spacewatch_evictions_total", "Entities evicted for absence", summary.evictions_total),
        (
            "spacewatch_orphaned_intervals_total",
            "Open intervals held by evicted entities",
            summary.orphaned_intervals,
        ),
        ("spacewatch_idle_anomalies_total", "Idle-time anomalies", summary.idle_anomalies),
        (
            "spacewatch_unauthorized_anomalies_total",
            "Unauthorized-access anomalies",
            summary.unauthorized_anomalies,
        ),
        (
            "spacewatch_batches_received_total",
            "Detection batches accepted by ingest",
            summary.batches_received,
        ),
        (
            "spacewatch_batches_dropped_total",
            "Detection batches dropped (queue full)",
            summary.batches_dropped,
        ),
        (
            "spacewatch_messages_invalid_total",
            "Detector messages that failed to parse",
            summary.messages_invalid,
        ),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, site, val);
    }
    write_metric(
        &mut output,
        "spacewatch_tracked_entities",
        "Currently tracked entities",
        MetricType::Gauge,
        site,
        summary.tracked_entities,
    );

    write_histogram(
        &mut output,
        "spacewatch_cycle_latency_us",
        "Update cycle latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_cycle_latency_us,
    );

    let heatmap = &snapshot.heatmap;
    write_zone_family(
        &mut output,
        "spacewatch_zone_occupancy",
        "Entities currently in each zone",
        site,
        heatmap.current_occupancy.iter().map(|(zone, &count)| (zone, count as f64)),
    );
    write_zone_family(
        &mut output,
        "spacewatch_zone_hours",
        "Closed residency hours per zone",
        site,
        heatmap.cumulative_hours.iter().map(|(zone, &hours)| (zone, hours)),
    );

    output
}

/// Handle HTTP requests
async fn handle_request<B>(
    req: Request<B>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = %req.uri().path(), "api_request");
    Ok(route(&state, req.method(), req.uri().path()))
}

/// Start the HTTP API server
pub async fn start_api_server(
    port: u16,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(state);

    info!(port = %port, site = %state.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::anomaly::AnomalyRecord;
    use crate::domain::types::EntityId;
    use crate::infra::config::Config;
    use crate::io::snapshot_channel::{create_snapshot_channel, SnapshotSender};
    use http_body_util::BodyExt;

    fn create_state() -> (ApiState, SnapshotSender) {
        let config = Config::default();
        let zone_map = Arc::new(ZoneMap::from_config(config.zones()).unwrap());
        let (tx, rx) = create_snapshot_channel("office");
        let state = ApiState {
            site_id: "office".to_string(),
            snapshots: rx,
            zone_map,
            metrics: Arc::new(Metrics::new()),
        };
        (state, tx)
    }

    fn sample_snapshot() -> AnalyticsSnapshot {
        let mut snapshot = AnalyticsSnapshot { site: "office".to_string(), cycle: 3, ts: 3_000, ..Default::default() };
        snapshot.heatmap.current_occupancy.insert("Desk Area 1".to_string(), 2);
        snapshot.heatmap.cumulative_hours.insert("Desk Area 1".to_string(), 1.5);
        snapshot.metrics.productive_hours.insert("Desk Area 1".to_string(), 1.5);
        snapshot
            .metrics
            .anomalies
            .push(AnomalyRecord::unauthorized_access(EntityId(5), "Server Room", 3_000));
        snapshot
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, tx) = create_state();
        tx.publish(sample_snapshot());

        let response = route(&state, &Method::GET, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["productive_hours"]["Desk Area 1"], 1.5);
        assert_eq!(json["anomalies"][0]["type"], "unauthorized_access");
    }

    #[tokio::test]
    async fn test_zones_endpoint_reports_capacity() {
        let (state, tx) = create_state();
        tx.publish(sample_snapshot());

        let json = body_json(route(&state, &Method::GET, "/zones")).await;
        let zones = json.as_array().unwrap();
        assert_eq!(zones.len(), 5);
        assert_eq!(zones[0]["name"], "Desk Area 1");
        assert_eq!(zones[0]["type"], "desk");
        assert_eq!(zones[0]["current_count"], 2);
        assert_eq!(zones[0]["capacity_pct"], 50.0);
        assert_eq!(zones[0]["cumulative_hours"], 1.5);
        assert_eq!(zones[1]["current_count"], 0);
    }

    #[tokio::test]
    async fn test_heatmap_and_anomalies_endpoints() {
        let (state, tx) = create_state();
        tx.publish(sample_snapshot());

        let heatmap = body_json(route(&state, &Method::GET, "/heatmap")).await;
        assert_eq!(heatmap["current_occupancy"]["Desk Area 1"], 2);
        assert_eq!(heatmap["cumulative_hours"]["Desk Area 1"], 1.5);

        let anomalies = body_json(route(&state, &Method::GET, "/anomalies")).await;
        assert_eq!(anomalies.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_health_and_not_found() {
        let (state, _tx) = create_state();
        assert_eq!(route(&state, &Method::GET, "/health").status(), StatusCode::OK);
        assert_eq!(route(&state, &Method::GET, "/nope").status(), StatusCode::NOT_FOUND);
        assert_eq!(route(&state, &Method::POST, "/metrics").status(), StatusCode::NOT_FOUND);
        assert_eq!(route(&state, &Method::OPTIONS, "/metrics").status(), StatusCode::OK);
    }

    #[test]
    fn test_every_response_allows_any_origin() {
        let (state, _tx) = create_state();
        for (method, path) in [
            (Method::GET, "/"),
            (Method::GET, "/metrics"),
            (Method::GET, "/prometheus"),
            (Method::GET, "/health"),
            (Method::GET, "/nope"),
            (Method::OPTIONS, "/zones"),
        ] {
            let response = route(&state, &method, path);
            assert_eq!(
                response.headers().get("Access-Control-Allow-Origin").map(|v| v.as_bytes()),
                Some(&b"*"[..]),
                "{method} {path}"
            );
        }
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_cycle(150, 2);
        metrics.record_cycle(250, 1);
        metrics.set_tracked_entities(2);

        let output = format_prometheus_metrics(&metrics.peek(), &sample_snapshot(), "office");

        assert!(output.contains("spacewatch_cycles_total{site=\"office\"} 2"));
        assert!(output.contains("spacewatch_detections_total{site=\"office\"} 3"));
        assert!(output.contains("spacewatch_tracked_entities{site=\"office\"} 2"));
        assert!(output.contains("spacewatch_cycle_latency_us_bucket{site=\"office\",le=\"+Inf\"} 2"));
        assert!(output.contains("spacewatch_zone_occupancy{site=\"office\",zone=\"Desk Area 1\"} 2"));
        assert!(output.contains("spacewatch_zone_hours{site=\"office\",zone=\"Desk Area 1\"} 1.5"));
    }
}
