//! robotling-sim - publishes synthetic robotling telemetry
//!
//! Lets the relay and the dashboard be exercised without hardware:
//!
//! ```bash
//! robotling-sim --guid robotling_sim01 --rate-hz 5
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use robotling_devkit::TelemetryBuilder;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "robotling-sim")]
#[command(about = "Publish synthetic robotling telemetry to an MQTT broker", long_about = None)]
struct Args {
    /// Robotling GUID (root topic)
    #[arg(short, long, default_value = "robotling_sim01")]
    guid: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Snapshots per second
    #[arg(long, default_value_t = 2.0)]
    rate_hz: f64,

    /// Stop after this many snapshots (0 = run forever)
    #[arg(long, default_value_t = 0)]
    count: u64,

    /// Leave out the compass block (the relay drops such snapshots)
    #[arg(long)]
    no_compass: bool,
}

/// Smooth, deterministic fake readings for tick `n`
fn snapshot(n: u64, uptime_s: i64, with_compass: bool) -> TelemetryBuilder {
    let t = n as f64 / 10.0;
    let builder = TelemetryBuilder::new()
        .motor_load((40.0 + 20.0 * t.sin()) as i64, (40.0 + 20.0 * t.cos()) as i64)
        .battery_v(((8.2 - 0.001 * n as f64).max(6.0) * 100.0).round() / 100.0)
        .distance_cm(
            (60.0 + 30.0 * (t * 0.7).sin()) as i64,
            (80.0 + 40.0 * (t * 0.5).cos()) as i64,
            (60.0 + 30.0 * (t * 0.9).cos()) as i64,
        )
        .state(if n % 50 < 40 { "RUN" } else { "IDLE" })
        .timestamp_s(uptime_s)
        .with_field("sensor.photodiode", json!(((t * 0.3).sin() + 1.0) / 2.0))
        .with_field("debug.loop_ms", json!(10 + n % 5));
    if with_compass {
        builder.compass(
            (5.0 * t.sin() * 10.0).round() / 10.0,
            ((n * 3) % 360) as f64,
            (3.0 * t.cos() * 10.0).round() / 10.0,
        )
    } else {
        builder.without_compass()
    }
}

/// Interval between snapshots; tokio's interval rejects a zero period
fn tick_period(rate_hz: f64) -> Result<Duration> {
    anyhow::ensure!(
        rate_hz.is_finite() && rate_hz > 0.0,
        "--rate-hz must be a positive finite number, got {rate_hz}"
    );
    let period = Duration::try_from_secs_f64(1.0 / rate_hz)
        .with_context(|| format!("--rate-hz {rate_hz} is too low"))?;
    anyhow::ensure!(!period.is_zero(), "--rate-hz {rate_hz} is too high");
    Ok(period)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("robotling_sim=info")),
        )
        .init();

    let args = Args::parse();
    let period = tick_period(args.rate_hz)?;

    let mut opts = MqttOptions::new(format!("{}-sim", args.guid), &args.broker, args.port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("connected to broker"),
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let topic = format!("{}/raw", args.guid);
    info!(%topic, rate_hz = args.rate_hz, "publishing synthetic telemetry");

    let started = Instant::now();
    let mut ticker = interval(period);
    let mut n = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        let payload = snapshot(n, started.elapsed().as_secs() as i64, !args.no_compass).to_payload();
        client
            .publish(topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
            .context("Failed to queue telemetry")?;
        debug!(n, "snapshot published");

        n += 1;
        if args.count > 0 && n >= args.count {
            break;
        }
    }

    client.disconnect().await.ok();
    // let the event loop flush the last packets
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(published = n, "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_period() {
        assert_eq!(tick_period(2.0).unwrap(), Duration::from_millis(500));
        assert_eq!(tick_period(0.5).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_tick_period_rejects_unusable_rates() {
        for rate in [0.0, -1.0, f64::INFINITY, f64::NAN, 1e12, 1e-320] {
            assert!(tick_period(rate).is_err(), "rate {rate} accepted");
        }
    }

    #[test]
    fn test_snapshot_without_compass() {
        let doc = snapshot(3, 1, false).build();
        assert!(doc["sensor"].get("compass").is_none());
        assert_eq!(doc["timestamp_s"], 1);
    }
}
