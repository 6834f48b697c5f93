mod sim;

use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{MoistureSim, Scenario};

#[derive(Debug, Serialize)]
struct ReadingMsg {
    humidity: i64,
    relay_state: bool,
}

/// The slice of the hub's /status response the node cares about.
#[derive(Debug, Deserialize)]
struct StatusMsg {
    relay_state: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let hub_url = env::var("HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    let relay_sync_every_s: u64 = env::var("RELAY_SYNC_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    info!(%hub_url, sample_every_s, relay_sync_every_s, %scenario, "node started");

    let client = reqwest::Client::new();
    let mut moisture = MoistureSim::new(scenario);

    // Local mirror of the hub's relay state, synced periodically — the node
    // itself never decides to water.
    let mut relay_state = false;

    let mut sample_tick = tokio::time::interval(Duration::from_secs(sample_every_s));
    let mut sync_tick = tokio::time::interval(Duration::from_secs(relay_sync_every_s));

    loop {
        tokio::select! {
            _ = sample_tick.tick() => {
                moisture.set_watering(relay_state);
                let humidity = moisture.sample();
                let msg = ReadingMsg { humidity, relay_state };

                match client
                    .post(format!("{hub_url}/sensor-data"))
                    .json(&msg)
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => {
                        info!(humidity, relay_state, "reading sent");
                    }
                    Ok(resp) => {
                        warn!(status = %resp.status(), "hub rejected reading");
                    }
                    Err(e) => {
                        warn!("failed to send reading: {e}");
                    }
                }
            }
            _ = sync_tick.tick() => {
                match client.get(format!("{hub_url}/status")).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<StatusMsg>().await {
                            Ok(status) => {
                                if status.relay_state != relay_state {
                                    info!(from = relay_state, to = status.relay_state, "relay state synced");
                                }
                                relay_state = status.relay_state;
                            }
                            Err(e) => warn!("bad status response: {e}"),
                        }
                    }
                    Ok(resp) => {
                        warn!(status = %resp.status(), "status request failed");
                    }
                    Err(e) => {
                        warn!("failed to fetch status: {e}");
                    }
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_msg_serializes_with_correct_fields() {
        let msg = ReadingMsg {
            humidity: 42,
            relay_state: true,
        };
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["humidity"], 42);
        assert_eq!(json["relay_state"], true);
        // Exactly these two fields, no extras.
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn status_msg_ignores_extra_fields() {
        let json = r#"{"relay_state":true,"humidity":55,"today":{"toggle_count":1}}"#;
        let status: StatusMsg = serde_json::from_str(json).unwrap();
        assert!(status.relay_state);
    }

    #[test]
    fn status_msg_missing_field_fails() {
        assert!(serde_json::from_str::<StatusMsg>(r#"{"humidity":55}"#).is_err());
    }
}
