//! Synthetic probe results for one monitor.

use serde_json::json;

const STATUSES: [&str; 6] = ["success", "success", "failed", "success", "timeout", "running"];

/// Every n-th tick is also published as a `result` event.
pub const RESULT_EVERY: u64 = 5;

/// One server-sent event before framing.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub event: &'static str,
    pub data: String,
}

/// Feed settings shared by all streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedSettings {
    /// Replace every n-th payload with broken JSON, 0 disables.
    pub malformed_every: u64,
    /// Close the stream after n ticks, 0 keeps it open.
    pub drop_after: u64,
}

impl FeedSettings {
    pub fn should_drop(&self, tick: u64) -> bool {
        self.drop_after > 0 && tick > self.drop_after
    }
}

/// Events to publish on `tick` (1-based) of the stream for `monitor`.
pub fn items_for_tick(monitor: &str, tick: u64, settings: &FeedSettings, timestamp: &str) -> Vec<FeedItem> {
    if settings.malformed_every > 0 && tick % settings.malformed_every == 0 {
        return vec![FeedItem {
            event: "status",
            data: format!("{{\"monitor_id\": {}, \"status\":", json!(monitor_value(monitor))),
        }];
    }

    let status = STATUSES[(tick as usize) % STATUSES.len()];
    let mut payload = json!({
        "monitor_id": monitor_value(monitor),
        "status": status,
        "response_time": 80 + (tick * 37) % 200,
        "status_code": if status == "success" { 200 } else { 503 },
        "timestamp": timestamp,
    });
    if status == "failed" || status == "timeout" {
        payload["error_message"] = json!(format!("probe {} on tick {}", status, tick));
    }

    let mut items = vec![FeedItem {
        event: "status",
        data: payload.to_string(),
    }];
    if tick % RESULT_EVERY == 0 {
        payload["result"] = json!({ "tick": tick, "checks": ["dns", "tcp", "http"] });
        items.push(FeedItem {
            event: "result",
            data: payload.to_string(),
        });
    }
    items
}

fn monitor_value(monitor: &str) -> serde_json::Value {
    match monitor.parse::<i64>() {
        Ok(id) => json!(id),
        Err(_) => json!(monitor),
    }
}
