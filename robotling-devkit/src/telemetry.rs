/*!
Raw telemetry fixtures

Builds the nested document a robotling publishes on `<guid>/raw`, including the
list-literal strings for motor loads and distances and a few fields the relay
does not store.
*/

use serde_json::{json, Map, Value};

/// Render values the way the firmware does: `[10, 12]`
pub fn format_list<T: ToString>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

#[derive(Debug, Clone)]
pub struct TelemetryBuilder {
    motor_load: [i64; 2],
    battery_v: f64,
    compass: Option<[f64; 3]>,
    distance_cm: [i64; 3],
    state: String,
    timestamp_s: i64,
    extras: Vec<(String, Value)>,
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self {
            motor_load: [5, 7],
            battery_v: 7.4,
            compass: Some([1.5, 270.0, -2.5]),
            distance_cm: [10, 11, 12],
            state: "RUN".into(),
            timestamp_s: 100,
            extras: Vec::new(),
        }
    }
}

impl TelemetryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn motor_load(mut self, left: i64, right: i64) -> Self {
        self.motor_load = [left, right];
        self
    }

    pub fn battery_v(mut self, volts: f64) -> Self {
        self.battery_v = volts;
        self
    }

    /// pitch, heading, roll in degrees
    pub fn compass(mut self, pitch: f64, heading: f64, roll: f64) -> Self {
        self.compass = Some([pitch, heading, roll]);
        self
    }

    /// Drop the compass block, as a robot without the sensor board would
    pub fn without_compass(mut self) -> Self {
        self.compass = None;
        self
    }

    pub fn distance_cm(mut self, left: i64, center: i64, right: i64) -> Self {
        self.distance_cm = [left, center, right];
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn timestamp_s(mut self, ts: i64) -> Self {
        self.timestamp_s = ts;
        self
    }

    /// Extra field at a dotted path, e.g. `sensor.photodiode`
    pub fn with_field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.extras.push((path.into(), value));
        self
    }

    pub fn build(&self) -> Value {
        let mut sensor = Map::new();
        if let Some([pitch, heading, roll]) = self.compass {
            sensor.insert(
                "compass".into(),
                json!({"pitch_deg": pitch, "heading_deg": heading, "roll_deg": roll}),
            );
        }
        sensor.insert("distance_cm".into(), Value::String(format_list(&self.distance_cm)));

        let mut doc = json!({
            "power": {
                "motor_load": format_list(&self.motor_load),
                "battery_V": self.battery_v,
            },
            "sensor": Value::Object(sensor),
            "state": self.state,
            "timestamp_s": self.timestamp_s,
        });
        for (path, value) in &self.extras {
            insert_nested(&mut doc, path, value.clone());
        }
        doc
    }

    pub fn to_payload(&self) -> String {
        self.build().to_string()
    }
}

fn insert_nested(doc: &mut Value, path: &str, value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else { return };
    let mut current = doc;
    for part in parts {
        let Value::Object(obj) = current else { return };
        current = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Value::Object(obj) = current {
        obj.insert(last.to_string(), value);
    }
}
