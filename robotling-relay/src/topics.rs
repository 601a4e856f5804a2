//! Status topic whitelist and table schema
//!
//! The robot reports far more than the dashboard stores. Only the eight topics
//! of [`StatusTopic`] are kept, they expand into the eleven columns of [`SCHEMA`].

use crate::flatten::TopicPath;

/// Column names of the status table, in storage order
pub const SCHEMA: [&str; 11] = [
    "motor_load_1",
    "motor_load_2",
    "battery_V",
    "pitch_deg",
    "heading_deg",
    "roll_deg",
    "distance_cm_1",
    "distance_cm_2",
    "distance_cm_3",
    "state",
    "timestamp_s",
];

pub const ROW_WIDTH: usize = SCHEMA.len();

/// Whitelisted telemetry topics, relative to the robot's root topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTopic {
    MotorLoad,
    BatteryVoltage,
    Pitch,
    Heading,
    Roll,
    Distance,
    State,
    Timestamp,
}

impl StatusTopic {
    /// Declaration order matches [`SCHEMA`]
    pub const ALL: [StatusTopic; 8] = [
        StatusTopic::MotorLoad,
        StatusTopic::BatteryVoltage,
        StatusTopic::Pitch,
        StatusTopic::Heading,
        StatusTopic::Roll,
        StatusTopic::Distance,
        StatusTopic::State,
        StatusTopic::Timestamp,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            StatusTopic::MotorLoad => "power/motor_load",
            StatusTopic::BatteryVoltage => "power/battery_V",
            StatusTopic::Pitch => "sensor/compass/pitch_deg",
            StatusTopic::Heading => "sensor/compass/heading_deg",
            StatusTopic::Roll => "sensor/compass/roll_deg",
            StatusTopic::Distance => "sensor/distance_cm",
            StatusTopic::State => "state",
            StatusTopic::Timestamp => "timestamp_s",
        }
    }

    /// Number of columns this topic fills
    pub fn width(self) -> usize {
        match self {
            StatusTopic::MotorLoad => 2,
            StatusTopic::Distance => 3,
            _ => 1,
        }
    }

    /// Topics whose value is a compact list of scalars
    pub fn is_list(self) -> bool {
        self.width() > 1
    }

    /// Index of the first column this topic fills
    pub fn first_column(self) -> usize {
        StatusTopic::ALL
            .iter()
            .take_while(|t| **t != self)
            .map(|t| t.width())
            .sum()
    }

    pub fn columns(self) -> &'static [&'static str] {
        let first = self.first_column();
        &SCHEMA[first..first + self.width()]
    }
}

/// Maps flattened key paths to fully-qualified topics and filters them
#[derive(Debug, Clone)]
pub struct TopicResolver {
    root: String,
    whitelist: Vec<(String, StatusTopic)>,
}

impl TopicResolver {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let whitelist = StatusTopic::ALL
            .iter()
            .map(|t| (format!("{}/{}", root, t.suffix()), *t))
            .collect();
        Self { root, whitelist }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Topic the robot publishes raw snapshots on
    pub fn raw_topic(&self) -> String {
        format!("{}/raw", self.root)
    }

    /// `root/seg0/seg1/...`
    pub fn resolve(&self, path: &TopicPath<'_>) -> String {
        format!("{}/{}", self.root, path.joined())
    }

    pub fn accept(&self, topic: &str) -> bool {
        self.lookup(topic).is_some()
    }

    pub fn lookup(&self, topic: &str) -> Option<StatusTopic> {
        self.whitelist
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, t)| *t)
    }

    /// Fully-qualified whitelist, in schema order
    pub fn whitelist(&self) -> impl Iterator<Item = &str> {
        self.whitelist.iter().map(|(name, _)| name.as_str())
    }
}
