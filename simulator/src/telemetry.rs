use rand::Rng;
use serde::{Deserialize, Serialize};

/// Body of `POST /report` as sent by a room controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_max: Option<f64>,
}

/// Thresholds pushed through `POST /settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub device_id: String,
    pub temp_min: f64,
    pub temp_max: f64,
}

/// What the actuator does for a given temperature.
pub fn thermostat_status(temperature: f64, temp_min: f64, temp_max: f64) -> &'static str {
    if temperature > temp_max {
        "cooling"
    } else if temperature < temp_min {
        "heating"
    } else {
        "off"
    }
}

/// A room that drifts a little every tick, with occasional excursions.
#[derive(Debug, Clone)]
pub struct SimulatedRoom {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
}

impl SimulatedRoom {
    pub fn new(device_id: String, rng: &mut impl Rng) -> Self {
        Self {
            device_id,
            temperature: rng.gen_range(21.0..27.0),
            humidity: rng.gen_range(35.0..60.0),
        }
    }

    pub fn step(&mut self, rng: &mut impl Rng, excursion_chance: f64) {
        if rng.gen_bool(excursion_chance) {
            self.temperature += rng.gen_range(-8.0..8.0); // door left open, sun on the window
        } else {
            self.temperature += rng.gen_range(-0.5..0.5);
        }
        self.temperature = self.temperature.clamp(5.0, 45.0);
        self.humidity = (self.humidity + rng.gen_range(-1.5..1.5)).clamp(10.0, 95.0);
    }

    pub fn report(&self, temp_min: f64, temp_max: f64, send_thresholds: bool) -> DeviceReport {
        let temperature = round1(self.temperature);
        DeviceReport {
            device_id: self.device_id.clone(),
            temperature,
            humidity: round1(self.humidity),
            status: thermostat_status(temperature, temp_min, temp_max).to_string(),
            temp_min: send_thresholds.then_some(temp_min),
            temp_max: send_thresholds.then_some(temp_max),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
