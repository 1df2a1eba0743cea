// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Sensor simulator for demo/testing

use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

use crate::model::{Sample, SensorKind, SensorSpec};

/// Every n-th read is reported with degraded quality
const DEGRADED_EVERY: u64 = 100;
const NOISE_STD_DEV: f64 = 2.0;

/// Produces one reading per configured sensor on every call
pub struct SensorSimulator {
    sensors: Vec<SensorSpec>,
    counter: u64,
    rng: StdRng,
}

impl SensorSimulator {
    pub fn new(sensors: Vec<SensorSpec>) -> Self {
        Self::with_rng(sensors, StdRng::from_entropy())
    }

    /// Deterministic noise for reproducible runs
    pub fn seeded(sensors: Vec<SensorSpec>, seed: u64) -> Self {
        Self::with_rng(sensors, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sensors: Vec<SensorSpec>, rng: StdRng) -> Self {
        Self {
            sensors,
            counter: 0,
            rng,
        }
    }

    pub fn sensors(&self) -> &[SensorSpec] {
        &self.sensors
    }

    pub fn reads(&self) -> u64 {
        self.counter
    }

    pub fn read_all(&mut self, timestamp: DateTime<Utc>) -> Vec<Sample> {
        self.counter += 1;
        let t = self.counter as f64;
        let quality = if self.counter % DEGRADED_EVERY == 0 { 0.7 } else { 0.95 };

        let mut samples = Vec::with_capacity(self.sensors.len());
        for sensor in &self.sensors {
            let raw = match sensor.kind {
                // oscillating drive signal
                SensorKind::Analog => 50.0 + 10.0 * (t * 0.1).sin(),
                // slow thermal drift
                SensorKind::Temperature => 25.0 + 5.0 * (t * 0.01).sin(),
                SensorKind::Accelerometer | SensorKind::Pressure => {
                    100.0 + NOISE_STD_DEV * self.rng.sample::<f64, _>(StandardNormal)
                }
            };

            samples.push(Sample {
                timestamp,
                sensor_id: sensor.sensor_id.clone(),
                sensor_name: sensor.name.clone(),
                value: sensor.clamp(raw),
                unit: sensor.unit.clone(),
                quality,
            });
        }

        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensors() -> Vec<SensorSpec> {
        vec![
            SensorSpec::new("rpm", "motor_speed", SensorKind::Analog, "RPM").with_limits(0.0, 3000.0),
            SensorSpec::new("temp", "temperature", SensorKind::Temperature, "C"),
            SensorSpec::new("vib", "vibration", SensorKind::Accelerometer, "g").with_limits(0.0, 50.0),
        ]
    }

    #[test]
    fn test_one_reading_per_sensor() {
        let mut sim = SensorSimulator::seeded(sensors(), 7);
        let now = Utc::now();
        let samples = sim.read_all(now);

        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.timestamp == now));
        assert_eq!(samples[0].sensor_name, "motor_speed");
        assert!((samples[0].value - (50.0 + 10.0 * 0.1f64.sin())).abs() < 1e-12);
        assert!((samples[1].value - (25.0 + 5.0 * 0.01f64.sin())).abs() < 1e-12);
    }

    #[test]
    fn test_values_clamped_to_limits() {
        let mut sim = SensorSimulator::seeded(sensors(), 7);
        for _ in 0..200 {
            let samples = sim.read_all(Utc::now());
            // vibration noise centers on 100 but the sensor tops out at 50
            assert_eq!(samples[2].value, 50.0);
        }
    }

    #[test]
    fn test_quality_degrades_periodically() {
        let mut sim = SensorSimulator::seeded(sensors(), 1);
        let qualities: Vec<f64> = (0..100).map(|_| sim.read_all(Utc::now())[0].quality).collect();

        assert_eq!(qualities[98], 0.95);
        assert_eq!(qualities[99], 0.7);
        assert_eq!(sim.reads(), 100);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let mut a = SensorSimulator::seeded(sensors(), 42);
        let mut b = SensorSimulator::seeded(sensors(), 42);
        let now = Utc::now();
        let unclamped = |sim: &mut SensorSimulator| {
            sim.sensors[2].max_value = None;
            sim.read_all(now)[2].value
        };
        assert_eq!(unclamped(&mut a), unclamped(&mut b));
    }
}
