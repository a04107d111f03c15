use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Metrics reported by a water-treatment unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Product water flow (L/min)
    FlujoProduccion,
    /// Reject water flow (L/min)
    FlujoRechazo,
    /// Total dissolved solids (ppm)
    Tds,
    /// Purified water tank level (%)
    ElectronivelPurificada,
    /// Recovered water tank level (%)
    ElectronivelRecuperada,
    /// Inlet pressure (PSI)
    PresionIn,
    /// Outlet pressure (PSI)
    PresionOut,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::FlujoProduccion,
        Metric::FlujoRechazo,
        Metric::Tds,
        Metric::ElectronivelPurificada,
        Metric::ElectronivelRecuperada,
        Metric::PresionIn,
        Metric::PresionOut,
    ];

    /// Field name used in the JSON payload
    pub fn name(&self) -> &'static str {
        match self {
            Metric::FlujoProduccion => "flujo_produccion",
            Metric::FlujoRechazo => "flujo_rechazo",
            Metric::Tds => "tds",
            Metric::ElectronivelPurificada => "electronivel_purificada",
            Metric::ElectronivelRecuperada => "electronivel_recuperada",
            Metric::PresionIn => "presion_in",
            Metric::PresionOut => "presion_out",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::FlujoProduccion | Metric::FlujoRechazo => "L/min",
            Metric::Tds => "ppm",
            Metric::ElectronivelPurificada | Metric::ElectronivelRecuperada => "%",
            Metric::PresionIn | Metric::PresionOut => "PSI",
        }
    }

    /// Bounds used by the simulator
    pub fn simulated_range(&self) -> Range<f64> {
        match self {
            Metric::FlujoProduccion => 10.0..20.0,
            Metric::FlujoRechazo => 5.0..15.0,
            Metric::Tds => 30.0..80.0,
            Metric::ElectronivelPurificada => 70.0..100.0,
            Metric::ElectronivelRecuperada => 60.0..90.0,
            Metric::PresionIn => 40.0..60.0,
            Metric::PresionOut => 50.0..70.0,
        }
    }
}

/// One snapshot of a unit's metrics.
///
/// Serializes as a flat JSON object keyed by metric name, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SensorReading(BTreeMap<Metric, f64>);

impl SensorReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        self.0.insert(metric, value);
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every known metric has a value
    pub fn is_complete(&self) -> bool {
        Metric::ALL.iter().all(|m| self.0.contains_key(m))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }
}

impl fmt::Display for SensorReading {
    /// `tds=45.5ppm presion_in=50.2PSI ...`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (metric, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}{}", metric.name(), value, metric.unit())?;
        }
        Ok(())
    }
}

/// Source of sensor readings for a device.
///
/// Reads are synchronous and cannot fail; a hardware-backed source has to
/// keep that contract or report problems through the values it returns.
pub trait SensorSource {
    fn read(&mut self, device: &str) -> SensorReading;
}

impl<F> SensorSource for F
where
    F: FnMut(&str) -> SensorReading,
{
    fn read(&mut self, device: &str) -> SensorReading {
        self(device)
    }
}

/// Random readings inside each metric's simulated range, rounded to 0.1
#[derive(Debug)]
pub struct SimulatedSensors {
    rng: StdRng,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence of readings
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSensors {
    fn read(&mut self, _device: &str) -> SensorReading {
        let mut reading = SensorReading::new();
        for metric in Metric::ALL {
            let raw = self.rng.gen_range(metric.simulated_range());
            reading.set(metric, round_tenth(raw));
        }
        reading
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_reading_is_complete_and_in_range() {
        let mut sensors = SimulatedSensors::seeded(7);
        for _ in 0..200 {
            let reading = sensors.read("equipo_001");
            assert!(reading.is_complete());
            assert_eq!(reading.len(), 7);
            for (metric, value) in reading.iter() {
                let range = metric.simulated_range();
                // Rounding may land exactly on the upper bound
                assert!(
                    value >= range.start && value <= range.end,
                    "{} = {} outside {:?}",
                    metric.name(),
                    value,
                    range
                );
                assert_eq!(round_tenth(value), value);
            }
        }
    }

    #[test]
    fn test_seeded_sensors_are_reproducible() {
        let mut a = SimulatedSensors::seeded(42);
        let mut b = SimulatedSensors::seeded(42);
        assert_eq!(a.read("x"), b.read("x"));
        assert_eq!(a.read("y"), b.read("y"));
    }

    #[test]
    fn test_metric_names_match_serde() {
        for metric in Metric::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.name()));
        }
    }

    #[test]
    fn test_reading_serializes_as_flat_object() {
        let reading = SensorReading::new()
            .with(Metric::Tds, 45.5)
            .with(Metric::FlujoProduccion, 12.3);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["tds"], 45.5);
        assert_eq!(json["flujo_produccion"], 12.3);
        assert!(!reading.is_complete());
    }

    #[test]
    fn test_closure_as_sensor_source() {
        let mut calls = Vec::new();
        let mut source = |device: &str| {
            calls.push(device.to_string());
            SensorReading::new().with(Metric::PresionIn, 50.0)
        };
        let reading = source.read("equipo_009");
        assert_eq!(reading.get(Metric::PresionIn), Some(50.0));
        assert_eq!(calls, vec!["equipo_009".to_string()]);
    }

    #[test]
    fn test_reading_display_includes_units() {
        let reading = SensorReading::new()
            .with(Metric::PresionIn, 50.2)
            .with(Metric::Tds, 45.5);
        assert_eq!(reading.to_string(), "tds=45.5ppm presion_in=50.2PSI");
        assert_eq!(SensorReading::new().to_string(), "");
    }

    #[test]
    fn test_units() {
        assert_eq!(Metric::Tds.unit(), "ppm");
        assert_eq!(Metric::PresionOut.unit(), "PSI");
        assert_eq!(Metric::FlujoRechazo.unit(), "L/min");
    }
}
