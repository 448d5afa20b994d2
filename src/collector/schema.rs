//! Column naming for the BME688 sensor array.
//!
//! Every sensor contributes the same six columns; the streaming firmware emits
//! them in a fixed order after four metadata fields.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const COL_REAL_TIME: &str = "Real_Time";
pub const COL_TIMESTAMP_MS: &str = "Timestamp_ms";
pub const COL_LABEL: &str = "Label_Tag";
pub const COL_PROFILE: &str = "HeaterProfile_ID";

/// Metadata columns, in streaming order.
pub const METADATA_COLUMNS: [&str; 4] = [COL_REAL_TIME, COL_TIMESTAMP_MS, COL_LABEL, COL_PROFILE];

/// Default number of sensors on the board.
pub const DEFAULT_SENSOR_COUNT: u8 = 8;

/// A numeric measurement channel of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Measurement {
    GasResistance,
    Temperature,
    Pressure,
    Humidity,
    GasIndex,
}

impl Measurement {
    /// The four measurements every sensor must report.
    pub const MANDATORY: [Measurement; 4] = [
        Measurement::GasResistance,
        Measurement::Temperature,
        Measurement::Pressure,
        Measurement::Humidity,
    ];

    pub const ALL: [Measurement; 5] = [
        Measurement::GasResistance,
        Measurement::Temperature,
        Measurement::Pressure,
        Measurement::Humidity,
        Measurement::GasIndex,
    ];

    /// Name used in feature names (`Temperature_Mean_Sensor1`).
    pub fn name(self) -> &'static str {
        match self {
            Measurement::GasResistance => "GasResistance",
            Measurement::Temperature => "Temperature",
            Measurement::Pressure => "Pressure",
            Measurement::Humidity => "Humidity",
            Measurement::GasIndex => "GasIndex",
        }
    }

    /// Column suffix in the data (`Sensor1_Temperature_deg_C`).
    pub fn column_suffix(self) -> &'static str {
        match self {
            Measurement::GasResistance => "GasResistance_ohm",
            Measurement::Temperature => "Temperature_deg_C",
            Measurement::Pressure => "Pressure_Pa",
            Measurement::Humidity => "Humidity_%",
            Measurement::GasIndex => "GasIndex",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Column name of this measurement for a 1-based sensor index.
    pub fn column(self, sensor: u8) -> String {
        format!("Sensor{sensor}_{}", self.column_suffix())
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column name of a sensor's status field.
pub fn status_column(sensor: u8) -> String {
    format!("Sensor{sensor}_Status")
}

/// Kind of value a column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Timestamp,
    DeviceMillis,
    Label,
    Profile,
    Numeric,
    Status,
}

/// The column layout for a board with `sensor_count` sensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSchema {
    sensor_count: u8,
    columns: Vec<(String, ColumnKind)>,
}

impl ChannelSchema {
    pub fn new(sensor_count: u8) -> Self {
        let mut columns: Vec<(String, ColumnKind)> = vec![
            (COL_REAL_TIME.to_string(), ColumnKind::Timestamp),
            (COL_TIMESTAMP_MS.to_string(), ColumnKind::DeviceMillis),
            (COL_LABEL.to_string(), ColumnKind::Label),
            (COL_PROFILE.to_string(), ColumnKind::Profile),
        ];

        // Firmware order per sensor: temperature, pressure, humidity, gas, status, index
        for sensor in 1..=sensor_count {
            columns.push((Measurement::Temperature.column(sensor), ColumnKind::Numeric));
            columns.push((Measurement::Pressure.column(sensor), ColumnKind::Numeric));
            columns.push((Measurement::Humidity.column(sensor), ColumnKind::Numeric));
            columns.push((Measurement::GasResistance.column(sensor), ColumnKind::Numeric));
            columns.push((status_column(sensor), ColumnKind::Status));
            columns.push((Measurement::GasIndex.column(sensor), ColumnKind::Numeric));
        }

        Self {
            sensor_count,
            columns,
        }
    }

    pub fn sensor_count(&self) -> u8 {
        self.sensor_count
    }

    /// All columns in streaming order.
    pub fn columns(&self) -> &[(String, ColumnKind)] {
        &self.columns
    }

    /// Number of fields in a complete streaming record.
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    /// Kind of a named column, if it belongs to the schema.
    pub fn kind_of(&self, column: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, kind)| *kind)
    }

    /// Channel columns that must be present: status plus the four mandatory measurements.
    pub fn required_channels(&self) -> Vec<String> {
        let mut required = Vec::with_capacity(self.sensor_count as usize * 5);
        for sensor in 1..=self.sensor_count {
            for measurement in [
                Measurement::Temperature,
                Measurement::Pressure,
                Measurement::Humidity,
                Measurement::GasResistance,
            ] {
                required.push(measurement.column(sensor));
            }
            required.push(status_column(sensor));
        }
        required
    }

    /// Metadata plus channel columns that a tabular source must carry.
    pub fn required_columns(&self) -> Vec<String> {
        let mut required = vec![
            COL_REAL_TIME.to_string(),
            COL_LABEL.to_string(),
            COL_PROFILE.to_string(),
        ];
        required.extend(self.required_channels());
        required
    }

    /// Required columns absent from `present`, in schema order.
    pub fn missing_columns<'a, I>(&self, present: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: HashSet<&str> = present.into_iter().collect();
        self.required_columns()
            .into_iter()
            .filter(|col| !present.contains(col.as_str()))
            .collect()
    }
}

impl Default for ChannelSchema {
    fn default() -> Self {
        Self::new(DEFAULT_SENSOR_COUNT)
    }
}
