//! Measure kinds and observation rows.
//!
//! Observations are immutable facts: the store assigns a strictly increasing
//! `id` on insert and rows are only ever created or deleted, never updated.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two measurement families collected by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureType {
    Cell,
    Wifi,
}

impl MeasureType {
    /// All kinds in a stable order.
    pub const ALL: [MeasureType; 2] = [MeasureType::Cell, MeasureType::Wifi];

    /// Integer value persisted in the ledger's `measure_type` column.
    pub fn code(self) -> i64 {
        match self {
            MeasureType::Cell => 1,
            MeasureType::Wifi => 2,
        }
    }

    /// Inverse of [`MeasureType::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MeasureType::Cell),
            2 => Some(MeasureType::Wifi),
            _ => None,
        }
    }

    /// Marker embedded in archive keys so archives can be classified by kind.
    pub fn marker(self) -> &'static str {
        match self {
            MeasureType::Cell => "cell",
            MeasureType::Wifi => "wifi",
        }
    }

    /// Source table holding observations of this kind.
    pub fn table(self) -> &'static str {
        match self {
            MeasureType::Cell => "cell_measure",
            MeasureType::Wifi => "wifi_measure",
        }
    }

    /// Name of the tabular data file inside an archive.
    pub fn data_file_name(self) -> String {
        format!("{}.csv", self.table())
    }

    /// Exported column header for this kind.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            MeasureType::Cell => CellObservation::COLUMNS,
            MeasureType::Wifi => WifiObservation::COLUMNS,
        }
    }
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

impl FromStr for MeasureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cell" | "cell_measure" => Ok(MeasureType::Cell),
            "wifi" | "wifi_measure" => Ok(MeasureType::Wifi),
            _ => Err(format!("unknown measure type: {}", s)),
        }
    }
}

/// Format a timestamp the way archives store it (RFC 3339, microseconds, `Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Position fields shared by both observation kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub time: Option<DateTime<Utc>>,
    pub accuracy: Option<i64>,
    pub altitude: Option<i64>,
    pub altitude_accuracy: Option<i64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

impl Position {
    fn push_fields(&self, out: &mut Vec<String>) {
        out.push(opt(self.lat));
        out.push(opt(self.lon));
        out.push(self.time.as_ref().map(format_timestamp).unwrap_or_default());
        out.push(opt(self.accuracy));
        out.push(opt(self.altitude));
        out.push(opt(self.altitude_accuracy));
        out.push(opt(self.heading));
        out.push(opt(self.speed));
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// A single cell tower observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellObservation {
    /// Store-assigned identifier. `None` until inserted.
    pub id: Option<i64>,
    pub report_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub position: Position,
    pub radio: Option<i64>,
    pub mcc: Option<i64>,
    pub mnc: Option<i64>,
    pub lac: Option<i64>,
    pub cid: Option<i64>,
    pub psc: Option<i64>,
    pub asu: Option<i64>,
    pub signal: Option<i64>,
    pub ta: Option<i64>,
}

impl CellObservation {
    pub const COLUMNS: &'static [&'static str] = &[
        "id",
        "report_id",
        "created",
        "lat",
        "lon",
        "time",
        "accuracy",
        "altitude",
        "altitude_accuracy",
        "heading",
        "speed",
        "radio",
        "mcc",
        "mnc",
        "lac",
        "cid",
        "psc",
        "asu",
        "signal",
        "ta",
    ];

    /// A bare observation created at `created`, every optional field empty.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            id: None,
            report_id: None,
            created,
            position: Position::default(),
            radio: None,
            mcc: None,
            mnc: None,
            lac: None,
            cid: None,
            psc: None,
            asu: None,
            signal: None,
            ta: None,
        }
    }

    /// Exported field values in `COLUMNS` order.
    pub fn to_record(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(Self::COLUMNS.len());
        out.push(opt(self.id));
        out.push(self.report_id.clone().unwrap_or_default());
        out.push(format_timestamp(&self.created));
        self.position.push_fields(&mut out);
        for v in [
            self.radio, self.mcc, self.mnc, self.lac, self.cid, self.psc, self.asu, self.signal,
            self.ta,
        ] {
            out.push(opt(v));
        }
        out
    }
}

/// A single WiFi access point observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiObservation {
    /// Store-assigned identifier. `None` until inserted.
    pub id: Option<i64>,
    pub report_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub position: Position,
    /// Normalized BSSID.
    pub key: Option<String>,
    pub channel: Option<i64>,
    pub signal: Option<i64>,
    pub snr: Option<i64>,
}

impl WifiObservation {
    pub const COLUMNS: &'static [&'static str] = &[
        "id",
        "report_id",
        "created",
        "lat",
        "lon",
        "time",
        "accuracy",
        "altitude",
        "altitude_accuracy",
        "heading",
        "speed",
        "key",
        "channel",
        "signal",
        "snr",
    ];

    /// A bare observation created at `created`, every optional field empty.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            id: None,
            report_id: None,
            created,
            position: Position::default(),
            key: None,
            channel: None,
            signal: None,
            snr: None,
        }
    }

    /// Exported field values in `COLUMNS` order.
    pub fn to_record(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(Self::COLUMNS.len());
        out.push(opt(self.id));
        out.push(self.report_id.clone().unwrap_or_default());
        out.push(format_timestamp(&self.created));
        self.position.push_fields(&mut out);
        out.push(self.key.clone().unwrap_or_default());
        out.push(opt(self.channel));
        out.push(opt(self.signal));
        out.push(opt(self.snr));
        out
    }
}

/// An observation of either kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "measure_type", rename_all = "lowercase")]
pub enum Observation {
    Cell(CellObservation),
    Wifi(WifiObservation),
}

impl Observation {
    pub fn measure_type(&self) -> MeasureType {
        match self {
            Observation::Cell(_) => MeasureType::Cell,
            Observation::Wifi(_) => MeasureType::Wifi,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Observation::Cell(o) => o.id,
            Observation::Wifi(o) => o.id,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        match self {
            Observation::Cell(o) => o.created,
            Observation::Wifi(o) => o.created,
        }
    }

    /// Exported field values in the kind's column order.
    pub fn to_record(&self) -> Vec<String> {
        match self {
            Observation::Cell(o) => o.to_record(),
            Observation::Wifi(o) => o.to_record(),
        }
    }
}

impl From<CellObservation> for Observation {
    fn from(obs: CellObservation) -> Self {
        Observation::Cell(obs)
    }
}

impl From<WifiObservation> for Observation {
    fn from(obs: WifiObservation) -> Self {
        Observation::Wifi(obs)
    }
}
