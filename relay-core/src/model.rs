use chrono::{DateTime, NaiveDate, Utc};

/// Hourly variables requested from the archive, in the order the archive returns them.
pub const HOURLY_VARIABLES: [&str; 6] = [
    "temperature_2m",
    "relative_humidity_2m",
    "rain",
    "surface_pressure",
    "wind_speed_100m",
    "wind_direction_100m",
];

/// Parameters of one archive download. Bound once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub hourly: Vec<&'static str>,
    pub timezone: &'static str,
    pub format: &'static str,
}

impl ArchiveRequest {
    pub fn new(latitude: f64, longitude: f64, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            latitude,
            longitude,
            start_date,
            end_date,
            hourly: HOURLY_VARIABLES.to_vec(),
            timezone: "auto",
            format: "csv",
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("start_date", self.start_date.format("%Y-%m-%d").to_string()),
            ("end_date", self.end_date.format("%Y-%m-%d").to_string()),
            ("hourly", self.hourly.join(",")),
            ("timezone", self.timezone.to_string()),
            ("format", self.format.to_string()),
        ]
    }
}

/// One normalized row of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub time: DateTime<Utc>,
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
    /// mm
    pub water_amount: f64,
    /// hPa
    pub pressure: f64,
    /// km/h
    pub wind_speed: f64,
    /// degrees
    pub wind_direction: f64,
}

impl ObservationRecord {
    pub fn timestamp_ms(&self) -> i64 {
        self.time.timestamp_millis()
    }

    pub fn to_telemetry(&self) -> WeatherTelemetry {
        WeatherTelemetry {
            temperature: self.temperature,
            humidity: self.humidity,
            wind_speed: self.wind_speed,
            wind_direction: self.wind_direction,
            pressure: self.pressure,
            water_amount: self.water_amount,
            timestamp: self.timestamp_ms(),
        }
    }
}

/// Wire format of one published observation.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WeatherTelemetry {
    #[prost(double, tag = "1")]
    pub temperature: f64,
    #[prost(double, tag = "2")]
    pub humidity: f64,
    #[prost(double, tag = "3")]
    pub wind_speed: f64,
    #[prost(double, tag = "4")]
    pub wind_direction: f64,
    #[prost(double, tag = "5")]
    pub pressure: f64,
    #[prost(double, tag = "6")]
    pub water_amount: f64,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "7")]
    pub timestamp: i64,
}
