//! The on-disk CSV artifact shared by the two stages.
//!
//! Acquisition leaves the archive's raw CSV here and [`normalize`] rewrites it in
//! place. Publication then loads it with [`Dataset::load`] and maps rows to
//! [`ObservationRecord`]s.

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::StringRecord;
use log::{debug, info};

use crate::{
    error::{DatasetError, PublishError},
    model::ObservationRecord,
};

/// Metadata lines (coordinates, elevation, timezone, blank separator) that the
/// Open-Meteo archive writes ahead of the real CSV header. Fixed by the provider.
pub const PREAMBLE_LINES: usize = 3;

/// Provider column names (units in parentheses) mapped to internal names.
/// Fixed by the provider's CSV export.
pub const COLUMN_RENAMES: [(&str, &str); 6] = [
    ("temperature_2m (°C)", TEMPERATURE),
    ("relative_humidity_2m (%)", HUMIDITY),
    ("rain (mm)", WATER_AMOUNT),
    ("surface_pressure (hPa)", PRESSURE),
    ("wind_speed_100m (km/h)", WIND_SPEED),
    ("wind_direction_100m (°)", WIND_DIRECTION),
];

pub const TIME: &str = "time";
pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";
pub const WATER_AMOUNT: &str = "water_amount";
pub const PRESSURE: &str = "pressure";
pub const WIND_SPEED: &str = "wind_speed";
pub const WIND_DIRECTION: &str = "wind_direction";

const TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Map a provider column name to its internal name. Unknown columns pass through.
pub fn rename_column(name: &str) -> &str {
    COLUMN_RENAMES
        .iter()
        .find(|(source, _)| *source == name)
        .map(|(_, internal)| *internal)
        .unwrap_or(name)
}

/// Strip the provider preamble and rename the measurement columns, rewriting
/// `path` in place. Returns the number of data rows.
///
/// A file that already starts with the `time` header is taken as normalized, so
/// running this twice leaves the file unchanged.
pub fn normalize(path: &Path) -> Result<usize, DatasetError> {
    info!("Starting pre-processing on {}...", path.display());

    let raw = read_artifact(path)?;
    let body = strip_preamble(path, &raw)?;
    if body.trim().is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }

    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| DatasetError::malformed(path, e))?
        .clone();

    if headers.get(0) != Some(TIME) {
        return Err(DatasetError::malformed(
            path,
            format!(
                "unexpected column layout, expected '{TIME}' as first column but found {:?}",
                headers.get(0).unwrap_or_default()
            ),
        ));
    }

    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DatasetError::malformed(path, e))?;
    if rows.is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }
    debug!("Loaded {} rows with columns {:?}", rows.len(), headers);

    let renamed: StringRecord = headers.iter().map(rename_column).collect();
    write_atomically(path, &renamed, &rows)?;
    info!("Processed data saved to {}", path.display());

    Ok(rows.len())
}

fn read_artifact(path: &Path) -> Result<String, DatasetError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => DatasetError::MissingFile(path.to_path_buf()),
        io::ErrorKind::InvalidData => DatasetError::malformed(path, "file is not valid UTF-8"),
        _ => DatasetError::io(path, e),
    })
}

fn strip_preamble<'a>(path: &Path, raw: &'a str) -> Result<&'a str, DatasetError> {
    if raw.trim().is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }

    let first_line = raw.lines().next().unwrap_or_default();
    if first_line.split(',').next() == Some(TIME) {
        return Ok(raw);
    }

    let mut parts = raw.splitn(PREAMBLE_LINES + 1, '\n');
    let preamble = parts.by_ref().take(PREAMBLE_LINES).count();
    match parts.next() {
        Some(body) if preamble == PREAMBLE_LINES => Ok(body),
        _ => Err(DatasetError::malformed(
            path,
            format!("expected {PREAMBLE_LINES} preamble lines before the header"),
        )),
    }
}

fn write_atomically(
    path: &Path,
    headers: &StringRecord,
    rows: &[StringRecord],
) -> Result<(), DatasetError> {
    let tmp = sibling_tmp_path(path);
    let io_err = |e: csv::Error| DatasetError::io(&tmp, io::Error::from(e));

    let mut writer = csv::Writer::from_path(&tmp).map_err(io_err)?;
    writer.write_record(headers).map_err(io_err)?;
    for row in rows {
        writer.write_record(row).map_err(io_err)?;
    }
    writer.flush().map_err(|e| DatasetError::io(&tmp, e))?;
    drop(writer);

    fs::rename(&tmp, path).map_err(|e| DatasetError::io(path, e))
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// A normalized artifact loaded into memory, rows kept in file order.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Dataset {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let raw = read_artifact(path)?;
        if raw.trim().is_empty() {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }

        let mut reader = csv::Reader::from_reader(raw.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| DatasetError::malformed(path, e))?
            .clone();
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatasetError::malformed(path, e))?;

        if rows.is_empty() {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }

        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows mapped to records, in file order.
    pub fn records(&self) -> impl Iterator<Item = Result<ObservationRecord, PublishError>> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| self.record(i + 1, row))
    }

    fn record(&self, row_no: usize, row: &StringRecord) -> Result<ObservationRecord, PublishError> {
        let time = self.field(row_no, row, TIME)?;
        let temperature = self.field(row_no, row, TEMPERATURE)?;
        let humidity = self.field(row_no, row, HUMIDITY)?;
        let water_amount = self.field(row_no, row, WATER_AMOUNT)?;
        let pressure = self.field(row_no, row, PRESSURE)?;
        let wind_speed = self.field(row_no, row, WIND_SPEED)?;
        let wind_direction = self.field(row_no, row, WIND_DIRECTION)?;

        Ok(ObservationRecord {
            time: parse_time(time).ok_or_else(|| PublishError::InvalidTimestamp {
                row: row_no,
                value: time.to_string(),
            })?,
            temperature: parse_measurement(row_no, TEMPERATURE, temperature)?,
            humidity: parse_measurement(row_no, HUMIDITY, humidity)?,
            water_amount: parse_measurement(row_no, WATER_AMOUNT, water_amount)?,
            pressure: parse_measurement(row_no, PRESSURE, pressure)?,
            wind_speed: parse_measurement(row_no, WIND_SPEED, wind_speed)?,
            wind_direction: parse_measurement(row_no, WIND_DIRECTION, wind_direction)?,
        })
    }

    fn field<'r>(
        &self,
        row_no: usize,
        row: &'r StringRecord,
        name: &'static str,
    ) -> Result<&'r str, PublishError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| row.get(idx))
            .ok_or(PublishError::MissingField {
                row: row_no,
                field: name,
            })
    }
}

/// Empty cells are gaps in the archive and become NaN.
fn parse_measurement(row: usize, field: &'static str, value: &str) -> Result<f64, PublishError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(f64::NAN);
    }
    value.parse().map_err(|_| PublishError::InvalidValue {
        row,
        field,
        value: value.to_string(),
    })
}

/// Parse an archive time value. Times without an offset are read as UTC.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "latitude,longitude,elevation,utc_offset_seconds,timezone,timezone_abbreviation\n\
12.9,79.1,216.0,19800,Asia/Kolkata,IST\n\
\n\
time,temperature_2m (°C),relative_humidity_2m (%),rain (mm),surface_pressure (hPa),wind_speed_100m (km/h),wind_direction_100m (°)\n\
2024-01-01T00:00,22.4,88,0.00,985.3,12.6,54\n\
2024-01-01T01:00,22.0,90,0.10,985.1,11.9,51\n";

    const NORMALIZED_HEADER: &str =
        "time,temperature,humidity,water_amount,pressure,wind_speed,wind_direction";

    fn write(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("data.csv");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn normalize_strips_preamble_and_renames_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, RAW);

        let rows = normalize(&path).unwrap();
        assert_eq!(rows, 2);

        let out = fs::read_to_string(&path).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(NORMALIZED_HEADER));
        assert_eq!(lines.next(), Some("2024-01-01T00:00,22.4,88,0.00,985.3,12.6,54"));
        assert_eq!(lines.count(), 1);
        assert!(!sibling_tmp_path(&path).exists());
    }

    #[test]
    fn normalize_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, RAW);

        normalize(&path).unwrap();
        let first = fs::read_to_string(&path).unwrap();
        normalize(&path).unwrap();
        let second = fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn unmapped_columns_pass_through() {
        assert_eq!(rename_column("rain (mm)"), "water_amount");
        assert_eq!(rename_column("snowfall (cm)"), "snowfall (cm)");
        assert_eq!(rename_column("time"), "time");
    }

    #[test]
    fn normalize_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, DatasetError::MissingFile(_)));
    }

    #[test]
    fn normalize_rejects_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let header_only = RAW.lines().take(4).collect::<Vec<_>>().join("\n") + "\n";
        let path = write(&dir, &header_only);

        let err = normalize(&path).unwrap_err();
        assert!(matches!(err, DatasetError::Empty(_)));
    }

    #[test]
    fn normalize_rejects_zero_byte_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "");
        assert!(matches!(normalize(&path).unwrap_err(), DatasetError::Empty(_)));
    }

    #[test]
    fn normalize_rejects_short_preamble() {
        let dir = tempfile::tempdir().unwrap();
        // Blank separator line missing, so the header is eaten as preamble.
        let broken = RAW.replacen("IST\n\n", "IST\n", 1);
        let path = write(&dir, &broken);

        let err = normalize(&path).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { .. }));
    }

    #[test]
    fn normalize_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &format!("{RAW}2024-01-01T02:00,21.8\n"));

        let err = normalize(&path).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { .. }));
    }

    #[test]
    fn load_maps_rows_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, RAW);
        normalize(&path).unwrap();

        let dataset = Dataset::load(&path).unwrap();
        assert_eq!(dataset.len(), 2);

        let records: Vec<_> = dataset.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records[0].temperature, 22.4);
        assert_eq!(records[1].water_amount, 0.1);
        assert!(records[0].time < records[1].time);
        assert_eq!(records[1].timestamp_ms(), 1_704_070_800_000);
    }

    #[test]
    fn load_rejects_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &format!("{NORMALIZED_HEADER}\n"));

        let err = Dataset::load(&path).unwrap_err();
        assert!(matches!(err, DatasetError::Empty(_)));
    }

    #[test]
    fn missing_column_fails_on_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "time,temperature,humidity,water_amount,wind_speed,wind_direction\n\
             2024-01-01T00:00,22.4,88,0.0,12.6,54\n",
        );

        let dataset = Dataset::load(&path).unwrap();
        let err = dataset.records().next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            PublishError::MissingField { row: 1, field: PRESSURE }
        ));
    }

    #[test]
    fn empty_cells_become_nan_and_garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            &format!(
                "{NORMALIZED_HEADER}\n2024-01-01T00:00,,88,0.0,985.3,12.6,54\n2024-01-01T01:00,warm,88,0.0,985.3,12.6,54\n"
            ),
        );

        let dataset = Dataset::load(&path).unwrap();
        let mut records = dataset.records();
        assert!(records.next().unwrap().unwrap().temperature.is_nan());
        assert!(matches!(
            records.next().unwrap().unwrap_err(),
            PublishError::InvalidValue { row: 2, field: TEMPERATURE, .. }
        ));
    }

    #[test]
    fn parse_time_formats() {
        let expected = 1_704_067_200_000;
        for value in [
            "2024-01-01T00:00",
            "2024-01-01T00:00:00",
            "2024-01-01 00:00",
            "2024-01-01T05:30:00+05:30",
        ] {
            let parsed = parse_time(value).unwrap_or_else(|| panic!("failed on {value}"));
            assert_eq!(parsed.timestamp_millis(), expected, "{value}");
        }
        assert!(parse_time("yesterday").is_none());
    }
}
