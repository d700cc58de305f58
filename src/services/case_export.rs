//! Case exchange files
//!
//! Semicolon separated with a header row. Day and hour are padded to two
//! digits, time to revocation to six and skipped records to five; `censored`
//! is written as 0/1 and instants as epoch milliseconds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::models::observation::Observation;
use crate::models::price::SeriesKey;

pub const CASE_FILE_HEADER: [&str; 13] = [
    "region",
    "zone",
    "instance",
    "dayOfWeek",
    "hourOfDay",
    "multiplier",
    "censored",
    "initTime",
    "endTime",
    "timeToRevocation",
    "skipRecords",
    "initValue",
    "endValue",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected header {0:?}")]
    Header(Vec<String>),
    #[error("line {line}: invalid {field} {value:?}")]
    Parse {
        line: u64,
        field: &'static str,
        value: String,
    },
}

/// File name used for the cases of one series
pub fn case_file_name(key: &SeriesKey) -> String {
    format!("cases_{}_{}.csv", key.zone, key.instance_type)
}

pub fn write_cases<W: Write>(writer: W, observations: &[Observation]) -> Result<usize, ExportError> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);
    wtr.write_record(CASE_FILE_HEADER)?;

    for o in observations {
        wtr.write_record([
            o.region.as_str(),
            o.zone.as_str(),
            o.instance_type.as_str(),
            &format!("{:02}", o.day_of_week),
            &format!("{:02}", o.hour_of_day),
            &o.multiplier.to_string(),
            if o.censored { "1" } else { "0" },
            &o.init_time.timestamp_millis().to_string(),
            &o.end_time.timestamp_millis().to_string(),
            &format!("{:06}", o.time_to_revocation),
            &format!("{:05}", o.skip_records),
            &o.init_value.to_string(),
            &o.end_value.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(observations.len())
}

/// Write the cases of one series into `dir`, returning the file path
pub fn write_cases_file(
    dir: &Path,
    key: &SeriesKey,
    observations: &[Observation],
) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(case_file_name(key));
    let file = File::create(&path)?;
    write_cases(file, observations)?;
    Ok(path)
}

pub fn read_cases<R: Read>(reader: R) -> Result<Vec<Observation>, ExportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers()?;
    if headers.iter().ne(CASE_FILE_HEADER) {
        return Err(ExportError::Header(
            headers.iter().map(str::to_string).collect(),
        ));
    }

    let mut observations = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |index: usize, name: &'static str| {
            record.get(index).ok_or(ExportError::Parse {
                line,
                field: name,
                value: String::new(),
            })
        };

        let censored = match field(6, "censored")? {
            "0" => false,
            "1" => true,
            other => {
                return Err(ExportError::Parse {
                    line,
                    field: "censored",
                    value: other.to_string(),
                });
            }
        };

        observations.push(Observation {
            region: field(0, "region")?.to_string(),
            zone: field(1, "zone")?.to_string(),
            instance_type: field(2, "instance")?.to_string(),
            day_of_week: parse(field(3, "dayOfWeek")?, "dayOfWeek", line)?,
            hour_of_day: parse(field(4, "hourOfDay")?, "hourOfDay", line)?,
            multiplier: parse::<Decimal>(field(5, "multiplier")?, "multiplier", line)?,
            censored,
            init_time: parse_millis(field(7, "initTime")?, "initTime", line)?,
            end_time: parse_millis(field(8, "endTime")?, "endTime", line)?,
            time_to_revocation: parse(field(9, "timeToRevocation")?, "timeToRevocation", line)?,
            skip_records: parse(field(10, "skipRecords")?, "skipRecords", line)?,
            init_value: parse::<Decimal>(field(11, "initValue")?, "initValue", line)?,
            end_value: parse::<Decimal>(field(12, "endValue")?, "endValue", line)?,
        });
    }

    Ok(observations)
}

pub fn read_cases_file(path: &Path) -> Result<Vec<Observation>, ExportError> {
    read_cases(File::open(path)?)
}

/// Case files in `dir`, sorted by name
pub fn case_files(dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_case_file = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("cases_") && name.ends_with(".csv"));
        if is_case_file {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parse<T: FromStr>(value: &str, field: &'static str, line: u64) -> Result<T, ExportError> {
    value.trim().parse().map_err(|_| ExportError::Parse {
        line,
        field,
        value: value.to_string(),
    })
}

fn parse_millis(value: &str, field: &'static str, line: u64) -> Result<DateTime<Utc>, ExportError> {
    let millis: i64 = parse(value, field, line)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| ExportError::Parse {
        line,
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn observation() -> Observation {
        let init = Utc.with_ymd_and_hms(2017, 9, 5, 20, 0, 0).unwrap();
        Observation {
            region: "us-west-2".to_string(),
            zone: "us-west-2a".to_string(),
            instance_type: "m4.large".to_string(),
            day_of_week: 3,
            hour_of_day: 8,
            multiplier: dec!(1.0),
            init_time: init,
            end_time: init + chrono::Duration::minutes(95),
            init_value: dec!(0.0321),
            end_value: dec!(0.0400),
            time_to_revocation: 95,
            skip_records: 1,
            censored: false,
        }
    }

    #[test]
    fn test_padded_line_layout() {
        let mut out = Vec::new();
        write_cases(&mut out, &[observation()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), CASE_FILE_HEADER.join(";"));
        assert_eq!(
            lines.next().unwrap(),
            "us-west-2;us-west-2a;m4.large;03;08;1.0;0;1504641600000;1504647300000;000095;00001;0.0321;0.0400"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_read_back_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut censored = observation();
        censored.censored = true;

        let key = observation().key();
        let path = write_cases_file(dir.path(), &key, &[observation(), censored.clone()]).unwrap();
        assert!(path.ends_with("cases_us-west-2a_m4.large.csv"));
        assert_eq!(case_files(dir.path()).unwrap(), vec![path.clone()]);

        let read = read_cases_file(&path).unwrap();
        assert_eq!(read, vec![observation(), censored]);
    }

    #[test]
    fn test_rejects_bad_flag_and_header() {
        let header = CASE_FILE_HEADER.join(";");
        let body = format!(
            "{}\nr;z;i;01;00;1.0;yes;0;3600000;000060;00000;1;2\n",
            header
        );
        assert!(matches!(
            read_cases(body.as_bytes()),
            Err(ExportError::Parse { field: "censored", .. })
        ));

        assert!(matches!(
            read_cases("a;b\n1;2\n".as_bytes()),
            Err(ExportError::Header(_))
        ));
    }
}
