use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;

use crate::metadata::MetadataOverrides;
use crate::pipeline::{InputDescriptor, ItemSpec};

pub const BATCH_COLUMNS: [&str; 6] = [
    "input_path",
    "title",
    "description",
    "tags",
    "publish_time",
    "is_youtube_url",
];

pub const OPTIONAL_COLUMNS: [&str; 1] = ["thumbnail_path"];

const TEMPLATE: &str = "input_path,title,description,tags,publish_time,is_youtube_url\n\
path/to/video.mp4,Video Title,Description here,\"tag1,tag2,tag3\",2024-02-20T15:00:00,false\n";

/// Canonical batch template: header plus one example row.
pub fn batch_template() -> &'static str {
    TEMPLATE
}

/// A rejected CSV cell. `line` is the 1-based file line, so the header is line 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvRowError {
    pub line: u64,
    pub field: String,
    pub message: String,
}

impl CsvRowError {
    fn new(line: u64, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CsvRowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.field, self.message)
    }
}

/// Parses a batch manifest. Every problem in the file is reported; no items are returned
/// unless the whole file is valid.
pub fn parse_batch_csv<R: Read>(reader: R) -> Result<Vec<ItemSpec>, Vec<CsvRowError>> {
    let mut csv = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(false)
        .from_reader(reader);

    let headers = csv
        .headers()
        .map_err(|err| vec![CsvRowError::new(1, "header", err.to_string())])?
        .clone();
    let columns = check_headers(&headers)?;

    let mut items = Vec::new();
    let mut errors = Vec::new();
    for (index, record) in csv.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                let line = err
                    .position()
                    .map(|pos| pos.line())
                    .unwrap_or(index as u64 + 2);
                errors.push(CsvRowError::new(line, "row", err.to_string()));
                continue;
            }
        };
        let line = record
            .position()
            .map(|pos| pos.line())
            .unwrap_or(index as u64 + 2);
        if record.iter().all(str::is_empty) {
            continue;
        }
        match parse_row(&record, &columns, line) {
            Ok(item) => items.push(item),
            Err(mut row_errors) => errors.append(&mut row_errors),
        }
    }

    if errors.is_empty() {
        Ok(items)
    } else {
        Err(errors)
    }
}

fn check_headers(headers: &StringRecord) -> Result<HashMap<String, usize>, Vec<CsvRowError>> {
    let mut columns = HashMap::new();
    let mut errors = Vec::new();
    for (index, name) in headers.iter().enumerate() {
        let name = name.trim_start_matches('\u{feff}');
        if !BATCH_COLUMNS.contains(&name) && !OPTIONAL_COLUMNS.contains(&name) {
            errors.push(CsvRowError::new(1, name, "unknown column"));
            continue;
        }
        if columns.insert(name.to_string(), index).is_some() {
            errors.push(CsvRowError::new(1, name, "duplicate column"));
        }
    }
    if !columns.contains_key("input_path") {
        errors.push(CsvRowError::new(1, "input_path", "required column is missing"));
    }
    if errors.is_empty() {
        Ok(columns)
    } else {
        Err(errors)
    }
}

fn parse_row(
    record: &StringRecord,
    columns: &HashMap<String, usize>,
    line: u64,
) -> Result<ItemSpec, Vec<CsvRowError>> {
    let cell = |name: &str| -> Option<&str> {
        columns
            .get(name)
            .and_then(|index| record.get(*index))
            .filter(|value| !value.is_empty())
    };
    let mut errors = Vec::new();

    let input_path = cell("input_path");
    if input_path.is_none() {
        errors.push(CsvRowError::new(line, "input_path", "is required"));
    }

    let is_remote = match cell("is_youtube_url").map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            errors.push(CsvRowError::new(
                line,
                "is_youtube_url",
                format!("expected \"true\" or \"false\", got {other:?}"),
            ));
            false
        }
    };

    let publish_time = match cell("publish_time") {
        None => None,
        Some(raw) => match parse_publish_time(raw) {
            Some(at) => Some(at),
            None => {
                errors.push(CsvRowError::new(
                    line,
                    "publish_time",
                    format!("{raw:?} is not an ISO-8601 timestamp"),
                ));
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(errors);
    }
    let Some(input_path) = input_path else {
        return Err(errors);
    };

    let input = if is_remote {
        InputDescriptor::Remote(input_path.to_string())
    } else {
        InputDescriptor::Local(PathBuf::from(input_path))
    };
    let tags = cell("tags")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ItemSpec {
        input,
        metadata: MetadataOverrides {
            title: cell("title").map(str::to_string),
            description: cell("description").map(str::to_string),
            tags,
            publish_time,
            thumbnail: cell("thumbnail_path").map(PathBuf::from),
        },
    })
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS` (space separator allowed), read as UTC.
pub fn parse_publish_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
