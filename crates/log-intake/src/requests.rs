// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Input validation for the HTTP surface.
//!
//! Nothing past this module sees raw request input: submissions become a
//! [`NewLogEntry`] and query strings become [`SearchFilters`] plus a
//! [`PageRequest`], or the request is rejected with [`ValidationErrors`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entry::{Level, NewLogEntry, MAX_SERVICE_NAME_LEN};
use crate::store::{PageRequest, SearchFilters, DEFAULT_PER_PAGE, MAX_PER_PAGE};

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Field-level validation failures, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<(String, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push((field.to_string(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|(f, _)| f == field)
    }

    /// First message, with a count of the remaining ones.
    pub fn message(&self) -> String {
        match self.errors.split_first() {
            None => "The given data was invalid.".to_string(),
            Some(((_, first), [])) => first.clone(),
            Some(((_, first), [_])) => format!("{first} (and 1 more error)"),
            Some(((_, first), rest)) => format!("{first} (and {} more errors)", rest.len()),
        }
    }

    /// Messages grouped by field.
    pub fn by_field(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut fields: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (field, message) in &self.errors {
            fields.entry(field).or_default().push(message);
        }
        fields
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ValidationErrors {}

impl Serialize for ValidationErrors {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Body<'a> {
            message: String,
            errors: BTreeMap<&'a str, Vec<&'a str>>,
        }
        Body {
            message: self.message(),
            errors: self.by_field(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The body is not a JSON object at all.
    #[error("Invalid JSON payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

/// Body of `POST /logs`.
pub struct StoreLogRequest;

impl StoreLogRequest {
    const ALLOWED_FIELDS: [&'static str; 6] = [
        "id",
        "trace_id",
        "message",
        "level",
        "service_name",
        "timestamp",
    ];

    pub fn from_json(body: &[u8]) -> Result<NewLogEntry, RequestError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| RequestError::Malformed(e.to_string()))?;
        match value {
            Value::Object(fields) => Ok(Self::validate(&fields)?),
            _ => Err(RequestError::Malformed(
                "request body must be a JSON object".to_string(),
            )),
        }
    }

    /// A client supplied `id` is tolerated and dropped.
    pub fn validate(fields: &Map<String, Value>) -> Result<NewLogEntry, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let trace_id = optional_string(fields, "trace_id", &mut errors)
            .and_then(|raw| parse_uuid_field("trace_id", raw, &mut errors));

        let message = required_string(fields, "message", &mut errors);

        let level = required_string(fields, "level", &mut errors)
            .and_then(|raw| parse_level_field("level", raw, &mut errors));

        let service_name = required_string(fields, "service_name", &mut errors)
            .filter(|name| check_service_name("service_name", name, &mut errors));

        let timestamp = optional_string(fields, "timestamp", &mut errors)
            .and_then(|raw| parse_date_field("timestamp", raw, false, &mut errors));

        for field in fields.keys() {
            if !Self::ALLOWED_FIELDS.contains(&field.as_str()) {
                errors.add(field, format!("The {field} field is not allowed."));
            }
        }

        match (message, level, service_name) {
            (Some(message), Some(level), Some(service_name)) => errors.into_result(NewLogEntry {
                message: message.to_string(),
                level,
                service_name: service_name.to_string(),
                trace_id,
                timestamp,
            }),
            _ => Err(errors),
        }
    }
}

/// Query string of `GET /logs`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexLogRequest {
    pub filters: SearchFilters,
    pub page: PageRequest,
}

impl IndexLogRequest {
    /// Unknown parameters are ignored; when a parameter repeats, the last one wins.
    pub fn from_query(query: Option<&str>) -> Result<IndexLogRequest, ValidationErrors> {
        let params: HashMap<String, String> = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let param = |name: &str| {
            params
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let mut errors = ValidationErrors::new();

        let trace_id = param("trace_id").and_then(|raw| parse_uuid_field("trace_id", raw, &mut errors));
        let level = param("level").and_then(|raw| parse_level_field("level", raw, &mut errors));
        let service_name = param("service_name")
            .filter(|name| check_service_name("service_name", name, &mut errors))
            .map(str::to_string);
        let date_from =
            param("date_from").and_then(|raw| parse_date_field("date_from", raw, false, &mut errors));
        let date_to =
            param("date_to").and_then(|raw| parse_date_field("date_to", raw, true, &mut errors));
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if to < from {
                errors.add(
                    "date_to",
                    "The date_to field must be a date after or equal to date_from.",
                );
            }
        }

        let per_page = param("per_page")
            .and_then(|raw| parse_bounded_int("per_page", raw, 1, Some(MAX_PER_PAGE), &mut errors))
            .unwrap_or(DEFAULT_PER_PAGE);
        let page = param("page")
            .and_then(|raw| parse_bounded_int("page", raw, 1, None, &mut errors))
            .unwrap_or(1);

        errors.into_result(IndexLogRequest {
            filters: SearchFilters {
                trace_id,
                level,
                service_name,
                date_from,
                date_to,
            },
            page: PageRequest::new(page, per_page),
        })
    }
}

/// Parses an instant in any of the accepted forms, normalized to UTC.
///
/// Values without an offset are taken as UTC. A bare date is the start of that
/// day, or the last instant of it when `end_of_day` is set.
pub fn parse_date(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    let date = NaiveDate::parse_from_str(value, DATE_FORMAT).ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)?
    } else {
        NaiveTime::MIN
    };
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn required_string<'a>(
    fields: &'a Map<String, Value>,
    field: &str,
    errors: &mut ValidationErrors,
) -> Option<&'a str> {
    match fields.get(field) {
        None | Some(Value::Null) => {
            errors.add(field, format!("The {field} field is required."));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.add(field, format!("The {field} field is required."));
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            errors.add(field, format!("The {field} field must be a string."));
            None
        }
    }
}

fn optional_string<'a>(
    fields: &'a Map<String, Value>,
    field: &str,
    errors: &mut ValidationErrors,
) -> Option<&'a str> {
    match fields.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim()),
        Some(_) => {
            errors.add(field, format!("The {field} field must be a string."));
            None
        }
    }
}

fn parse_uuid_field(field: &str, raw: &str, errors: &mut ValidationErrors) -> Option<Uuid> {
    // only the canonical hyphenated form is accepted
    match Uuid::try_parse(raw) {
        Ok(id) if raw.len() == 36 => Some(id),
        _ => {
            errors.add(field, format!("The {field} field must be a valid UUID."));
            None
        }
    }
}

fn parse_level_field(field: &str, raw: &str, errors: &mut ValidationErrors) -> Option<Level> {
    match raw.parse::<Level>() {
        Ok(level) => Some(level),
        Err(_) => {
            let allowed: Vec<&str> = Level::ALL.iter().map(Level::as_str).collect();
            errors.add(
                field,
                format!(
                    "The {field} field must be one of the following values: {}.",
                    allowed.join(", ")
                ),
            );
            None
        }
    }
}

fn check_service_name(field: &str, name: &str, errors: &mut ValidationErrors) -> bool {
    if name.chars().count() > MAX_SERVICE_NAME_LEN {
        errors.add(
            field,
            format!("The {field} field must not be greater than {MAX_SERVICE_NAME_LEN} characters."),
        );
        return false;
    }
    true
}

fn parse_date_field(
    field: &str,
    raw: &str,
    end_of_day: bool,
    errors: &mut ValidationErrors,
) -> Option<DateTime<Utc>> {
    let parsed = parse_date(raw, end_of_day);
    if parsed.is_none() {
        errors.add(field, format!("The {field} field must be a valid date."));
    }
    parsed
}

fn parse_bounded_int(
    field: &str,
    raw: &str,
    min: usize,
    max: Option<usize>,
    errors: &mut ValidationErrors,
) -> Option<usize> {
    let Ok(value) = raw.parse::<i64>() else {
        errors.add(field, format!("The {field} field must be an integer."));
        return None;
    };
    if value < min as i64 {
        errors.add(field, format!("The {field} field must be at least {min}."));
        return None;
    }
    let value = usize::try_from(value).ok()?;
    match max {
        Some(max) if value > max => {
            errors.add(
                field,
                format!("The {field} field must not be greater than {max}."),
            );
            None
        }
        _ => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplicate::duplicate_item;

    fn store(body: &str) -> Result<NewLogEntry, RequestError> {
        StoreLogRequest::from_json(body.as_bytes())
    }

    fn store_errors(body: &str) -> ValidationErrors {
        match store(body) {
            Err(RequestError::Invalid(errors)) => errors,
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_store_minimal_body() {
        let entry = store(r#"{"message":"boom","level":"error","service_name":"api"}"#).unwrap();
        assert_eq!(entry.message, "boom");
        assert_eq!(entry.level, Level::Error);
        assert_eq!(entry.service_name, "api");
        assert_eq!(entry.trace_id, None);
        assert_eq!(entry.timestamp, None);
    }

    #[test]
    fn test_store_keeps_trace_id_and_normalizes_timestamp() {
        let entry = store(
            r#"{"message":"boom","level":"info","service_name":"api",
                "trace_id":"6f1e2c4a-8a4b-4f0e-9a43-2f9a4c7d1b21",
                "timestamp":"2024-12-07T12:30:00+02:00"}"#,
        )
        .unwrap();
        assert_eq!(
            entry.trace_id,
            Some(Uuid::parse_str("6f1e2c4a-8a4b-4f0e-9a43-2f9a4c7d1b21").unwrap())
        );
        assert_eq!(
            entry.timestamp.unwrap().to_rfc3339(),
            "2024-12-07T10:30:00+00:00"
        );
    }

    #[test]
    fn test_store_discards_client_id() {
        let entry = store(
            r#"{"id":"6f1e2c4a-8a4b-4f0e-9a43-2f9a4c7d1b21","message":"m","level":"debug","service_name":"s"}"#,
        );
        assert!(entry.is_ok());
    }

    #[test]
    fn test_store_null_and_empty_optionals_are_absent() {
        let entry = store(
            r#"{"message":"m","level":"debug","service_name":"s","trace_id":null,"timestamp":""}"#,
        )
        .unwrap();
        assert_eq!(entry.trace_id, None);
        assert_eq!(entry.timestamp, None);
    }

    #[test]
    fn test_store_reports_every_missing_field() {
        let errors = store_errors("{}");
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors.message(),
            "The message field is required. (and 2 more errors)"
        );
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json["errors"]["service_name"][0],
            "The service_name field is required."
        );
    }

    #[test]
    fn test_store_service_name_length_boundary() {
        let ok = format!(
            r#"{{"message":"m","level":"info","service_name":"{}"}}"#,
            "a".repeat(255)
        );
        assert!(store(&ok).is_ok());

        let too_long = format!(
            r#"{{"message":"m","level":"info","service_name":"{}"}}"#,
            "a".repeat(256)
        );
        assert!(store_errors(&too_long).has("service_name"));
    }

    #[duplicate_item(
        test_name                           body                                                                                   field;
        [test_store_rejects_unknown_level]  [r#"{"message":"m","level":"fatal","service_name":"s"}"#]                              ["level"];
        [test_store_rejects_uppercase_level] [r#"{"message":"m","level":"ERROR","service_name":"s"}"#]                             ["level"];
        [test_store_rejects_empty_message]  [r#"{"message":"  ","level":"info","service_name":"s"}"#]                              ["message"];
        [test_store_rejects_numeric_message] [r#"{"message":42,"level":"info","service_name":"s"}"#]                               ["message"];
        [test_store_rejects_bad_trace_id]   [r#"{"message":"m","level":"info","service_name":"s","trace_id":"abc"}"#]              ["trace_id"];
        [test_store_rejects_simple_uuid]    [r#"{"message":"m","level":"info","service_name":"s","trace_id":"6f1e2c4a8a4b4f0e9a432f9a4c7d1b21"}"#] ["trace_id"];
        [test_store_rejects_bad_timestamp]  [r#"{"message":"m","level":"info","service_name":"s","timestamp":"yesterday"}"#]       ["timestamp"];
        [test_store_rejects_unknown_field]  [r#"{"message":"m","level":"info","service_name":"s","created_at":"2024-01-01"}"#]     ["created_at"];
    )]
    #[test]
    fn test_name() {
        let errors = store_errors(body);
        assert_eq!(errors.len(), 1);
        assert!(errors.has(field));
    }

    #[test]
    fn test_store_unknown_field_message() {
        let errors = store_errors(r#"{"message":"m","level":"info","service_name":"s","user":"x"}"#);
        assert_eq!(errors.message(), "The user field is not allowed.");
    }

    #[duplicate_item(
        test_name                       body;
        [test_store_rejects_array]      ["[]"];
        [test_store_rejects_string]     ["\"log\""];
        [test_store_rejects_garbage]    ["{not json"];
        [test_store_rejects_empty_body] [""];
    )]
    #[test]
    fn test_name() {
        assert!(matches!(store(body), Err(RequestError::Malformed(_))));
    }

    #[test]
    fn test_index_defaults() {
        let request = IndexLogRequest::from_query(None).unwrap();
        assert_eq!(request.filters, SearchFilters::default());
        assert_eq!(request.page, PageRequest::new(1, 15));
        assert_eq!(IndexLogRequest::from_query(Some("")).unwrap(), request);
    }

    #[test]
    fn test_index_reads_every_filter() {
        let request = IndexLogRequest::from_query(Some(
            "trace_id=6f1e2c4a-8a4b-4f0e-9a43-2f9a4c7d1b21&level=warning&service_name=billing%20api\
             &date_from=2024-12-01&date_to=2024-12-07&per_page=50&page=3&sort=asc",
        ))
        .unwrap();

        assert!(request.filters.trace_id.is_some());
        assert_eq!(request.filters.level, Some(Level::Warning));
        assert_eq!(request.filters.service_name.as_deref(), Some("billing api"));
        assert_eq!(
            request.filters.date_from.unwrap().to_rfc3339(),
            "2024-12-01T00:00:00+00:00"
        );
        assert_eq!(
            request.filters.date_to.unwrap(),
            Utc.with_ymd_and_hms(2024, 12, 7, 23, 59, 59).unwrap()
                + chrono::Duration::nanoseconds(999_999_999)
        );
        assert_eq!(request.page, PageRequest::new(3, 50));
    }

    #[test]
    fn test_index_empty_values_are_wildcards() {
        let request =
            IndexLogRequest::from_query(Some("trace_id=&level=&service_name=&per_page=")).unwrap();
        assert_eq!(request.filters, SearchFilters::default());
        assert_eq!(request.page.per_page, 15);
    }

    #[duplicate_item(
        test_name                           query                                       field;
        [test_index_per_page_zero]          ["per_page=0"]                              ["per_page"];
        [test_index_per_page_too_large]     ["per_page=101"]                            ["per_page"];
        [test_index_per_page_not_integer]   ["per_page=ten"]                            ["per_page"];
        [test_index_page_zero]              ["page=0"]                                  ["page"];
        [test_index_bad_level]              ["level=fatal"]                             ["level"];
        [test_index_bad_trace_id]           ["trace_id=123"]                            ["trace_id"];
        [test_index_bad_date_from]          ["date_from=12/07/2024"]                    ["date_from"];
        [test_index_date_to_before_from]    ["date_from=2024-12-07&date_to=2024-12-06"] ["date_to"];
    )]
    #[test]
    fn test_name() {
        let errors = IndexLogRequest::from_query(Some(query)).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.has(field));
    }

    #[test]
    fn test_index_per_page_bounds_are_inclusive() {
        for (query, per_page) in [("per_page=1", 1), ("per_page=100", 100)] {
            let request = IndexLogRequest::from_query(Some(query)).unwrap();
            assert_eq!(request.page.per_page, per_page);
        }
    }

    #[test]
    fn test_index_same_day_range_is_valid() {
        let request =
            IndexLogRequest::from_query(Some("date_from=2024-12-07&date_to=2024-12-07")).unwrap();
        assert!(request.filters.date_from < request.filters.date_to);
    }

    #[duplicate_item(
        test_name                           value                           expected;
        [test_parse_date_rfc3339_utc]       ["2024-12-07T10:00:00Z"]        ["2024-12-07T10:00:00+00:00"];
        [test_parse_date_rfc3339_offset]    ["2024-12-07T10:00:00-03:00"]   ["2024-12-07T13:00:00+00:00"];
        [test_parse_date_space_separated]   ["2024-12-07 10:00:00"]         ["2024-12-07T10:00:00+00:00"];
        [test_parse_date_t_separated]       ["2024-12-07T10:00:00"]         ["2024-12-07T10:00:00+00:00"];
        [test_parse_date_fractional]        ["2024-12-07 10:00:00.250"]     ["2024-12-07T10:00:00.250+00:00"];
        [test_parse_date_only]              ["2024-12-07"]                  ["2024-12-07T00:00:00+00:00"];
    )]
    #[test]
    fn test_name() {
        assert_eq!(parse_date(value, false).unwrap().to_rfc3339(), expected);
    }

    #[test]
    fn test_parse_date_rejects_invalid_calendar_dates() {
        assert_eq!(parse_date("2024-02-30", false), None);
        assert_eq!(parse_date("2024-12-07 25:00:00", false), None);
        assert_eq!(parse_date("", false), None);
    }
}
