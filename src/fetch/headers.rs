//! Response header blob handling.
//!
//! A header blob is the raw response head as text: an optional status line
//! followed by `Name: value` lines separated by CRLF. Only `ETag` and
//! `Last-Modified` are ever read back out of it.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::HeaderMap;

/// HTTP-date layout used for `If-Modified-Since` (IMF-fixdate).
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// Obsolete RFC 850 layout still accepted when parsing.
const RFC850_DATE: &str = "%A, %d-%b-%y %H:%M:%S GMT";
/// Obsolete asctime layout still accepted when parsing.
const ASCTIME_DATE: &str = "%a %b %e %H:%M:%S %Y";

/// Returns the value of the first `ETag:` line, if any.
pub fn extract_etag(blob: &str) -> Option<String> {
    header_value(blob, "ETag").map(str::to_string)
}

/// Returns the first `Last-Modified:` line parsed as an HTTP date.
///
/// An absent or unparsable value yields `None`.
pub fn extract_last_modified(blob: &str) -> Option<DateTime<Utc>> {
    header_value(blob, "Last-Modified").and_then(parse_http_date)
}

/// Finds the first `<name>: <value>` line. The field name is matched case-sensitively.
fn header_value<'a>(blob: &'a str, name: &str) -> Option<&'a str> {
    blob.lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parses any of the three HTTP-date forms.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    [RFC850_DATE, ASCTIME_DATE]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(value, layout).ok())
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp as an IMF-fixdate, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
pub fn format_http_date(dt: DateTime<Utc>) -> String {
    dt.format(IMF_FIXDATE).to_string()
}

/// Renders a transport header map as a header blob.
///
/// Field names are written in their conventional casing (`ETag`,
/// `Last-Modified`) since HTTP/2 delivers them lowercased.
pub fn render_header_blob(
    version: reqwest::Version,
    status: reqwest::StatusCode,
    headers: &HeaderMap,
) -> String {
    let mut blob = format!("{:?} {}\r\n", version, status);
    for (name, value) in headers {
        blob.push_str(&canonical_name(name.as_str()));
        blob.push_str(": ");
        blob.push_str(&String::from_utf8_lossy(value.as_bytes()));
        blob.push_str("\r\n");
    }
    blob
}

fn canonical_name(name: &str) -> String {
    match name {
        "etag" => "ETag".to_string(),
        "www-authenticate" => "WWW-Authenticate".to_string(),
        _ => name
            .split('-')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    const BLOB: &str = "HTTP/1.1 200 OK\r\n\
        Content-Type: application/atom+xml\r\n\
        ETag: \"686897696a7c876b7e\"\r\n\
        Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\n\
        \r\n";

    #[test]
    fn test_extracts_etag() {
        assert_eq!(
            extract_etag(BLOB).as_deref(),
            Some("\"686897696a7c876b7e\"")
        );
    }

    #[test]
    fn test_extracts_last_modified() {
        assert_eq!(
            extract_last_modified(BLOB),
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
    }

    #[test]
    fn test_absent_fields_yield_none() {
        let blob = "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n";
        assert_eq!(extract_etag(blob), None);
        assert_eq!(extract_last_modified(blob), None);
        assert_eq!(extract_etag(""), None);
    }

    #[test]
    fn test_malformed_last_modified_yields_none() {
        let blob = "Last-Modified: the day before yesterday\r\n";
        assert_eq!(extract_last_modified(blob), None);
    }

    #[test]
    fn test_field_name_is_case_sensitive() {
        let blob = "etag: \"lower\"\r\nETag: \"canonical\"\r\n";
        assert_eq!(extract_etag(blob).as_deref(), Some("\"canonical\""));
        assert_eq!(extract_etag("etag: \"lower\"\r\n"), None);
    }

    #[test]
    fn test_first_match_wins_and_prefixed_names_ignored() {
        let blob = "X-ETag: \"nope\"\r\nETag: W/\"first\"\r\nETag: \"second\"\r\n";
        assert_eq!(extract_etag(blob).as_deref(), Some("W/\"first\""));
    }

    #[test]
    fn test_parses_obsolete_date_forms() {
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
    }

    #[test]
    fn test_format_http_date() {
        let dt = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(format_http_date(dt), "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date(&format_http_date(dt)), Some(dt));
    }

    #[test]
    fn test_rendered_blob_round_trips_through_extractors() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"v2\""));
        headers.insert(
            "last-modified",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers.insert("content-type", HeaderValue::from_static("text/xml"));

        let blob = render_header_blob(reqwest::Version::HTTP_2, reqwest::StatusCode::OK, &headers);

        assert!(blob.starts_with("HTTP/2.0 200 OK\r\n"));
        assert!(blob.contains("Content-Type: text/xml\r\n"));
        assert_eq!(extract_etag(&blob).as_deref(), Some("\"v2\""));
        assert!(extract_last_modified(&blob).is_some());
    }
}
