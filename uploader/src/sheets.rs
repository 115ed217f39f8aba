//! The upload log, kept in a Google Sheets spreadsheet.
//!
//! Every upload attempt becomes one row; rows are only ever appended. The first sheet of the
//! spreadsheet is used, with a header row in `A1:H1` that is written before the first row is
//! appended if the sheet does not have it yet.

use crate::google::{GoogleAuth, ensure_success};
use crate::model::{UploadRecord, UploadStatus};
use crate::pipeline::UploadLog;
use eyre::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const API_BASE: &str = "https://sheets.googleapis.com";

pub const HEADERS: [&str; 8] = [
    "File ID",
    "File Name",
    "Folder Path",
    "YouTube URL",
    "Upload Time",
    "Channel",
    "Status",
    "Error",
];

const FILE_ID_COLUMN: usize = 0;
const CHANNEL_COLUMN: usize = 5;
const STATUS_COLUMN: usize = 6;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// See: <https://developers.google.com/sheets/api/reference/rest/v4/spreadsheets.values>
#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct Rows<'a> {
    values: &'a [Vec<String>],
}

fn cell(row: &[Value], i: usize) -> Option<String> {
    match row.get(i)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Channels with a successful upload of `file_id` among `rows`.
fn successful_channels(rows: &[Vec<Value>], file_id: &str) -> Vec<String> {
    rows.iter()
        .filter(|row| cell(row, FILE_ID_COLUMN).as_deref().map(str::trim) == Some(file_id))
        .filter(|row| {
            UploadStatus::from_cell(cell(row, STATUS_COLUMN).as_deref())
                == Some(UploadStatus::Success)
        })
        .filter_map(|row| cell(row, CHANNEL_COLUMN))
        .map(|channel| channel.trim().to_string())
        .filter(|channel| !channel.is_empty())
        .collect()
}

/// What row 1 of the sheet holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderRow {
    Complete,
    Missing,
    /// A header from before the trailing columns were added.
    Outdated,
    /// Something other than our header, left alone.
    Foreign,
}

fn header_row(cells: &[String]) -> HeaderRow {
    let cells: Vec<&str> = cells.iter().map(|c| c.trim()).collect();
    let used = cells.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1);
    let cells = &cells[..used];
    if cells.is_empty() {
        return HeaderRow::Missing;
    }
    let is_prefix = cells.len() <= HEADERS.len()
        && cells
            .iter()
            .zip(HEADERS)
            .all(|(cell, header)| cell.eq_ignore_ascii_case(header));
    match is_prefix {
        true if cells.len() == HEADERS.len() => HeaderRow::Complete,
        true => HeaderRow::Outdated,
        false => HeaderRow::Foreign,
    }
}

/// Lays a record out in [`HEADERS`] order, with the time in the local time zone.
fn record_row(record: &UploadRecord) -> Vec<String> {
    let uploaded_at = record
        .uploaded_at
        .to_zoned(jiff::tz::TimeZone::system())
        .strftime(TIME_FORMAT)
        .to_string();
    vec![
        record.file_id.clone(),
        record.file_name.clone(),
        record.folder_path.clone(),
        record.url.clone(),
        uploaded_at,
        record.channel.clone(),
        record.status.to_string(),
        record.error.clone(),
    ]
}

#[derive(Debug, Clone)]
pub struct SheetsLog {
    http: reqwest::Client,
    base_url: String,
    auth: GoogleAuth,
    spreadsheet_id: String,
    timeout: Duration,
    /// Set once the header row has been checked in this run.
    header_checked: Arc<OnceCell<()>>,
}

impl SheetsLog {
    pub fn new(
        http: reqwest::Client,
        auth: GoogleAuth,
        spreadsheet_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
            auth,
            spreadsheet_id: spreadsheet_id.into(),
            timeout,
            header_checked: Arc::default(),
        }
    }

    /// Points the log at another Sheets API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{range}",
            self.base_url, self.spreadsheet_id
        )
    }

    #[instrument(skip(self), level = tracing::Level::TRACE)]
    async fn get_values(&self, range: &str) -> eyre::Result<Vec<Vec<Value>>> {
        let request = self.http.get(self.values_url(range)).timeout(self.timeout);
        let response = self
            .auth
            .authorize(request)
            .await?
            .send()
            .await
            .context("send Sheets values.get request")?;
        let range: ValueRange = ensure_success(response, "Sheets values.get")
            .await?
            .json()
            .await
            .context("parse Sheets values")?;
        Ok(range.values)
    }

    /// Writes the header row if row 1 is empty or holds an older, shorter header.
    ///
    /// Anything else in row 1 is left untouched.
    #[instrument(skip(self))]
    async fn ensure_headers(&self) -> eyre::Result<()> {
        let current: Vec<String> = self
            .get_values("A1:H1")
            .await
            .context("read upload log header row")?
            .first()
            .map(|row| (0..row.len()).map(|i| cell(row, i).unwrap_or_default()).collect())
            .unwrap_or_default();
        match header_row(&current) {
            HeaderRow::Complete => return Ok(()),
            HeaderRow::Foreign => {
                tracing::warn!(row = ?current, "row 1 of the upload log is not its header, leaving it");
                return Ok(());
            }
            HeaderRow::Missing | HeaderRow::Outdated => {}
        }

        let header: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
        let request = self
            .http
            .put(self.values_url("A1:H1"))
            .query(&[("valueInputOption", "RAW")])
            .json(&Rows { values: &[header] })
            .timeout(self.timeout);
        let response = self
            .auth
            .authorize(request)
            .await?
            .send()
            .await
            .context("send Sheets values.update request")?;
        ensure_success(response, "Sheets values.update").await?;
        tracing::info!(previous_columns = current.len(), "wrote upload log header row");
        Ok(())
    }
}

impl UploadLog for SheetsLog {
    #[instrument(skip(self))]
    async fn uploaded_channels(&self, file_id: &str) -> eyre::Result<Vec<String>> {
        let rows = self.get_values("A2:H").await?;
        Ok(successful_channels(&rows, file_id))
    }

    #[instrument(skip(self, record), fields(file = %record.file_name, channel = %record.channel))]
    async fn append(&self, record: &UploadRecord) -> eyre::Result<()> {
        eyre::ensure!(
            self.auth.can_write(),
            "appending to the upload log requires a service account"
        );
        self.header_checked
            .get_or_try_init(|| self.ensure_headers())
            .await?;
        let request = self
            .http
            .post(format!("{}:append", self.values_url("A1:H1")))
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&Rows {
                values: &[record_row(record)],
            })
            .timeout(self.timeout);
        let response = self
            .auth
            .authorize(request)
            .await?
            .send()
            .await
            .context("send Sheets values.append request")?;
        ensure_success(response, "Sheets values.append").await?;
        tracing::info!(status = %record.status, "logged upload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock_api::{MockApi, Recorded, Reply};
    use crate::model::tests::{channel, video};
    use crate::model::{UploadedVideo, VideoFile};
    use crate::pipeline::tests::{FakeHost, FakeNotifier, FakeSource, source};
    use crate::pipeline::{Destination, Pipeline, RunOptions};
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rows(raw: Value) -> Vec<Vec<Value>> {
        serde_json::from_value::<ValueRange>(raw).unwrap().values
    }

    #[test]
    fn only_successful_rows_count() {
        let rows = rows(json!({
            "range": "Sheet1!A2:H4",
            "values": [
                ["f1", "clip1.mp4", "Stories/Episode 1", "https://www.youtube.com/watch?v=a", "2026-01-01 10:00:00", "Tiny Trailblazers", "success"],
                ["f1", "clip1.mp4", "Stories/Episode 1", "", "2026-01-01 10:00:10", "MagicMap Tales", "failed", "quota exceeded"],
                ["f2", "clip2.mp4", "Stories/Episode 1", "https://www.youtube.com/watch?v=b", "2026-01-01 10:01:00", "KidVenture Quest"],
                ["f1", "clip1.mp4"]
            ]
        }));
        assert_eq!(successful_channels(&rows, "f1"), vec!["Tiny Trailblazers"]);
        // no status column means the row predates it, and those were all successes
        assert_eq!(successful_channels(&rows, "f2"), vec!["KidVenture Quest"]);
        assert!(successful_channels(&rows, "f3").is_empty());
    }

    #[test]
    fn empty_sheet_has_no_values() {
        assert!(rows(json!({"range": "Sheet1!A2:H"})).is_empty());
    }

    #[test]
    fn row_follows_header_order() {
        let mut record = UploadRecord::new(
            &video("f1", "clip1.mp4"),
            &channel("Tiny Trailblazers", "TinyTrailblazers"),
            &Ok(UploadedVideo::from_id("abc123")),
        );
        record.uploaded_at = "2026-03-04T05:06:07Z".parse().unwrap();
        let row = record_row(&record);
        assert_eq!(row.len(), HEADERS.len());
        assert_eq!(row[0], "f1");
        assert_eq!(row[1], "clip1.mp4");
        assert_eq!(row[2], "Stories/Episode 1");
        assert_eq!(row[3], "https://www.youtube.com/watch?v=abc123");
        assert_eq!(row[5], "Tiny Trailblazers");
        assert_eq!(row[6], "success");
        assert_eq!(row[7], "");

        let expected = record
            .uploaded_at
            .to_zoned(jiff::tz::TimeZone::system())
            .strftime(TIME_FORMAT)
            .to_string();
        assert_eq!(row[4], expected);
        assert_eq!(row[4].len(), "2026-03-04 05:06:07".len());
    }

    #[test]
    fn non_string_cells_are_read() {
        let rows = rows(json!({"values": [[12345, "n", "p", "u", "t", "Tiny Trailblazers", "Success"]]}));
        assert_eq!(successful_channels(&rows, "12345"), vec!["Tiny Trailblazers"]);
    }

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn header_row_is_recognized_by_name() {
        assert_eq!(header_row(&strings(&HEADERS)), HeaderRow::Complete);
        assert_eq!(header_row(&[]), HeaderRow::Missing);
        assert_eq!(header_row(&strings(&["", " "])), HeaderRow::Missing);
        assert_eq!(header_row(&strings(&HEADERS[..6])), HeaderRow::Outdated);
        assert_eq!(
            header_row(&strings(&["file id", "FILE NAME", "Folder Path", "", ""])),
            HeaderRow::Outdated
        );
        // a record that landed in row 1, its empty Error cell dropped by Sheets
        assert_eq!(
            header_row(&strings(&[
                "f1",
                "clip1.mp4",
                "Stories/Episode 1",
                "https://www.youtube.com/watch?v=a",
                "2026-01-01 10:00:00",
                "Tiny Trailblazers",
                "success",
            ])),
            HeaderRow::Foreign
        );
    }

    /// A sheet whose row 1 is `first_row`, accepting every write.
    fn sheet(first_row: serde_json::Value) -> impl Fn(&Recorded) -> Reply {
        move |req: &Recorded| match (&req.method, req.path.as_str()) {
            (&Method::GET, "/v4/spreadsheets/sheet-1/values/A1:H1") => {
                Reply::json(json!({"range": "Sheet1!A1:H1", "values": first_row.clone()}))
            }
            (&Method::GET, "/v4/spreadsheets/sheet-1/values/A2:H") => {
                Reply::json(json!({"range": "Sheet1!A2:H"}))
            }
            (&Method::PUT, "/v4/spreadsheets/sheet-1/values/A1:H1")
            | (&Method::POST, "/v4/spreadsheets/sheet-1/values/A1:H1:append") => {
                Reply::json(json!({}))
            }
            _ => Reply::status(404),
        }
    }

    fn log(api: &MockApi, auth: GoogleAuth) -> SheetsLog {
        SheetsLog::new(reqwest::Client::new(), auth, "sheet-1", Duration::from_secs(5))
            .with_base_url(&api.url)
    }

    fn writable(api: &MockApi) -> SheetsLog {
        log(api, GoogleAuth::Token("sa-token".into()))
    }

    fn record(file_id: &str) -> UploadRecord {
        UploadRecord::new(
            &video(file_id, "clip1.mp4"),
            &channel("Tiny Trailblazers", "TinyTrailblazers"),
            &Ok(UploadedVideo::from_id("abc123")),
        )
    }

    fn calls(api: &MockApi) -> Vec<String> {
        api.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path.rsplit('/').next().unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn header_is_written_once_before_the_first_append() {
        let api = MockApi::start(sheet(json!([]))).await;
        let log = writable(&api);

        log.append(&record("f1")).await.unwrap();
        log.append(&record("f2")).await.unwrap();

        assert_eq!(
            calls(&api),
            vec![
                "GET A1:H1",
                "PUT A1:H1",
                "POST A1:H1:append",
                "POST A1:H1:append"
            ]
        );
        let requests = api.requests();
        let header: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(header["values"][0], json!(HEADERS));
        assert_eq!(requests[1].param("valueInputOption"), "RAW");
        assert_eq!(requests[2].param("insertDataOption"), "INSERT_ROWS");
        assert_eq!(requests[2].header("authorization"), "Bearer sa-token");
        let row: serde_json::Value = serde_json::from_slice(&requests[2].body).unwrap();
        assert_eq!(row["values"][0][0], "f1");
    }

    #[tokio::test]
    async fn record_in_row_one_is_never_overwritten() {
        let api = MockApi::start(sheet(json!([[
            "f0",
            "clip0.mp4",
            "Stories",
            "https://www.youtube.com/watch?v=z",
            "2026-01-01 09:00:00",
            "Tiny Trailblazers",
            "success"
        ]])))
        .await;

        writable(&api).append(&record("f1")).await.unwrap();

        assert_eq!(calls(&api), vec!["GET A1:H1", "POST A1:H1:append"]);
    }

    #[tokio::test]
    async fn complete_header_is_left_alone() {
        let api = MockApi::start(sheet(json!([HEADERS]))).await;

        writable(&api).append(&record("f1")).await.unwrap();

        assert_eq!(calls(&api), vec!["GET A1:H1", "POST A1:H1:append"]);
    }

    #[tokio::test]
    async fn api_key_cannot_append() {
        let api = MockApi::start(sheet(json!([]))).await;

        let err = log(&api, GoogleAuth::ApiKey("sheets-key".into()))
            .append(&record("f1"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("service account"), "{err:#}");
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn dedup_reads_below_the_header() {
        let api = MockApi::start(|_: &Recorded| {
            Reply::json(json!({"values": [
                ["f1", "clip1.mp4", "Stories", "u", "t", "Tiny Trailblazers", "success"],
                ["f1", "clip1.mp4", "Stories", "", "t", "MagicMap Tales", "failed", "quota"]
            ]}))
        })
        .await;

        let logged = log(&api, GoogleAuth::ApiKey("sheets-key".into()))
            .uploaded_channels("f1")
            .await
            .unwrap();

        assert_eq!(logged, vec!["Tiny Trailblazers"]);
        let requests = api.requests();
        assert_eq!(requests[0].path, "/v4/spreadsheets/sheet-1/values/A2:H");
        assert_eq!(requests[0].param("key"), "sheets-key");
    }

    fn run_against(
        api: &MockApi,
        files: Vec<VideoFile>,
    ) -> Pipeline<FakeSource, SheetsLog, FakeHost, FakeNotifier> {
        let ch = channel("Tiny Trailblazers", "TinyTrailblazers");
        let destinations = vec![Destination {
            host: FakeHost::new(&ch.handle),
            config: ch,
        }];
        let options = RunOptions {
            upload_delay: Duration::ZERO,
            record_retry_delay: Duration::ZERO,
            ..RunOptions::default()
        };
        Pipeline::new(
            source(files),
            writable(api),
            destinations,
            FakeNotifier::default(),
            options,
        )
    }

    #[tokio::test]
    async fn empty_folder_run_leaves_the_sheet_untouched() {
        let api = MockApi::start(sheet(json!([]))).await;

        let err = run_against(&api, Vec::new()).run().await.unwrap_err();

        assert!(matches!(err, Error::Discovery(_)), "{err}");
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn run_checks_the_header_only_when_it_has_a_record() {
        let api = MockApi::start(sheet(json!([]))).await;

        run_against(&api, vec![video("f1", "clip1.mp4")])
            .run()
            .await
            .unwrap();

        assert_eq!(
            calls(&api),
            vec!["GET A2:H", "GET A1:H1", "PUT A1:H1", "POST A1:H1:append"]
        );
    }
}
