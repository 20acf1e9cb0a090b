//! Journal log retrieval

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use dm_core::traits::{BinaryUpload, NewEvent};
use dm_protocol::operation::{types, LogfileRequest};
use dm_protocol::{Operation, Record, Template};

use super::command::{run_program, COMMAND_TIMEOUT};
use super::status::execute_reported;
use super::{OperationContext, OperationProcessor, ProcessorError};

/// Event type the log upload is attached to
pub const LOGFILE_EVENT_TYPE: &str = "c8y_Logfile";

/// Identity type under which devices are registered
const SERIAL_ID_TYPE: &str = "c8y_Serial";

const JOURNALCTL: &str = "journalctl";
const UPLOAD_NAME: &str = "file.log";
const UPLOAD_TYPE: &str = "text/plain";

/// Format `journalctl --since/--until` expect
const JOURNAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert an ISO-8601 timestamp to local journal time
///
/// Timestamps without an offset are taken as local time already.
pub fn journal_time(value: &str) -> Result<String, ProcessorError> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Local).format(JOURNAL_TIME_FORMAT).to_string());
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map_err(|e| {
        ProcessorError::InvalidTime {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;
    match Local.from_local_datetime(&naive).earliest() {
        Some(time) => Ok(time.format(JOURNAL_TIME_FORMAT).to_string()),
        None => Err(ProcessorError::InvalidTime {
            value: value.to_string(),
            reason: "not a valid local time".to_string(),
        }),
    }
}

/// `journalctl` arguments for a request
fn journal_args(request: &LogfileRequest) -> Result<Vec<String>, ProcessorError> {
    let mut args = vec![
        "--unit".to_string(),
        request.log_file.clone(),
        "-S".to_string(),
        journal_time(&request.date_from)?,
        "-U".to_string(),
        journal_time(&request.date_to)?,
        "-n".to_string(),
        request.maximum_lines.to_string(),
    ];
    if let Some(search) = request.search_text.as_deref().filter(|s| !s.is_empty()) {
        args.push("-g".to_string());
        args.push(search.to_string());
    }
    Ok(args)
}

/// Handles `c8y_LogfileRequest`
pub struct LogfileProcessor {
    host_os: String,
    /// Journal query program followed by any leading arguments
    command: Vec<String>,
    timeout: Duration,
}

impl LogfileProcessor {
    /// Override the detected host OS
    pub fn with_host_os(mut self, os: impl Into<String>) -> Self {
        self.host_os = os.into();
        self
    }

    /// Use a different journal query command
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    async fn query(&self, args: &[String]) -> Result<String, ProcessorError> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| ProcessorError::CommandFailed("no journal command configured".into()))?;
        let args: Vec<&str> = leading.iter().chain(args).map(String::as_str).collect();
        run_program(program, &args, self.timeout).await
    }

    async fn available_units(&self) -> Result<Vec<String>, ProcessorError> {
        let output = self
            .query(&["--field".to_string(), "_SYSTEMD_UNIT".to_string()])
            .await?;
        let mut units: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|unit| !unit.is_empty())
            .map(str::to_string)
            .collect();
        units.sort();
        units.dedup();
        Ok(units)
    }

    async fn fetch_and_upload(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<Option<String>, ProcessorError> {
        let request: LogfileRequest = operation.parse_fragment(types::LOGFILE_REQUEST)?;
        let log = self.query(&journal_args(&request)?).await?;

        let platform = ctx.platform.as_ref();
        let device = platform
            .managed_object_id(SERIAL_ID_TYPE, ctx.client_id.as_str())
            .await?;
        let event_id = platform
            .create_event(&NewEvent::new(device, LOGFILE_EVENT_TYPE, "Logfile Upload"))
            .await?;
        let url = platform
            .upload_event_binary(
                &event_id,
                BinaryUpload {
                    file_name: UPLOAD_NAME.to_string(),
                    content_type: UPLOAD_TYPE.to_string(),
                    content: Bytes::from(log),
                },
            )
            .await?;

        tracing::info!("Uploaded {} log to {}", request.log_file, url);
        Ok(Some(url))
    }
}

impl Default for LogfileProcessor {
    fn default() -> Self {
        Self {
            host_os: std::env::consts::OS.to_string(),
            command: vec![JOURNALCTL.to_string()],
            timeout: COMMAND_TIMEOUT,
        }
    }
}

#[async_trait]
impl OperationProcessor for LogfileProcessor {
    fn operation_type(&self) -> &'static str {
        types::LOGFILE_REQUEST
    }

    async fn initialize(&self, ctx: &OperationContext) -> Result<(), ProcessorError> {
        if self.host_os != "linux" {
            return Err(ProcessorError::UnsupportedHost(types::LOGFILE_REQUEST));
        }

        let units = self.available_units().await?;
        tracing::info!("Advertising {} log units", units.len());
        let record = Record::new(Template::SetSupportedLogs).with_fields(units);
        ctx.session.publish_record(&record).await?;
        Ok(())
    }

    async fn process_operation(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<bool, ProcessorError> {
        if !ctx.accepts(operation, types::LOGFILE_REQUEST) {
            return Ok(false);
        }

        execute_reported(
            ctx.session.as_ref(),
            types::LOGFILE_REQUEST,
            self.fetch_and_upload(operation, ctx),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, operation, CLIENT_ID};
    use chrono::Utc;
    use dm_core::RestError;
    use serde_json::json;
    use tempfile::TempDir;

    /// Script standing in for journalctl: lists units, otherwise echoes its arguments
    fn fake_journal(dir: &TempDir) -> Vec<String> {
        let path = dir.path().join("journalctl.sh");
        std::fs::write(
            &path,
            "if [ \"$1\" = \"--field\" ]; then printf 'ssh.service\\ncron.service\\n\\nssh.service\\n'; else echo \"$@\"; fi\n",
        )
        .unwrap();
        vec!["sh".to_string(), path.to_string_lossy().into_owned()]
    }

    fn processor(dir: &TempDir) -> LogfileProcessor {
        LogfileProcessor::default()
            .with_host_os("linux")
            .with_command(fake_journal(dir))
    }

    #[test]
    fn test_journal_time_converts_to_local() {
        let utc = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let expected = utc.with_timezone(&Local).format(JOURNAL_TIME_FORMAT).to_string();
        assert_eq!(journal_time("2024-05-06T07:08:09Z").unwrap(), expected);
        assert_eq!(journal_time("2024-05-06T09:08:09.123+02:00").unwrap(), expected);
    }

    #[test]
    fn test_journal_time_without_offset_is_local() {
        assert_eq!(journal_time("2024-05-06T07:08:09").unwrap(), "2024-05-06 07:08:09");
        assert!(journal_time("yesterday").is_err());
    }

    #[test]
    fn test_journal_args() {
        let request = LogfileRequest {
            log_file: "ssh.service".into(),
            date_from: "2024-05-06T07:08:09".into(),
            date_to: "2024-05-06T08:08:09".into(),
            search_text: Some("Accepted publickey".into()),
            maximum_lines: 50,
        };
        assert_eq!(
            journal_args(&request).unwrap(),
            vec![
                "--unit",
                "ssh.service",
                "-S",
                "2024-05-06 07:08:09",
                "-U",
                "2024-05-06 08:08:09",
                "-n",
                "50",
                "-g",
                "Accepted publickey"
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize_advertises_sorted_units() {
        let dir = TempDir::new().unwrap();
        let (ctx, session, _) = context();

        processor(&dir).initialize(&ctx).await.unwrap();
        assert_eq!(session.records(), vec!["118,cron.service,ssh.service"]);
    }

    #[tokio::test]
    async fn test_log_is_uploaded_and_url_reported() {
        let dir = TempDir::new().unwrap();
        let (ctx, session, platform) = context();
        let op = operation(
            CLIENT_ID,
            types::LOGFILE_REQUEST,
            json!({
                "logFile": "ssh.service",
                "dateFrom": "2024-05-06T07:08:09",
                "dateTo": "2024-05-06T08:08:09",
                "maximumLines": "20"
            }),
        );

        assert!(processor(&dir).process_operation(&op, &ctx).await.unwrap());

        let events = platform.events.lock().unwrap();
        assert_eq!(events[0].source.id, "4711");
        assert_eq!(events[0].event_type, LOGFILE_EVENT_TYPE);

        let uploads = platform.uploads.lock().unwrap();
        let (event_id, upload) = &uploads[0];
        assert_eq!(event_id, "900");
        assert_eq!(upload.file_name, "file.log");
        assert_eq!(
            upload.content,
            Bytes::from("--unit ssh.service -S 2024-05-06 07:08:09 -U 2024-05-06 08:08:09 -n 20\n")
        );

        assert_eq!(
            session.records(),
            vec![
                "501,c8y_LogfileRequest",
                "503,c8y_LogfileRequest,https://example.com/event/events/900/binaries",
            ]
        );
    }

    #[tokio::test]
    async fn test_foreign_operation_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (ctx, session, platform) = context();
        let op = operation(
            "linux-ffffffffffff",
            types::LOGFILE_REQUEST,
            json!({"logFile": "ssh.service", "dateFrom": "2024-05-06T07:08:09", "dateTo": "2024-05-06T08:08:09"}),
        );

        assert!(!processor(&dir).process_operation(&op, &ctx).await.unwrap());
        assert!(session.records().is_empty());
        assert!(platform.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_platform_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let (ctx, session, platform) = context();
        platform.failures.lock().unwrap().push_back(RestError::Status {
            status: 404,
            message: Some("External id not found".into()),
        });
        let op = operation(
            CLIENT_ID,
            types::LOGFILE_REQUEST,
            json!({"logFile": "ssh.service", "dateFrom": "2024-05-06T07:08:09", "dateTo": "2024-05-06T08:08:09"}),
        );

        processor(&dir).process_operation(&op, &ctx).await.unwrap();
        assert_eq!(
            session.records()[1],
            "502,c8y_LogfileRequest,\"Platform request failed: Platform returned status 404: External id not found\""
        );
    }
}
