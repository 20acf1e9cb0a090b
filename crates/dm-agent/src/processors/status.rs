//! Operation status reporting

use std::future::Future;

use dm_core::config::DEFAULT_MAX_PACKET_SIZE;
use dm_core::traits::ManagementSession;
use dm_core::SessionError;
use dm_protocol::{escape, OperationStatus, Record};

use super::ProcessorError;

/// Room left in a packet for the escaped status text
pub const MAX_STATUS_TEXT: usize = DEFAULT_MAX_PACKET_SIZE - 512;

/// Longest prefix of `text` whose escaped form fits in `limit` bytes
fn fit_text(text: &str, limit: usize) -> &str {
    let mut end = text.len();
    loop {
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let over = escape(&text[..end]).len().saturating_sub(limit);
        if over == 0 {
            return &text[..end];
        }
        end -= over.min(end);
    }
}

/// Publish `<501|502|503>,<type>[,<text>]`; the text is escaped on rendering
///
/// Text too long for one packet is cut so the status is never lost.
pub async fn report(
    session: &dyn ManagementSession,
    status: OperationStatus,
    operation_type: &str,
    text: Option<&str>,
) -> Result<(), SessionError> {
    tracing::info!("{} -> {}", operation_type, status);
    let text = text.map(|text| {
        let fitted = fit_text(text, MAX_STATUS_TEXT);
        if fitted.len() < text.len() {
            tracing::warn!(
                "{} status text truncated from {} to {} bytes",
                operation_type,
                text.len(),
                fitted.len()
            );
        }
        fitted
    });
    session
        .publish_record(&Record::operation_status(status, operation_type, text))
        .await
}

pub async fn report_executing(session: &dyn ManagementSession, operation_type: &str) -> Result<(), SessionError> {
    report(session, OperationStatus::Executing, operation_type, None).await
}

pub async fn report_success(
    session: &dyn ManagementSession,
    operation_type: &str,
    text: Option<&str>,
) -> Result<(), SessionError> {
    report(session, OperationStatus::Successful, operation_type, text).await
}

pub async fn report_failure(
    session: &dyn ManagementSession,
    operation_type: &str,
    error: &ProcessorError,
) -> Result<(), SessionError> {
    tracing::error!("{} failed: {}", operation_type, error);
    let text = error.to_string();
    report(session, OperationStatus::Failed, operation_type, Some(&text)).await
}

/// Report executing, run `work`, then report its outcome
///
/// `Ok(text)` becomes a success carrying `text`; an error becomes a failure
/// carrying its display text. Only a failure to publish is returned.
pub async fn execute_reported<F>(
    session: &dyn ManagementSession,
    operation_type: &str,
    work: F,
) -> Result<bool, ProcessorError>
where
    F: Future<Output = Result<Option<String>, ProcessorError>> + Send,
{
    report_executing(session, operation_type).await?;
    match work.await {
        Ok(text) => report_success(session, operation_type, text.as_deref()).await?,
        Err(e) => report_failure(session, operation_type, &e).await?,
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;

    #[tokio::test]
    async fn test_success_and_failure_sequences() {
        let session = RecordingSession::default();

        execute_reported(&session, "c8y_Command", async { Ok(Some("a, b".to_string())) })
            .await
            .unwrap();
        execute_reported(&session, "c8y_Command", async {
            Err(ProcessorError::CommandFailed("say \"no\"".into()))
        })
        .await
        .unwrap();

        assert_eq!(
            session.records(),
            vec![
                "501,c8y_Command",
                "503,c8y_Command,\"a, b\"",
                "501,c8y_Command",
                "502,c8y_Command,\"say \"\"no\"\"\"",
            ]
        );
    }

    #[test]
    fn test_fit_text() {
        assert_eq!(fit_text("short", 10), "short");
        assert_eq!(fit_text("abcdefghij", 4), "abcd");
        // Quoting and doubled quotes count against the limit
        let fitted = fit_text("a\"b\"c\"d", 6);
        assert_eq!(fitted, "a");
        assert!(escape(fitted).len() <= 6);
        assert_eq!(fit_text("ééé", 3), "é");
    }

    #[tokio::test]
    async fn test_long_output_is_truncated_to_fit_a_packet() {
        let session = RecordingSession::default();
        let output = "line, with \"quotes\"\n".repeat(2000);

        report_success(&session, "c8y_Command", Some(&output)).await.unwrap();

        let record = &session.records()[0];
        assert!(record.len() < DEFAULT_MAX_PACKET_SIZE - 256);
        assert!(record.starts_with("503,c8y_Command,\"line, with \"\"quotes\"\""));
        assert!(record.ends_with('"'));
    }

    #[tokio::test]
    async fn test_success_without_text() {
        let session = RecordingSession::default();
        report_success(&session, "c8y_Restart", None).await.unwrap();
        assert_eq!(session.records(), vec!["503,c8y_Restart"]);
    }
}
