//! Terminal rendering of responses, stream messages and script results.

use std::io::Write;

use conduit_application::{ExecutionOutcome, MessageReceiver};
use conduit_domain::{MessageDirection, ResponseSpec, ScriptResult, StreamMessage};

/// Status line, optionally the headers, then the body.
pub fn print_response(out: &mut impl Write, response: &ResponseSpec, include_headers: bool) -> std::io::Result<()> {
    writeln!(
        out,
        "{} {} {} ({} ms, {} bytes)",
        response.protocol,
        response.status,
        response.status_text,
        response.duration.as_millis(),
        response.size
    )?;
    if include_headers {
        for (name, values) in &response.headers {
            for value in values {
                writeln!(out, "{name}: {value}")?;
            }
        }
    }
    if !response.body.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", response.body_text())?;
    }
    Ok(())
}

/// Script logs, test outcomes and errors for both phases.
pub fn print_scripts(out: &mut impl Write, outcome: &ExecutionOutcome) -> std::io::Result<()> {
    if let Some(result) = &outcome.pre_script {
        print_script(out, "pre-request", result)?;
    }
    if let Some(result) = &outcome.post_script {
        print_script(out, "post-response", result)?;
    }
    for name in &outcome.unresolved_variables {
        writeln!(out, "warning: unresolved variable {{{{{name}}}}}")?;
    }
    Ok(())
}

fn print_script(out: &mut impl Write, phase: &str, result: &ScriptResult) -> std::io::Result<()> {
    for line in &result.logs {
        writeln!(out, "[{phase}] {line}")?;
    }
    for test in &result.tests {
        match &test.error {
            None if test.passed => writeln!(out, "[{phase}] PASS {}", test.name)?,
            error => writeln!(
                out,
                "[{phase}] FAIL {}: {}",
                test.name,
                error.as_deref().unwrap_or("failed")
            )?,
        }
    }
    if let Some(error) = &result.error {
        writeln!(out, "[{phase}] error: {error}")?;
    }
    for (name, value) in &result.env_changes {
        writeln!(out, "[{phase}] set {name} = {value}")?;
    }
    Ok(())
}

/// One stream message per line, prefixed by its direction.
pub fn print_message(out: &mut impl Write, message: &StreamMessage) -> std::io::Result<()> {
    let arrow = match message.direction {
        MessageDirection::Sent => ">>",
        MessageDirection::Received => "<<",
    };
    let stamp = message.timestamp.format("%H:%M:%S%.3f");
    if let Some(error) = &message.error {
        writeln!(out, "{stamp} {arrow} error: {error}")?;
        if !message.content.is_empty() {
            writeln!(out, "{}", message.content)?;
        }
        return Ok(());
    }
    writeln!(out, "{stamp} {arrow} {}", message.content)
}

/// Prints messages until the channel closes; returns the last error seen.
pub async fn drain(out: &mut impl Write, mut messages: MessageReceiver) -> std::io::Result<Option<String>> {
    let mut last_error = None;
    while let Some(message) = messages.recv().await {
        print_message(out, &message)?;
        out.flush()?;
        if message.is_error() {
            last_error.clone_from(&message.error);
        }
    }
    Ok(last_error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use conduit_domain::TestResult;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_response_with_headers() {
        let headers = BTreeMap::from([("x-id".to_string(), vec!["1".to_string(), "2".to_string()])]);
        let response = ResponseSpec::new(200_u16, headers, b"ok".to_vec(), Duration::from_millis(12))
            .with_protocol("HTTP/1.1");

        let mut out = Vec::new();
        print_response(&mut out, &response, true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK (12 ms, 2 bytes)\nx-id: 1\nx-id: 2\n\nok\n"
        );
    }

    #[test]
    fn test_script_report() {
        let result = ScriptResult {
            logs: vec!["hello".to_string()],
            tests: vec![TestResult::pass("a"), TestResult::fail("b", "nope")],
            env_changes: BTreeMap::from([("k".to_string(), "v".to_string())]),
            error: None,
        };
        let mut out = Vec::new();
        print_script(&mut out, "post-response", &result).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[post-response] hello\n[post-response] PASS a\n[post-response] FAIL b: nope\n[post-response] set k = v\n"
        );
    }

    #[tokio::test]
    async fn test_drain_reports_last_error() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(StreamMessage::sent("{}")).await.unwrap();
        tx.send(StreamMessage::received_error("", "stream reset")).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let error = drain(&mut out, rx).await.unwrap();
        assert_eq!(error.as_deref(), Some("stream reset"));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(">> {}"));
        assert!(text.contains("<< error: stream reset"));
    }
}
