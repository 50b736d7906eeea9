use bytes::Bytes;
use futures::stream::{Stream, StreamExt};

use super::events::StreamEvent;
use super::parser::{EventParser, LineOutcome};
use crate::error::{AppError, Result};
use crate::transport::StreamHandle;

/// How a stream read loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed,
    Failed(AppError),
    /// Stopped through the cancellation token. Never reported to the user.
    Aborted,
}

enum Step {
    Cancelled,
    Chunk(Bytes),
    ReadFailed(AppError),
    End,
}

const NOISE_PREVIEW_CHARS: usize = 120;

/// Decoded events of one response body, in arrival order.
///
/// Ends after a `completion` event, at end of body, or with a single `Err`:
/// `Aborted` when the token fires, `StreamError` for a server `error` event,
/// `Unauthorized` for a plain-text authentication failure, or the read error.
pub fn event_stream(handle: StreamHandle) -> impl Stream<Item = Result<StreamEvent>> + Send {
    async_stream::stream! {
        let (mut body, token) = handle.into_parts();
        let mut parser = EventParser::new();

        loop {
            if token.is_cancelled() {
                yield Err(AppError::aborted());
                return;
            }

            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Cancelled,
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => Step::Chunk(bytes),
                    Some(Err(e)) => Step::ReadFailed(e),
                    None => Step::End,
                },
            };

            let (outcomes, at_end) = match step {
                Step::Cancelled => {
                    yield Err(AppError::aborted());
                    return;
                }
                Step::ReadFailed(e) => {
                    yield Err(e);
                    return;
                }
                Step::Chunk(bytes) => (parser.feed(&bytes), false),
                Step::End => (parser.finish(), true),
            };

            for outcome in outcomes {
                if token.is_cancelled() {
                    yield Err(AppError::aborted());
                    return;
                }
                match outcome {
                    LineOutcome::Event(event) => {
                        if let Some(reason) = event.error_message() {
                            yield Err(AppError::stream(reason));
                            return;
                        }
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            return;
                        }
                    }
                    LineOutcome::AuthFailure(line) => {
                        log::warn!("🔒 Authentication failure in stream: {}", preview(&line));
                        yield Err(AppError::authentication());
                        return;
                    }
                    LineOutcome::Noise { line, reason } => {
                        log::warn!("⚠️  Skipping malformed stream record ({}): {}", reason, preview(&line));
                    }
                }
            }

            if at_end {
                return;
            }
        }
    }
}

/// Drive `handle` to its end, handing each event to `on_event`.
///
/// The token is re-checked before every delivery, so a callback that stops the
/// stage sees no further events.
pub async fn read_events<F>(handle: StreamHandle, mut on_event: F) -> StreamOutcome
where
    F: FnMut(StreamEvent),
{
    let token = handle.token().clone();
    let events = event_stream(handle);
    futures::pin_mut!(events);

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if token.is_cancelled() {
                    return StreamOutcome::Aborted;
                }
                let terminal = event.is_terminal();
                on_event(event);
                if terminal {
                    return StreamOutcome::Completed;
                }
            }
            Err(e) if e.is_aborted() => return StreamOutcome::Aborted,
            Err(e) => return StreamOutcome::Failed(e),
        }
    }

    if token.is_cancelled() {
        StreamOutcome::Aborted
    } else {
        StreamOutcome::Completed
    }
}

fn preview(line: &str) -> String {
    if line.chars().count() <= NOISE_PREVIEW_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(NOISE_PREVIEW_CHARS).collect();
    format!("{}…", cut)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::transport::ByteStream;
    use crate::workflow::CancellationToken;
    use futures::stream;
    use std::time::Duration;

    fn handle(chunks: &[&str], token: &CancellationToken) -> StreamHandle {
        StreamHandle::from_chunks(
            chunks.iter().map(|c| Bytes::from(c.to_string())).collect::<Vec<_>>(),
            token.clone(),
        )
    }

    async fn collect(chunks: &[&str]) -> (Vec<StreamEvent>, StreamOutcome) {
        let mut seen = Vec::new();
        let outcome = read_events(handle(chunks, &CancellationToken::new()), |e| seen.push(e)).await;
        (seen, outcome)
    }

    #[tokio::test]
    async fn test_two_chunks_two_events() {
        let (events, outcome) = collect(&[
            "data: {\"type\":\"initialization\",\"total_items\":2,\"message\":\"go\"}\n",
            "data: {\"type\":\"item_completed\",\"item_number\":1,\"message\":\"one\"}\n",
        ])
        .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["initialization", "item_completed"]);
    }

    #[tokio::test]
    async fn test_doubled_prefix_completion() {
        let (events, outcome) =
            collect(&["data: data: {\"type\":\"completion\",\"message\":\"done\"}\n"]).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "completion");
    }

    #[tokio::test]
    async fn test_error_short_circuits_buffered_events() {
        let (events, outcome) = collect(&[concat!(
            "data: {\"type\":\"initialization\",\"total_items\":3}\n",
            "data: {\"type\":\"error\",\"error\":\"model unavailable\"}\n",
            "data: {\"type\":\"item_completed\",\"item_number\":1}\n",
            "data: {\"type\":\"completion\"}\n",
        )])
        .await;
        assert_eq!(events.len(), 1);
        match outcome {
            StreamOutcome::Failed(e) => {
                assert_eq!(e.code, ErrorCode::StreamError);
                assert_eq!(e.message, "model unavailable");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_after_completion() {
        let (events, outcome) = collect(&[
            "data: {\"type\":\"completion\"}\ndata: {\"type\":\"raw_content\",\"content\":\"late\"}\n",
        ])
        .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_noise_is_skipped() {
        let (events, outcome) = collect(&[
            ": keep-alive\n",
            "data: not json at all\n",
            "data: {\"type\":\"planning\",\"total_batches\":1}\n",
        ])
        .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_plain_text_auth_escalates() {
        let (events, outcome) = collect(&[
            "data: {\"type\":\"initialization\",\"total_items\":1}\n",
            "Error: Unauthorized\n",
            "data: {\"type\":\"completion\"}\n",
        ])
        .await;
        assert_eq!(events.len(), 1);
        match outcome {
            StreamOutcome::Failed(e) => assert_eq!(e.code, ErrorCode::Unauthorized),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let token = CancellationToken::new();
        token.cancel();
        let mut seen = 0;
        let outcome = read_events(
            handle(&["data: {\"type\":\"completion\"}\n"], &token),
            |_| seen += 1,
        )
        .await;
        assert_eq!(outcome, StreamOutcome::Aborted);
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_chunk() {
        let token = CancellationToken::new();
        let first: Vec<Result<Bytes>> = vec![Ok(Bytes::from(
            "data: {\"type\":\"initialization\",\"total_items\":2}\ndata: {\"type\":\"item_comp",
        ))];
        let body: ByteStream = Box::pin(stream::iter(first).chain(stream::pending()));
        let stream_handle = StreamHandle::new(body, token.clone());

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        let mut seen = Vec::new();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            read_events(stream_handle, |e| seen.push(e.kind())),
        )
        .await
        .expect("read loop exits on cancel");
        assert_eq!(outcome, StreamOutcome::Aborted);
        // The half-received item_completed record is never emitted.
        assert_eq!(seen, vec!["initialization"]);
    }

    #[tokio::test]
    async fn test_callback_stop_prevents_further_events() {
        let token = CancellationToken::new();
        let stopper = token.clone();
        let mut seen = 0;
        let outcome = read_events(
            handle(
                &[concat!(
                    "data: {\"type\":\"initialization\",\"total_items\":2}\n",
                    "data: {\"type\":\"item_completed\",\"item_number\":1}\n",
                )],
                &token,
            ),
            |_| {
                seen += 1;
                stopper.cancel();
            },
        )
        .await;
        assert_eq!(outcome, StreamOutcome::Aborted);
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_read_error_fails() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from("data: {\"type\":\"initialization\"}\n")),
            Err(AppError::network("connection reset")),
        ];
        let stream_handle = StreamHandle::new(Box::pin(stream::iter(items)), CancellationToken::new());
        let outcome = read_events(stream_handle, |_| {}).await;
        assert!(matches!(outcome, StreamOutcome::Failed(e) if e.code == ErrorCode::NetworkError));
    }

    #[test]
    fn test_event_stream_is_usable_without_runtime_helpers() {
        let events = tokio_test::block_on(
            event_stream(handle(
                &["data: {\"type\":\"planning\"}\ndata: {\"type\":\"completion\"}\n"],
                &CancellationToken::new(),
            ))
            .collect::<Vec<_>>(),
        );
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_ok()));
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert_eq!(preview(&long).chars().count(), NOISE_PREVIEW_CHARS + 1);
        assert_eq!(preview("short"), "short");
    }
}
