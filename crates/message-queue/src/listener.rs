//! Reconnecting consumption of a [`NotificationListener`]'s stream, with
//! exponential backoff and full jitter between reconnect attempts.

use std::sync::Arc;

use futures::StreamExt;
use rand::Rng;
use reaper_core::notification::{BackoffPolicy, NotificationListener};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Consume `listener`'s notification stream until `cancel` fires,
/// calling `on_payload` for every payload received.
///
/// The stream ending or erroring is treated identically: both trigger a
/// fresh `subscribe()` call after the current backoff delay, and both
/// reset the attempt counter to zero once a subscription succeeds. Per
/// spec §4.3, reconnecting after a stream loss triggers `on_payload`
/// once immediately (with a synthetic payload) so the caller can cover
/// any notifications missed while disconnected.
pub async fn run_reconnecting<F>(
    listener: Arc<dyn NotificationListener>,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
    mut on_payload: F,
) where
    F: FnMut(String) + Send,
{
    let mut attempt = 0u32;
    let mut first_connect = true;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut stream = match listener.subscribe().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, attempt, "notification listener subscribe failed");
                if !sleep_backoff(&backoff, attempt, &cancel).await {
                    return;
                }
                attempt += 1;
                continue;
            }
        };

        info!(first_connect, "notification listener (re)connected");
        attempt = 0;
        if !first_connect {
            // Reconnect policy: cover missed notifications with an
            // immediate synthetic reload trigger.
            on_payload("reconnect".to_string());
        }
        first_connect = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(payload)) => on_payload(payload),
                        Some(Err(err)) => {
                            warn!(error = %err, "notification stream item error");
                            break;
                        }
                        None => {
                            warn!("notification stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        if !sleep_backoff(&backoff, attempt, &cancel).await {
            return;
        }
        attempt += 1;
    }
}

/// Sleep the jittered backoff delay, returning `false` if cancelled
/// mid-sleep.
async fn sleep_backoff(backoff: &BackoffPolicy, attempt: u32, cancel: &CancellationToken) -> bool {
    let delay = backoff.jittered_delay(attempt, |ceiling_fraction_seed| {
        rand::thread_rng().gen_range(0.0..=ceiling_fraction_seed)
    });
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use reaper_core::error::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct ScriptedListener {
        // Each call to `subscribe` pops the next scripted stream.
        scripts: StdMutex<Vec<Vec<Result<String>>>>,
    }

    #[async_trait]
    impl NotificationListener for ScriptedListener {
        async fn subscribe(&self) -> Result<BoxStream<'static, Result<String>>> {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                return Ok(Box::pin(stream::pending()));
            }
            let items = scripts.remove(0);
            Ok(Box::pin(stream::iter(items)))
        }
    }

    #[tokio::test]
    async fn payloads_are_forwarded_in_order() {
        let listener = Arc::new(ScriptedListener {
            scripts: StdMutex::new(vec![vec![Ok("a".to_string()), Ok("b".to_string())]]),
        });
        let received = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = received.clone();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(run_reconnecting(
            listener,
            BackoffPolicy::default(),
            cancel_clone,
            move |payload| received_clone.lock().unwrap().push(payload),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = handle.await;

        assert_eq!(*received.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn reconnect_after_stream_end_triggers_synthetic_payload() {
        let listener = Arc::new(ScriptedListener {
            scripts: StdMutex::new(vec![
                vec![Ok("first".to_string())],
                vec![Ok("second".to_string())],
            ]),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let fast_backoff = BackoffPolicy {
            initial: std::time::Duration::from_millis(1),
            max: std::time::Duration::from_millis(5),
            factor: 1.0,
        };

        let handle = tokio::spawn(run_reconnecting(
            listener,
            fast_backoff,
            cancel_clone,
            move |_payload| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
        let _ = handle.await;

        // "first", then a reconnect synthetic payload, then "second".
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
