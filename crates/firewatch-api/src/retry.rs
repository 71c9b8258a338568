// Retry policy for transient transport failures.
//
// 3 retries with exponential backoff (2, 4, 8 seconds). Anything that is
// not a timeout or connection error fails immediately — HTTP errors and
// API-level errors are deterministic.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;

const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Run `operation` with retries on transient errors.
///
/// `op_name` is used for log context only.
pub async fn with_retries<T, F, Fut>(op_name: &str, operation: F) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = INITIAL_DELAY;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            warn!(op = op_name, attempt, delay_secs = delay.as_secs(), "retrying after transient error");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op = op_name, attempt, "succeeded on retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                warn!(op = op_name, error = %e, "transient error");
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop always returns")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn non_transient_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::Operation {
                    message: "bad command".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result = with_retries("test", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
