use std::{future::Future, time::Duration};

use common::error::Res;

/// Runs `op` up to `attempts` times with a fixed pause between transient
/// failures. Any other error is returned at once.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Res<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Res<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_transient() => {
                log::warn!("{} failed (attempt {}/{}): {}", label, attempt, attempts, e);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!("{} failed after {} attempt(s): {}", label, attempt, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use common::error::AppError;

    use super::*;

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = with_retry("token", 3, Duration::ZERO, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::PaymentGateway("busy".to_string()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let calls = AtomicU32::new(0);
        let result: Res<()> = with_retry("token", 3, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::PaymentGateway("down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(AppError::PaymentGateway(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Res<()> = with_retry("token", 3, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::PaymentRejected("invalid consumer key".to_string()))
        })
        .await;

        assert!(matches!(result, Err(AppError::PaymentRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
