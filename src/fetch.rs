use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use scraper::Html;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    cache::ScheduleCache,
    credentials::{CredentialProvider, Credentials},
    error::{Error, FetchError, Result},
};

pub mod portal;

/// Driver of the remote portal session
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Log in as `identity` and return the raw schedule page
    async fn fetch(
        &mut self,
        identity: &str,
        credentials: &Credentials,
    ) -> std::result::Result<String, FetchError>;
}

/// How to react to transient fetch failures
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of fetch calls allowed, `None` for no limit
    pub max_attempts: Option<u32>,
    /// Wait before the first retry, doubled after each failure
    pub initial_delay: Duration,
    /// Upper bound of the wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Retry forever, right away
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Wait after the failure of the `attempt`-th call (starting at 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another call may follow the `attempt`-th one
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Shared flag to stop the retry loop from outside
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancellation {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolve once `cancel` has been called
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Get the schedule document of `identity`, from the cache when possible
pub async fn acquire<P, F>(
    cache: &ScheduleCache,
    identity: &str,
    provider: &mut P,
    fetcher: &mut F,
    policy: &RetryPolicy,
    cancel: &Cancellation,
) -> Result<Html>
where
    P: CredentialProvider,
    F: Fetcher,
{
    let raw = acquire_raw(cache, identity, provider, fetcher, policy, cancel).await?;

    Ok(Html::parse_document(&raw))
}

/// Same as `acquire`, without parsing the document
pub async fn acquire_raw<P, F>(
    cache: &ScheduleCache,
    identity: &str,
    provider: &mut P,
    fetcher: &mut F,
    policy: &RetryPolicy,
    cancel: &Cancellation,
) -> Result<String>
where
    P: CredentialProvider,
    F: Fetcher,
{
    if let Some(raw) = cache.lookup(identity)? {
        info!("Cached schedule found for {identity}, nothing to download");
        return Ok(raw);
    }

    let credentials = provider.provide(identity)?;
    let raw = fetch_with_retry(identity, &credentials, fetcher, policy, cancel).await?;

    let path = cache.store(identity, &raw)?;
    info!("Success! Raw schedule saved to {}", path.display());

    Ok(raw)
}

async fn fetch_with_retry<F: Fetcher>(
    identity: &str,
    credentials: &Credentials,
    fetcher: &mut F,
    policy: &RetryPolicy,
    cancel: &Cancellation,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { attempts: attempt });
        }

        attempt += 1;
        info!(attempt, "Logging into the portal as {identity}...");
        let fetched = tokio::select! {
            fetched = fetcher.fetch(identity, credentials) => fetched,
            () = cancel.cancelled() => return Err(Error::Cancelled { attempts: attempt }),
        };
        let err = match fetched {
            Ok(raw) => return Ok(raw),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(Error::Fetch(err)),
        };

        if !policy.allows_retry(attempt) {
            return Err(Error::RetriesExhausted {
                attempts: attempt,
                source: err,
            });
        }

        let delay = policy.delay(attempt);
        warn!(attempt, ?delay, "{err}, trying again");
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct StubFetcher {
        responses: VecDeque<std::result::Result<String, FetchError>>,
        calls: usize,
    }

    impl StubFetcher {
        fn new(responses: Vec<std::result::Result<String, FetchError>>) -> Self {
            Self {
                responses: responses.into(),
                calls: 0,
            }
        }

        fn timeouts_then(k: usize, page: &str) -> Self {
            let mut responses: Vec<_> = (0..k)
                .map(|_| Err(FetchError::Timeout("initial target".into())))
                .collect();
            responses.push(Ok(page.to_owned()));
            Self::new(responses)
        }
    }

    impl Fetcher for StubFetcher {
        async fn fetch(
            &mut self,
            _identity: &str,
            _credentials: &Credentials,
        ) -> std::result::Result<String, FetchError> {
            self.calls += 1;
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Portal("no more responses".into())))
        }
    }

    #[derive(Default)]
    struct StubProvider {
        calls: usize,
    }

    impl CredentialProvider for StubProvider {
        fn provide(&mut self, identity: &str) -> Result<Credentials> {
            self.calls += 1;
            Ok(Credentials {
                username: identity.to_owned(),
                password: "secret".into(),
            })
        }
    }

    const PAGE: &str = "<div class=\"pagebodydiv\">schedule</div>";

    #[tokio::test]
    async fn second_acquisition_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut provider = StubProvider::default();
        let mut fetcher = StubFetcher::new(vec![Ok(PAGE.into()), Ok("changed".into())]);
        let (policy, cancel) = (RetryPolicy::default(), Cancellation::default());

        let first = acquire_raw(&cache, "jdoe", &mut provider, &mut fetcher, &policy, &cancel)
            .await
            .unwrap();
        let second = acquire_raw(&cache, "jdoe", &mut provider, &mut fetcher, &policy, &cancel)
            .await
            .unwrap();

        assert_eq!(fetcher.calls, 1);
        assert_eq!(provider.calls, 1);
        assert_eq!(first, PAGE);
        assert_eq!(second.as_bytes(), first.as_bytes());
    }

    #[tokio::test]
    async fn cached_document_skips_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        cache.store("jdoe", PAGE).unwrap();
        let mut provider = StubProvider::default();
        let mut fetcher = StubFetcher::new(vec![]);

        let raw = acquire_raw(
            &cache,
            "jdoe",
            &mut provider,
            &mut fetcher,
            &RetryPolicy::default(),
            &Cancellation::default(),
        )
        .await
        .unwrap();

        assert_eq!(raw, PAGE);
        assert_eq!(provider.calls, 0);
        assert_eq!(fetcher.calls, 0);
    }

    #[tokio::test]
    async fn transient_timeouts_are_retried_until_success() {
        for k in [0, 1, 5] {
            let dir = tempfile::tempdir().unwrap();
            let cache = ScheduleCache::new(dir.path());
            let mut provider = StubProvider::default();
            let mut fetcher = StubFetcher::timeouts_then(k, PAGE);

            let raw = acquire_raw(
                &cache,
                "jdoe",
                &mut provider,
                &mut fetcher,
                &RetryPolicy::default(),
                &Cancellation::default(),
            )
            .await
            .unwrap();

            assert_eq!(raw, PAGE);
            assert_eq!(fetcher.calls, k + 1);
            assert_eq!(provider.calls, 1);
            assert_eq!(cache.lookup("jdoe").unwrap().as_deref(), Some(PAGE));
        }
    }

    #[tokio::test]
    async fn fatal_error_stops_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut provider = StubProvider::default();
        let mut fetcher = StubFetcher::new(vec![
            Err(FetchError::Portal("bad credentials".into())),
            Ok(PAGE.into()),
        ]);

        let result = acquire_raw(
            &cache,
            "jdoe",
            &mut provider,
            &mut fetcher,
            &RetryPolicy::default(),
            &Cancellation::default(),
        )
        .await;

        assert!(matches!(result, Err(Error::Fetch(FetchError::Portal(_)))));
        assert_eq!(fetcher.calls, 1);
        assert_eq!(cache.lookup("jdoe").unwrap(), None);
        assert!(!cache.path("jdoe").unwrap().exists());
    }

    #[tokio::test]
    async fn bounded_policy_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut fetcher = StubFetcher::timeouts_then(10, PAGE);
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };

        let result = acquire_raw(
            &cache,
            "jdoe",
            &mut StubProvider::default(),
            &mut fetcher,
            &policy,
            &Cancellation::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(fetcher.calls, 3);
        assert_eq!(cache.lookup("jdoe").unwrap(), None);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut fetcher = StubFetcher::timeouts_then(10, PAGE);
        let cancel = Cancellation::default();
        cancel.cancel();

        let result = acquire_raw(
            &cache,
            "jdoe",
            &mut StubProvider::default(),
            &mut fetcher,
            &RetryPolicy::default(),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled { attempts: 0 })));
        assert_eq!(fetcher.calls, 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut fetcher = StubFetcher::timeouts_then(10, PAGE);
        let policy = RetryPolicy {
            max_attempts: None,
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        };
        let cancel = Cancellation::default();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = acquire_raw(
            &cache,
            "jdoe",
            &mut StubProvider::default(),
            &mut fetcher,
            &policy,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled { attempts: 1 })));
        assert_eq!(fetcher.calls, 1);
    }

    struct HangingFetcher {
        calls: usize,
    }

    impl Fetcher for HangingFetcher {
        async fn fetch(
            &mut self,
            _identity: &str,
            _credentials: &Credentials,
        ) -> std::result::Result<String, FetchError> {
            self.calls += 1;
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut fetcher = HangingFetcher { calls: 0 };
        let cancel = Cancellation::default();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            acquire_raw(
                &cache,
                "jdoe",
                &mut StubProvider::default(),
                &mut fetcher,
                &RetryPolicy::default(),
                &cancel,
            ),
        )
        .await
        .expect("fetch kept running after cancellation");

        assert!(matches!(result, Err(Error::Cancelled { attempts: 1 })));
        assert_eq!(fetcher.calls, 1);
        assert_eq!(cache.lookup("jdoe").unwrap(), None);
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn default_policy_never_gives_up_nor_waits() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(u32::MAX - 1));
        assert_eq!(policy.delay(7), Duration::ZERO);
    }

    #[tokio::test]
    async fn acquire_parses_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        let mut fetcher = StubFetcher::new(vec![Ok(PAGE.into())]);

        let document = acquire(
            &cache,
            "jdoe",
            &mut StubProvider::default(),
            &mut fetcher,
            &RetryPolicy::default(),
            &Cancellation::default(),
        )
        .await
        .unwrap();

        let text: String = document
            .select(selector!(".pagebodydiv"))
            .flat_map(|div| div.text())
            .collect();
        assert_eq!(text, "schedule");
    }
}
