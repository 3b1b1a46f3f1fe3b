use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::collage_types::{EntityType, RankedItem, TimeRange};
use crate::upstream::{SourceError, TopItemsSource, UpstreamEntity};

/// Largest page the upstream listing accepts.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Collects exactly `count` ranked items from the paginated listing,
/// padding with placeholders when the upstream runs dry.
#[derive(Clone)]
pub struct ItemSource {
    upstream: Arc<dyn TopItemsSource>,
    page_size: u32,
    retries: u32,
    backoff: Duration,
}

impl ItemSource {
    pub fn new(upstream: Arc<dyn TopItemsSource>, page_size: u32, retries: u32) -> Self {
        Self {
            upstream,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            retries,
            backoff: Duration::from_millis(250),
        }
    }

    /// Base delay between retries, multiplied by the attempt number.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Only an authorization failure is returned as an error. Other upstream
    /// failures end pagination early and the result is padded.
    pub async fn collect(
        &self,
        credential: &str,
        entity_type: EntityType,
        time_range: TimeRange,
        count: usize,
    ) -> Result<Vec<RankedItem>, SourceError> {
        let mut items: Vec<RankedItem> = Vec::with_capacity(count);
        let mut offset: u32 = 0;

        while items.len() < count {
            let page = match self
                .fetch_with_retry(credential, entity_type, time_range, offset)
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Giving up on {} page at offset {}, treating as end of data: {}",
                        entity_type, offset, e
                    );
                    break;
                }
            };

            let returned = page.len();
            debug!(
                "Received {} {} at offset {} ({} collected so far)",
                returned,
                entity_type,
                offset,
                items.len()
            );

            for entity in page {
                if items.len() == count {
                    break;
                }
                let rank = items.len();
                items.push(to_ranked_item(rank, &entity, entity_type));
            }

            if returned < self.page_size as usize {
                break;
            }

            // Advance by the requested page size, not by what came back
            offset = match offset.checked_add(self.page_size) {
                Some(next) => next,
                None => break,
            };
        }

        let real = items.len();
        if real < count {
            info!(
                "Upstream returned {} of {} requested {}, padding {} placeholder(s)",
                real,
                count,
                entity_type,
                count - real
            );
            items.extend((real..count).map(RankedItem::placeholder));
        }

        Ok(items)
    }

    async fn fetch_with_retry(
        &self,
        credential: &str,
        entity_type: EntityType,
        time_range: TimeRange,
        offset: u32,
    ) -> Result<Vec<UpstreamEntity>, SourceError> {
        let mut attempt = 0;

        loop {
            let upstream = self.upstream.clone();
            let credential_owned = credential.to_string();
            let limit = self.page_size;

            let result = tokio::task::spawn_blocking(move || {
                upstream.fetch_page(&credential_owned, entity_type, time_range, limit, offset)
            })
            .await
            .unwrap_or_else(|e| Err(SourceError::Transport(format!("upstream task failed: {}", e))));

            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    let delay = match &e {
                        SourceError::RateLimited {
                            retry_after: Some(after),
                        } => *after,
                        _ => self.backoff * attempt,
                    };
                    warn!(
                        "Upstream page at offset {} failed ({}), retry {}/{} in {:?}",
                        offset, e, attempt, self.retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn to_ranked_item(rank: usize, entity: &UpstreamEntity, entity_type: EntityType) -> RankedItem {
    RankedItem::new(
        rank,
        entity.display_name(entity_type),
        entity.preferred_image().map(|variant| variant.url.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collage_types::PLACEHOLDER_LABEL;
    use crate::upstream::ImageVariant;
    use std::sync::Mutex;

    /// Serves `total` artists, `per_page_cap` at most per call, and fails the
    /// first `failures` calls with `failure`.
    struct FakeUpstream {
        total: usize,
        per_page_cap: usize,
        failures: Mutex<Vec<SourceError>>,
        calls: Mutex<Vec<(u32, u32)>>,
    }

    impl FakeUpstream {
        fn new(total: usize) -> Self {
            Self {
                total,
                per_page_cap: usize::MAX,
                failures: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_with(mut self, failures: Vec<SourceError>) -> Self {
            self.failures = Mutex::new(failures);
            self
        }

        fn capped_at(mut self, cap: usize) -> Self {
            self.per_page_cap = cap;
            self
        }

        fn calls(&self) -> Vec<(u32, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TopItemsSource for FakeUpstream {
        fn fetch_page(
            &self,
            _credential: &str,
            _entity_type: EntityType,
            _time_range: TimeRange,
            limit: u32,
            offset: u32,
        ) -> Result<Vec<UpstreamEntity>, SourceError> {
            self.calls.lock().unwrap().push((limit, offset));

            {
                let mut failures = self.failures.lock().unwrap();
                if !failures.is_empty() {
                    return Err(failures.remove(0));
                }
            }

            let start = (offset as usize).min(self.total);
            let end = (start + (limit as usize).min(self.per_page_cap)).min(self.total);
            Ok((start..end)
                .map(|i| UpstreamEntity {
                    name: format!("Artist {}", i),
                    images: vec![ImageVariant {
                        url: format!("https://img.example/{}", i),
                        width: Some(640),
                        height: Some(640),
                    }],
                    album: None,
                    artists: Vec::new(),
                })
                .collect())
        }
    }

    fn source(upstream: Arc<FakeUpstream>, page_size: u32, retries: u32) -> ItemSource {
        ItemSource::new(upstream, page_size, retries).with_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_collects_exact_count_across_pages() {
        let upstream = Arc::new(FakeUpstream::new(100));
        let items = source(upstream.clone(), 10, 0)
            .collect("token", EntityType::Artists, TimeRange::MediumTerm, 25)
            .await
            .unwrap();

        assert_eq!(items.len(), 25);
        assert!(items.iter().all(|i| !i.placeholder));
        assert_eq!(items[24].display_name, "Artist 24");
        assert_eq!(upstream.calls(), vec![(10, 0), (10, 10), (10, 20)]);

        for (idx, item) in items.iter().enumerate() {
            assert_eq!(item.rank, idx);
        }
    }

    #[tokio::test]
    async fn test_pads_when_upstream_runs_out() {
        let upstream = Arc::new(FakeUpstream::new(5));
        let items = source(upstream.clone(), 50, 0)
            .collect("token", EntityType::Artists, TimeRange::ShortTerm, 9)
            .await
            .unwrap();

        assert_eq!(items.len(), 9);
        assert!(items[..5].iter().all(|i| !i.placeholder));
        for item in &items[5..] {
            assert!(item.placeholder);
            assert_eq!(item.display_name, PLACEHOLDER_LABEL);
            assert!(item.image_ref.is_none());
        }
        assert_eq!(items[7].rank, 7);
        // A short page ends pagination without another request
        assert_eq!(upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_offset_advances_by_page_size_after_full_page() {
        // Exactly one full page, then an empty one
        let upstream = Arc::new(FakeUpstream::new(4));
        let items = source(upstream.clone(), 4, 0)
            .collect("token", EntityType::Artists, TimeRange::LongTerm, 9)
            .await
            .unwrap();

        assert_eq!(items.len(), 9);
        assert_eq!(items.iter().filter(|i| i.placeholder).count(), 5);
        assert_eq!(upstream.calls(), vec![(4, 0), (4, 4)]);
    }

    #[tokio::test]
    async fn test_page_shorter_than_requested_is_end_of_data() {
        // Upstream hands out 3 per call although 5 were asked for
        let upstream = Arc::new(FakeUpstream::new(100).capped_at(3));
        let items = source(upstream.clone(), 5, 0)
            .collect("token", EntityType::Artists, TimeRange::MediumTerm, 9)
            .await
            .unwrap();

        assert_eq!(items.len(), 9);
        assert_eq!(items.iter().filter(|i| !i.placeholder).count(), 3);
        assert_eq!(upstream.calls(), vec![(5, 0)]);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let upstream = Arc::new(
            FakeUpstream::new(100).failing_with(vec![SourceError::Unauthorized(401)]),
        );
        let result = source(upstream.clone(), 50, 3)
            .collect("expired", EntityType::Artists, TimeRange::MediumTerm, 9)
            .await;

        assert_eq!(result, Err(SourceError::Unauthorized(401)));
        assert_eq!(upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let upstream = Arc::new(FakeUpstream::new(9).failing_with(vec![
            SourceError::Transport("connection reset".to_string()),
            SourceError::RateLimited { retry_after: None },
        ]));
        let items = source(upstream.clone(), 50, 2)
            .collect("token", EntityType::Artists, TimeRange::MediumTerm, 9)
            .await
            .unwrap();

        assert!(items.iter().all(|i| !i.placeholder));
        assert_eq!(upstream.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_pad_instead_of_failing() {
        let upstream = Arc::new(FakeUpstream::new(9).failing_with(vec![
            SourceError::Status(503),
            SourceError::Status(503),
        ]));
        let items = source(upstream.clone(), 50, 1)
            .collect("token", EntityType::Artists, TimeRange::MediumTerm, 4)
            .await
            .unwrap();

        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.placeholder));
        assert_eq!(upstream.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_page_size_is_clamped() {
        let upstream = Arc::new(FakeUpstream::new(0));
        assert_eq!(source(upstream.clone(), 500, 0).page_size(), MAX_PAGE_SIZE);
        assert_eq!(source(upstream, 0, 0).page_size(), 1);
    }
}
