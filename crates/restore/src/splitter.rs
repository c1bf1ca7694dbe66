//! Range-to-split-points planner
//!
//! Turns the key ranges of a backup into region boundaries:
//! 1. Sort and validate the ranges
//! 2. Scan the regions covering them (paginated, checked for gaps)
//! 3. Group the range boundaries by owning region, skipping existing ones
//! 4. Batch split each region, several regions in parallel
//! 5. Back off, re-scan and re-plan on failure
//! 6. Wait for the new regions to show up, then scatter them

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use br_core::{format_key, sort_ranges, span, KeyRange, RegionInfo};

use crate::config::SplitConfig;
use crate::error::{Error, Result};
use crate::split_client::SplitClient;

/// Polls of `get_region_by_id` before a new region is reported missing
const SPLIT_CHECK_MAX_RETRY_TIMES: usize = 64;
const SPLIT_CHECK_INTERVAL: Duration = Duration::from_millis(8);
const SPLIT_MAX_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const SCATTER_CHECK_INTERVAL: Duration = Duration::from_millis(50);
const SCATTER_MAX_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// What one `split` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Ranges after sorting and dedup
    pub ranges: usize,
    /// Distinct boundaries requested
    pub split_points: usize,
    /// Regions that received a batch split
    pub split_regions: usize,
    /// Regions created
    pub new_regions: usize,
    /// Regions whose scatter request was accepted
    pub scattered: usize,
}

/// Regions to split and the keys to split each one at
type SplitPlan = Vec<(RegionInfo, Vec<Vec<u8>>)>;

/// Result of one split round
#[derive(Debug, Default)]
struct RoundOutcome {
    split_regions: usize,
    new_regions: Vec<RegionInfo>,
    error: Option<Error>,
}

pub struct RegionSplitter {
    client: Arc<dyn SplitClient>,
    config: SplitConfig,
}

impl RegionSplitter {
    pub fn new(client: Arc<dyn SplitClient>, config: SplitConfig) -> Self {
        Self { client, config }
    }

    /// Make every range boundary a region boundary and scatter the new
    /// regions
    pub async fn split(&self, ranges: Vec<KeyRange>) -> Result<SplitSummary> {
        if ranges.is_empty() {
            debug!("No ranges to split");
            return Ok(SplitSummary::default());
        }

        let sorted = sort_ranges(ranges)?;
        let points = collect_split_points(&sorted);
        let Some(KeyRange { start_key, end_key }) = span(&sorted) else {
            return Ok(SplitSummary::default());
        };
        let mut summary = SplitSummary {
            ranges: sorted.len(),
            split_points: points.len(),
            ..Default::default()
        };
        info!(
            "Splitting {} range(s) in [{}, {}) at {} point(s)",
            summary.ranges,
            format_key(&start_key),
            format_key(&end_key),
            summary.split_points
        );

        let mut new_regions = Vec::new();
        let mut backoff = self.config.split_retry_interval();
        let rounds = self.config.split_retry_times.max(1);
        for round in 1..=rounds {
            let regions = self.paginate_scan_regions(&start_key, &end_key).await?;
            let plan = plan_splits(&regions, &points);
            if plan.is_empty() {
                debug!("All split points are region boundaries already");
                break;
            }

            let outcome = self.split_round(plan).await;
            summary.split_regions += outcome.split_regions;
            new_regions.extend(outcome.new_regions);

            let Some(err) = outcome.error else {
                break;
            };
            if round == rounds {
                warn!("Split gave up after {} round(s): {}", rounds, err);
                return Err(err);
            }
            warn!(
                "Split round {}/{} failed, retrying in {:?}: {}",
                round, rounds, backoff, err
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.split_max_retry_interval());
        }
        summary.new_regions = new_regions.len();

        for region in &new_regions {
            if let Err(e) = self.wait_for_split(region).await {
                warn!("{}", e);
            }
        }

        let scattered = self.scatter_regions(&new_regions).await;
        summary.scattered = scattered.len();

        if self.config.wait_for_scatter && !scattered.is_empty() {
            let upper = self.config.scatter_wait_upper();
            match tokio::time::timeout(upper, self.wait_for_scatter(&scattered)).await {
                Ok(()) => info!("Scatter of {} region(s) finished", scattered.len()),
                Err(_) => warn!("Scatter still running after {:?}, moving on", upper),
            }
        }

        info!(
            "Split done: {} region(s) split, {} new, {} scattered",
            summary.split_regions, summary.new_regions, summary.scattered
        );
        Ok(summary)
    }

    /// Scan all regions of `[start_key, end_key)` page by page, retrying
    /// when the result has holes
    pub async fn paginate_scan_regions(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<Vec<RegionInfo>> {
        let attempts = self.config.scan_retry_times.max(1);
        let mut backoff = self.config.split_retry_interval();
        let mut attempt = 1;
        loop {
            let scanned = self.scan_pages(start_key, end_key).await;
            let err = match scanned {
                Ok(regions) => match check_region_consistency(start_key, end_key, &regions) {
                    Ok(()) => return Ok(regions),
                    Err(e) => e,
                },
                Err(e) => e,
            };
            if attempt >= attempts {
                return Err(err);
            }
            warn!("Scan attempt {}/{} failed: {}", attempt, attempts, err);
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.split_max_retry_interval());
            attempt += 1;
        }
    }

    async fn scan_pages(&self, start_key: &[u8], end_key: &[u8]) -> Result<Vec<RegionInfo>> {
        let limit = self.config.scan_region_batch.max(1);
        let mut regions: Vec<RegionInfo> = Vec::new();
        let mut key = start_key.to_vec();
        loop {
            let page = self.client.scan_regions(&key, end_key, limit).await?;
            let Some(last) = page.last() else {
                break;
            };
            key = last.region.end_key.clone();
            regions.extend(page);
            if key.is_empty() || (!end_key.is_empty() && key.as_slice() >= end_key) {
                break;
            }
        }
        Ok(regions)
    }

    async fn split_round(&self, plan: SplitPlan) -> RoundOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.split_concurrency.max(1)));
        let mut handles = Vec::with_capacity(plan.len());
        for (region, keys) in plan {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                client.batch_split_regions(&region, &keys).await
            }));
        }

        let mut outcome = RoundOutcome::default();
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::from(e)),
            };
            match result {
                Ok(new_regions) => {
                    outcome.split_regions += 1;
                    outcome.new_regions.extend(new_regions);
                }
                Err(e) => {
                    warn!("Batch split failed: {}", e);
                    outcome.error.get_or_insert(e);
                }
            }
        }
        outcome
    }

    /// Poll until a new region is visible to the metadata service
    async fn wait_for_split(&self, region: &RegionInfo) -> Result<()> {
        let mut interval = SPLIT_CHECK_INTERVAL;
        for _ in 0..SPLIT_CHECK_MAX_RETRY_TIMES {
            match self.client.get_region_by_id(region.id()).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => debug!("Region {} not visible yet", region.id()),
                Err(e) => debug!("Checking region {} failed: {}", region.id(), e),
            }
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(SPLIT_MAX_CHECK_INTERVAL);
        }
        Err(Error::SplitTimeout(region.id()))
    }

    /// Scatter each region; failures are logged and skipped
    async fn scatter_regions(&self, regions: &[RegionInfo]) -> Vec<RegionInfo> {
        let mut scattered = Vec::with_capacity(regions.len());
        for region in regions {
            match self.client.scatter_region(region).await {
                Ok(()) => scattered.push(region.clone()),
                Err(e) => warn!("Failed to scatter region {}: {}", region.id(), e),
            }
        }
        scattered
    }

    async fn wait_for_scatter(&self, regions: &[RegionInfo]) {
        for region in regions {
            let mut interval = SCATTER_CHECK_INTERVAL;
            loop {
                match self.client.get_operator_status(region.id()).await {
                    Ok(Some(op)) if op.is_running_scatter() => {
                        tokio::time::sleep(interval).await;
                        interval = (interval * 2).min(SCATTER_MAX_CHECK_INTERVAL);
                    }
                    Ok(_) => break,
                    Err(e) => {
                        warn!("Failed to get operator of region {}: {}", region.id(), e);
                        break;
                    }
                }
            }
        }
    }
}

/// Every non-empty range boundary, sorted and deduplicated
pub fn collect_split_points(ranges: &[KeyRange]) -> Vec<Vec<u8>> {
    let mut points: Vec<Vec<u8>> = ranges
        .iter()
        .flat_map(|r| [r.start_key.clone(), r.end_key.clone()])
        .filter(|k| !k.is_empty())
        .collect();
    points.sort();
    points.dedup();
    points
}

/// Group split points by owning region
///
/// `regions` and `points` must both be in ascending key order. Points equal
/// to a region start key are boundaries already and are skipped, as are
/// points no scanned region owns.
pub fn plan_splits(regions: &[RegionInfo], points: &[Vec<u8>]) -> SplitPlan {
    let mut plan: SplitPlan = Vec::new();
    let mut idx = 0;
    for point in points {
        while idx < regions.len() && !regions[idx].contains(point) {
            let end = &regions[idx].region.end_key;
            if end.is_empty() || point < end {
                break;
            }
            idx += 1;
        }
        let Some(region) = regions.get(idx) else {
            break;
        };
        if !region.region.contains_interior(point) {
            continue;
        }
        match plan.last_mut() {
            Some((owner, keys)) if owner.id() == region.id() => keys.push(point.clone()),
            _ => plan.push((region.clone(), vec![point.clone()])),
        }
    }
    plan
}

/// Check that `regions` cover `[start_key, end_key)` without holes
pub fn check_region_consistency(
    start_key: &[u8],
    end_key: &[u8],
    regions: &[RegionInfo],
) -> Result<()> {
    let inconsistent = |reason: String| Error::RegionsInconsistent {
        start: format_key(start_key),
        end: format_key(end_key),
        reason,
    };

    let (Some(first), Some(last)) = (regions.first(), regions.last()) else {
        return Err(inconsistent("scan returned no region".to_string()));
    };
    if first.region.start_key.as_slice() > start_key {
        return Err(inconsistent(format!(
            "first region {} starts at {}",
            first.id(),
            format_key(&first.region.start_key)
        )));
    }
    let last_end = &last.region.end_key;
    if !last_end.is_empty() && (end_key.is_empty() || last_end.as_slice() < end_key) {
        return Err(inconsistent(format!(
            "last region {} ends at {}",
            last.id(),
            format_key(last_end)
        )));
    }
    for pair in regions.windows(2) {
        if pair[0].region.end_key != pair[1].region.start_key {
            return Err(inconsistent(format!(
                "region {} ends at {} but region {} starts at {}",
                pair[0].id(),
                format_key(&pair[0].region.end_key),
                pair[1].id(),
                format_key(&pair[1].region.start_key)
            )));
        }
    }
    Ok(())
}
