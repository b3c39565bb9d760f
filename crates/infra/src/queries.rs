//! Read-side ride queries.
//!
//! Simple scan/filter work over [`StorageClient`]. Vertical is `liftID × 10`
//! metres per ride.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::instrument;

use liftride_core::StorageItem;

use crate::store::{StorageClient, StoreError};

/// Per-day totals for one skier in one season.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    #[serde(rename = "dayID")]
    pub day_id: String,
    pub vertical: u64,
    /// Lift IDs ridden, in ride-time order.
    pub lifts: Vec<u32>,
}

/// Total vertical for a skier across everything stored.
#[instrument(skip(store), err)]
pub fn skier_vertical_total<S>(store: &S, skier_id: &str) -> Result<u64, StoreError>
where
    S: StorageClient + ?Sized,
{
    Ok(store.query_skier(skier_id)?.iter().map(StorageItem::vertical).sum())
}

/// Vertical for a skier at one resort on one season day.
#[instrument(skip(store), err)]
pub fn skier_day_vertical<S>(
    store: &S,
    resort_id: &str,
    season_id: &str,
    day_id: &str,
    skier_id: &str,
) -> Result<u64, StoreError>
where
    S: StorageClient + ?Sized,
{
    Ok(store
        .query_skier(skier_id)?
        .iter()
        .filter(|i| i.resort_id == resort_id && i.season_id() == season_id && i.day_id() == day_id)
        .map(StorageItem::vertical)
        .sum())
}

/// Distinct skiers seen at a resort on one season day.
#[instrument(skip(store), err)]
pub fn resort_unique_skiers<S>(
    store: &S,
    resort_id: &str,
    season_id: &str,
    day_id: &str,
) -> Result<usize, StoreError>
where
    S: StorageClient + ?Sized,
{
    let skiers: BTreeSet<String> = store
        .scan_resort(resort_id, season_id, day_id)?
        .into_iter()
        .map(|i| i.skier_id)
        .collect();
    Ok(skiers.len())
}

/// Number of distinct days a skier rode in `season_id`.
pub fn skier_days_in_season<S>(store: &S, skier_id: &str, season_id: &str) -> Result<usize, StoreError>
where
    S: StorageClient + ?Sized,
{
    Ok(skier_season_summary(store, skier_id, season_id)?.len())
}

/// Vertical per day for a skier in `season_id`.
pub fn skier_vertical_by_day<S>(
    store: &S,
    skier_id: &str,
    season_id: &str,
) -> Result<BTreeMap<String, u64>, StoreError>
where
    S: StorageClient + ?Sized,
{
    Ok(skier_season_summary(store, skier_id, season_id)?
        .into_iter()
        .map(|d| (d.day_id, d.vertical))
        .collect())
}

/// Lifts ridden per day for a skier in `season_id`, in ride-time order.
pub fn skier_lifts_by_day<S>(
    store: &S,
    skier_id: &str,
    season_id: &str,
) -> Result<BTreeMap<String, Vec<u32>>, StoreError>
where
    S: StorageClient + ?Sized,
{
    Ok(skier_season_summary(store, skier_id, season_id)?
        .into_iter()
        .map(|d| (d.day_id, d.lifts))
        .collect())
}

/// One [`DaySummary`] per day the skier rode in `season_id`, ordered by day.
#[instrument(skip(store), err)]
pub fn skier_season_summary<S>(
    store: &S,
    skier_id: &str,
    season_id: &str,
) -> Result<Vec<DaySummary>, StoreError>
where
    S: StorageClient + ?Sized,
{
    let mut rides: Vec<StorageItem> = store
        .query_skier(skier_id)?
        .into_iter()
        .filter(|i| i.season_id() == season_id)
        .collect();
    rides.sort_by_key(|i| i.lift_info.time);

    let mut days: BTreeMap<String, DaySummary> = BTreeMap::new();
    for ride in &rides {
        let day = days.entry(ride.day_id().to_string()).or_insert_with(|| DaySummary {
            day_id: ride.day_id().to_string(),
            ..DaySummary::default()
        });
        day.vertical += ride.vertical();
        day.lifts.push(ride.lift_info.lift_id);
    }
    Ok(days.into_values().collect())
}
