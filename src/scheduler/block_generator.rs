use chrono::{DateTime, Utc};
use rand::Rng;

use crate::catalog::{Asset, CatalogStore, StopSet};
use crate::error::TomatoResult;

/// One resolved position in a generated block: the rotator that was in
/// this slot, and the Asset picked for it (`None` if the rotator's pool was
/// already exhausted by an earlier slot in the same block — §4.3 step 3c).
#[derive(Debug, Clone)]
pub struct BlockSlot {
    pub rotator_id: i64,
    pub asset: Option<Asset>,
}

#[derive(Debug, Clone)]
pub struct GeneratedBlock {
    pub stopset: StopSet,
    pub slots: Vec<BlockSlot>,
}

impl GeneratedBlock {
    /// A block is "dry" when every slot resolved to no asset — the whole
    /// point of the retry loop in §4.3 step 3f is to skip these.
    pub fn is_dry(&self) -> bool {
        self.slots.iter().all(|s| s.asset.is_none())
    }

    pub fn played_count(&self) -> usize {
        self.slots.iter().filter(|s| s.asset.is_some()).count()
    }
}

/// Weighted-random pick by `random.choices`-style cumulative weight, matching
/// `generate_asset_block`'s use of `random.choices(items, weights=...)`.
fn weighted_pick<T>(items: &[T], weight_of: impl Fn(&T) -> f64, rng: &mut impl Rng) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let total: f64 = items.iter().map(&weight_of).sum();
    if total <= 0.0 {
        return Some(rng.gen_range(0..items.len()));
    }
    let mut target = rng.gen_range(0.0..total);
    for (i, item) in items.iter().enumerate() {
        let w = weight_of(item);
        if target < w {
            return Some(i);
        }
        target -= w;
    }
    Some(items.len() - 1)
}

/// Generates the next playable block (§4.3). Retries with a shrinking
/// candidate set when the picked StopSet turns out dry (step 3f), matching
/// the spec's "detects it dry, retries" behavior (scenario 2) and
/// terminating once every eligible StopSet has been tried.
pub async fn generate_next_block(
    store: &CatalogStore,
    at: DateTime<Utc>,
    rng: &mut impl Rng,
) -> TomatoResult<Option<GeneratedBlock>> {
    // §4.3 rule 1: a StopSet with zero slots is never selected.
    let mut candidates = Vec::new();
    for stopset in store.currently_enabled_stopsets(at).await? {
        let slots = store.ordered_slots(stopset.id).await?;
        if !slots.is_empty() {
            candidates.push((stopset, slots));
        }
    }
    if candidates.is_empty() {
        return Ok(None);
    }

    // §4.3 step 3f: a dry StopSet is removed from `S` before retrying, so
    // the set of candidates shrinks monotonically — a non-dry block is
    // always eventually found if one exists among them, with no wasted
    // re-draws of a StopSet already known to be dry.
    let mut last = None;
    while !candidates.is_empty() {
        let Some(idx) = weighted_pick(&candidates, |(s, _)| s.weight, rng) else {
            break;
        };
        let (stopset, slots) = &candidates[idx];
        let block = generate_block_for_stopset(store, stopset, slots, at, rng).await?;

        if !block.is_dry() {
            return Ok(Some(block));
        }
        candidates.remove(idx);
        last = Some(block);
    }

    Ok(last)
}

/// Builds one block for a specific StopSet (§4.3 steps 3a-3e): enumerate
/// ordered slots, build one asset pool per distinct rotator, then for each
/// slot in order pick a weighted-random asset and remove it from every pool
/// it appears in (so the same asset can't play twice in one block even if
/// it's shared across rotators).
async fn generate_block_for_stopset(
    store: &CatalogStore,
    stopset: &StopSet,
    ordered: &[crate::catalog::RotatorSlot],
    at: DateTime<Utc>,
    rng: &mut impl Rng,
) -> TomatoResult<GeneratedBlock> {
    let rotator_ids: Vec<i64> = ordered.iter().map(|s| s.rotator_id).collect();

    let mut pools = std::collections::HashMap::new();
    for &rotator_id in &rotator_ids {
        if pools.contains_key(&rotator_id) {
            continue;
        }
        let assets = store.currently_enabled_assets_for_rotator(rotator_id, at).await?;
        pools.insert(rotator_id, assets);
    }

    let mut slots = Vec::with_capacity(rotator_ids.len());
    for rotator_id in rotator_ids {
        let picked = {
            let pool = pools.get(&rotator_id).expect("pool created above for every rotator id");
            weighted_pick(pool, |a| a.weight, rng).map(|i| pool[i].clone())
        };

        if let Some(asset) = &picked {
            for pool in pools.values_mut() {
                pool.retain(|a| a.id != asset.id);
            }
        }

        slots.push(BlockSlot { rotator_id, asset: picked });
    }

    Ok(GeneratedBlock { stopset: stopset.clone(), slots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        models::{AudioFile, Eligibility},
        ExportSnapshot, Rotator, RotatorColor, RotatorSlot, StationConfig,
    };
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn asset(id: i64, weight: f64, rotator_id: i64) -> Asset {
        Asset {
            id,
            name: format!("asset-{id}"),
            duration_ms: 10_000,
            audio: AudioFile { relative_path: format!("assets/{id}.mp3"), audio_size: 10 },
            eligibility: Eligibility { enabled: true, begin: None, end: None },
            weight,
            rotator_ids: vec![rotator_id],
        }
    }

    async fn seeded_store(snapshot: &ExportSnapshot) -> CatalogStore {
        let store = CatalogStore::open_in_memory().await.unwrap();
        store.apply_snapshot(snapshot).await.unwrap();
        store
    }

    #[tokio::test]
    async fn block_ordering_matches_slot_order_and_dedups_within_block() {
        let snapshot = ExportSnapshot {
            conf: StationConfig::default(),
            media_url: "https://station.example/media/".to_string(),
            assets: vec![asset(1, 1.0, 10), asset(2, 1.0, 11), asset(3, 1.0, 11)],
            rotators: vec![
                Rotator { id: 10, name: "IDs".to_string(), color: RotatorColor::Red },
                Rotator { id: 11, name: "Ads".to_string(), color: RotatorColor::Blue },
            ],
            stopsets: vec![StopSet {
                id: 100,
                name: "S1".to_string(),
                eligibility: Eligibility { enabled: true, begin: None, end: None },
                weight: 1.0,
            }],
            slots: vec![
                RotatorSlot { id: 1, stopset_id: 100, rotator_id: 10, position: 0 },
                RotatorSlot { id: 2, stopset_id: 100, rotator_id: 11, position: 1 },
                RotatorSlot { id: 3, stopset_id: 100, rotator_id: 11, position: 2 },
                RotatorSlot { id: 4, stopset_id: 100, rotator_id: 10, position: 3 },
            ],
        };
        let store = seeded_store(&snapshot).await;

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let block = generate_next_block(&store, now(), &mut rng).await.unwrap().unwrap();

        let rotator_order: Vec<i64> = block.slots.iter().map(|s| s.rotator_id).collect();
        assert_eq!(rotator_order, vec![10, 11, 11, 10]);

        assert_eq!(block.slots[0].asset.as_ref().unwrap().id, 1);
        assert!(block.slots[3].asset.is_none());

        let played_ids: Vec<i64> = block.slots.iter().filter_map(|s| s.asset.as_ref()).map(|a| a.id).collect();
        let mut unique = played_ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(played_ids.len(), unique.len());
    }

    #[tokio::test]
    async fn dry_stopset_is_skipped_in_favor_of_another() {
        let snapshot = ExportSnapshot {
            conf: StationConfig::default(),
            media_url: "https://station.example/media/".to_string(),
            assets: vec![asset(1, 1.0, 20)],
            rotators: vec![
                Rotator { id: 10, name: "Empty".to_string(), color: RotatorColor::Red },
                Rotator { id: 20, name: "Has assets".to_string(), color: RotatorColor::Blue },
            ],
            stopsets: vec![
                StopSet {
                    id: 1,
                    name: "S1 (dry)".to_string(),
                    eligibility: Eligibility { enabled: true, begin: None, end: None },
                    weight: 1.0,
                },
                StopSet {
                    id: 2,
                    name: "S2".to_string(),
                    eligibility: Eligibility { enabled: true, begin: None, end: None },
                    weight: 1.0,
                },
            ],
            slots: vec![
                RotatorSlot { id: 1, stopset_id: 1, rotator_id: 10, position: 0 },
                RotatorSlot { id: 2, stopset_id: 2, rotator_id: 20, position: 0 },
            ],
        };
        let store = seeded_store(&snapshot).await;

        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let block = generate_next_block(&store, now(), &mut rng).await.unwrap().unwrap();
        assert!(!block.is_dry());
        assert_eq!(block.stopset.id, 2);
    }

    /// A dry StopSet overwhelmingly more likely to be drawn must still lose
    /// to a non-dry one — the retry loop must remove a dry StopSet from the
    /// candidate set rather than relying on probability to eventually draw
    /// something else (§4.3 step 3f).
    #[tokio::test]
    async fn heavily_weighted_dry_stopset_never_wins_over_a_non_dry_one() {
        let snapshot = ExportSnapshot {
            conf: StationConfig::default(),
            media_url: "https://station.example/media/".to_string(),
            assets: vec![asset(1, 1.0, 20)],
            rotators: vec![
                Rotator { id: 10, name: "Empty".to_string(), color: RotatorColor::Red },
                Rotator { id: 20, name: "Has assets".to_string(), color: RotatorColor::Blue },
            ],
            stopsets: vec![
                StopSet {
                    id: 1,
                    name: "S1 (dry, heavily weighted)".to_string(),
                    eligibility: Eligibility { enabled: true, begin: None, end: None },
                    weight: 100.0,
                },
                StopSet {
                    id: 2,
                    name: "S2".to_string(),
                    eligibility: Eligibility { enabled: true, begin: None, end: None },
                    weight: 0.01,
                },
            ],
            slots: vec![
                RotatorSlot { id: 1, stopset_id: 1, rotator_id: 10, position: 0 },
                RotatorSlot { id: 2, stopset_id: 2, rotator_id: 20, position: 0 },
            ],
        };
        let store = seeded_store(&snapshot).await;

        for seed in 0..50 {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let block = generate_next_block(&store, now(), &mut rng).await.unwrap().unwrap();
            assert!(!block.is_dry());
            assert_eq!(block.stopset.id, 2);
        }
    }
}
