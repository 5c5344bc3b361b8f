//! Observation range scheduler.
//!
//! Carves newly ingested observations into fixed-size blocks and records them
//! as pending in the Block Ledger. Blocks of one kind never overlap and are
//! contiguous from the lowest unclaimed id: each run starts at or above the
//! highest `end_id` already recorded.

use chrono::Utc;
use oa_common::{BlockRange, Error, MeasureType, Result};
use oa_store::{ObservationStore, StoreError};
use tracing::{debug, info, warn};

/// Split ascending ids into full runs of `batch`.
///
/// A run covers `[first_id, first_id_of_next_run)`. The last full run ends at
/// the first id of the trailing partial run when one exists, or at
/// `last_id + 1` otherwise. Trailing ids that do not fill a run are left out.
pub fn plan_ranges(ids: &[i64], batch: usize) -> Vec<BlockRange> {
    if batch == 0 {
        return Vec::new();
    }
    let full = ids.len() / batch;
    let mut ranges = Vec::with_capacity(full);
    for i in 0..full {
        let start = ids[i * batch];
        let next = (i + 1) * batch;
        let end = match ids.get(next) {
            Some(&next_start) => next_start,
            None => ids[next - 1] + 1,
        };
        if let Ok(range) = BlockRange::new(start, end) {
            ranges.push(range);
        }
    }
    ranges
}

/// Schedule every full run of `batch` unclaimed observations of `kind`.
///
/// Reading the high-water mark, scanning ids and inserting the new blocks all
/// happen in one IMMEDIATE transaction. Losing a race against another
/// scheduler is reported as a warning and an empty result.
pub fn schedule_blocks(
    store: &mut ObservationStore,
    kind: MeasureType,
    batch: u32,
) -> Result<Vec<BlockRange>> {
    if batch == 0 {
        return Err(Error::InvalidArgument(
            "schedule batch must be greater than zero".into(),
        ));
    }

    let now = Utc::now();
    let result = store.with_immediate_tx(|tx| {
        let high_water = tx.max_end_id(kind)?;
        let ids = tx.ids_from(kind, high_water)?;
        let ranges = plan_ranges(&ids, batch as usize);
        debug!(
            measure_type = %kind,
            high_water,
            unclaimed = ids.len(),
            blocks = ranges.len(),
            "Planned blocks"
        );
        for range in &ranges {
            tx.insert_block(kind, *range, now)?;
        }
        Ok(ranges)
    });

    match result {
        Ok(ranges) => {
            if !ranges.is_empty() {
                info!(
                    measure_type = %kind,
                    blocks = ranges.len(),
                    first = ranges[0].start_id,
                    last = ranges[ranges.len() - 1].end_id,
                    "Scheduled blocks"
                );
            }
            Ok(ranges)
        }
        Err(StoreError::Conflict {
            measure_type,
            start_id,
        }) => {
            warn!(
                measure_type = %measure_type,
                start_id,
                "Another scheduler claimed this range first; nothing scheduled"
            );
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
