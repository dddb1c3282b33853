use models::{AttrId, EavRecord, PersistentRecord, RowKey};
use std::collections::BTreeMap;

/// Records grouped by the tier that produced them.
pub type TierRecords = BTreeMap<String, Vec<PersistentRecord>>;

/// Authority rank of a tier name; lower ranks win ties.
pub fn tier_priority(tier: &str) -> u8 {
    match tier {
        "hot" => 0,
        "warm" => 1,
        "cold" => 2,
        _ => 3,
    }
}

/// Rank used for tie-breaks. With `prefer_hot` the freshest tier wins;
/// without it the ordering inverts toward the stable tiers. Unknown tier
/// names always rank last and fall back to their lexical name.
fn authority(tier: &str, prefer_hot: bool) -> u8 {
    let priority = tier_priority(tier);
    if prefer_hot || priority == 3 {
        priority
    } else {
        2 - priority
    }
}

struct Candidate {
    rank: u8,
    tier: String,
    record: PersistentRecord,
}

/// Whether `challenger` beats `incumbent`: highest `updated_at` first,
/// then a tombstone beats a live record, then tier authority, then the
/// lexical tier name. A full tie keeps the incumbent.
fn beats(challenger: &Candidate, incumbent: &Candidate) -> bool {
    if challenger.record.updated_at != incumbent.record.updated_at {
        return challenger.record.updated_at > incumbent.record.updated_at;
    }
    match (
        challenger.record.is_deleted(),
        incumbent.record.is_deleted(),
    ) {
        (true, false) => return true,
        (false, true) => return false,
        _ => {}
    }
    if challenger.rank != incumbent.rank {
        return challenger.rank < incumbent.rank;
    }
    challenger.tier < incumbent.tier
}

/// Merge per-tier result sets with last-write-wins semantics.
///
/// The row-level winner supplies the record; `other_attributes` are
/// deduplicated across all sources of the same key by
/// `(attr_id, array_indices)` under the same winning rule, emitted in
/// stable sorted order. Output is ordered by `(schema_id, row_id)`.
pub fn merge_by_tier(inputs: TierRecords, prefer_hot: bool) -> Vec<PersistentRecord> {
    let mut grouped: BTreeMap<RowKey, Vec<Candidate>> = BTreeMap::new();
    for (tier, records) in inputs {
        let rank = authority(&tier, prefer_hot);
        for record in records {
            grouped.entry(record.key()).or_default().push(Candidate {
                rank,
                tier: tier.clone(),
                record,
            });
        }
    }

    grouped
        .into_values()
        .map(|candidates| {
            let mut attrs: BTreeMap<(AttrId, String), (usize, EavRecord)> = BTreeMap::new();
            let mut winner: usize = 0;
            for (i, candidate) in candidates.iter().enumerate() {
                if i > 0 && beats(candidate, &candidates[winner]) {
                    winner = i;
                }
                for row in &candidate.record.other_attributes {
                    let key = (row.attr_id, row.array_indices.clone());
                    let replace = match attrs.get(&key) {
                        Some((held, _)) => beats(candidate, &candidates[*held]),
                        None => true,
                    };
                    if replace {
                        attrs.insert(key, (i, row.clone()));
                    }
                }
            }

            let mut merged = candidates[winner].record.clone();
            merged.other_attributes = attrs
                .into_values()
                .map(|(_, mut row)| {
                    row.schema_id = merged.schema_id;
                    row.row_id = merged.row_id;
                    row
                })
                .collect();
            merged
        })
        .collect()
}
