//! Diff engine: compares a freshly extracted record batch against the
//! stored entity snapshot for a watch.
//!
//! Everything in this module is pure and synchronous; persistence of the
//! outcome belongs to the event emitter. A single watch's batch is diffed
//! as one ordered unit because identity-collision tie-breaking depends on
//! extraction order.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{Entity, EntityStatus, FieldChange, Record};

/// Derive the stable external id for a record.
///
/// Hashes the trimmed string form of each identity field value in the
/// configured order, NUL-joined, and keeps the first 16 bytes of the
/// SHA-256 as 32 hex chars. The same identity values always produce the
/// same id, across processes and releases: this is the sole diff
/// correlation key.
///
/// Returns None when every identity value is missing or blank; such
/// records carry no usable identity and are dropped by the caller.
pub fn external_id(record: &Record, identity_fields: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(identity_fields.len());
    let mut any_present = false;

    for field in identity_fields {
        let part = match record.get(field) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(value) => value.to_string(),
        };
        if !part.is_empty() {
            any_present = true;
        }
        parts.push(part);
    }

    if !any_present {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(parts.join("\x00").as_bytes());
    let hash = hasher.finalize();
    Some(hex::encode(&hash[..16]))
}

/// Result of keying one extraction batch by external id.
#[derive(Debug, Default)]
pub struct KeyedBatch {
    /// (external id, record) pairs in extraction order, deduplicated.
    pub records: Vec<(String, Record)>,
    /// Records dropped for missing identity.
    pub dropped: u32,
    /// Records dropped because a later record claimed the same id.
    pub collisions: u32,
}

/// Key an extraction batch by external id.
///
/// Records without a resolvable identity are dropped and counted (a Data
/// error, not fatal). When two records in the batch collide on the same
/// id, the last one in extraction order wins and earlier ones are
/// counted; never both.
pub fn key_batch(records: Vec<Record>, identity_fields: &[String]) -> KeyedBatch {
    let mut batch = KeyedBatch::default();
    let mut index_of: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(eid) = external_id(&record, identity_fields) else {
            batch.dropped += 1;
            continue;
        };

        if let Some(&idx) = index_of.get(&eid) {
            batch.records[idx].1 = record;
            batch.collisions += 1;
        } else {
            index_of.insert(eid.clone(), batch.records.len());
            batch.records.push((eid, record));
        }
    }

    batch
}

/// One diff outcome for a single entity.
#[derive(Debug, Clone)]
pub struct EntityDiff {
    pub external_id: String,
    pub content: Record,
    /// Field-level changes; only populated for changed entities.
    pub changes: Vec<FieldChange>,
}

/// Complete result of comparing an extraction batch against the snapshot.
///
/// The three event-producing sets are disjoint by construction; unchanged
/// entities get only a last_seen_at refresh.
#[derive(Debug, Default)]
pub struct DiffResult {
    pub appeared: Vec<EntityDiff>,
    pub changed: Vec<EntityDiff>,
    /// External ids of still-active entities missing from the batch.
    pub disappeared: Vec<String>,
    /// External ids present and identical; refresh last_seen_at only.
    pub unchanged: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.changed.is_empty() && self.disappeared.is_empty()
    }
}

/// Compare a keyed extraction batch against the stored snapshot.
///
/// A stored entity in `removed` status that shows up again is reported as
/// appeared (reactivation), not as changed: the soft-deleted row gets
/// revived by the emitter. Entities already `removed` and still absent
/// produce nothing.
pub fn diff(stored: &[Entity], batch: &KeyedBatch) -> DiffResult {
    let mut result = DiffResult::default();
    let stored_by_id: HashMap<&str, &Entity> = stored
        .iter()
        .map(|e| (e.external_id.as_str(), e))
        .collect();

    for (eid, record) in &batch.records {
        match stored_by_id.get(eid.as_str()) {
            None => result.appeared.push(EntityDiff {
                external_id: eid.clone(),
                content: record.clone(),
                changes: Vec::new(),
            }),
            Some(entity) if entity.status == EntityStatus::Removed => {
                result.appeared.push(EntityDiff {
                    external_id: eid.clone(),
                    content: record.clone(),
                    changes: Vec::new(),
                });
            }
            Some(entity) => {
                let changes = diff_fields(&entity.content, record);
                if changes.is_empty() {
                    result.unchanged.push(eid.clone());
                } else {
                    result.changed.push(EntityDiff {
                        external_id: eid.clone(),
                        content: record.clone(),
                        changes,
                    });
                }
            }
        }
    }

    let extracted_ids: HashMap<&str, ()> = batch
        .records
        .iter()
        .map(|(eid, _)| (eid.as_str(), ()))
        .collect();

    for entity in stored {
        if entity.status == EntityStatus::Active
            && !extracted_ids.contains_key(entity.external_id.as_str())
        {
            result.disappeared.push(entity.external_id.clone());
        }
    }

    result
}

/// Field-by-field comparison; both added and removed fields are changes.
fn diff_fields(old: &Record, new: &Record) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (field, new_value) in new {
        match old.get(field) {
            None => changes.push(FieldChange {
                field: field.clone(),
                old: serde_json::Value::Null,
                new: new_value.clone(),
            }),
            Some(old_value) if !values_equal(old_value, new_value) => {
                changes.push(FieldChange {
                    field: field.clone(),
                    old: old_value.clone(),
                    new: new_value.clone(),
                })
            }
            Some(_) => {}
        }
    }

    for (field, old_value) in old {
        if !new.contains_key(field) {
            changes.push(FieldChange {
                field: field.clone(),
                old: old_value.clone(),
                new: serde_json::Value::Null,
            });
        }
    }

    changes
}

/// Value equality for diffing: strings compare trimmed, numbers compare
/// numerically across integer/float JSON forms, everything else by strict
/// JSON equality.
fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (a, b) {
        (Value::String(a), Value::String(b)) => a.trim() == b.trim(),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(pairs: serde_json::Value) -> Record {
        pairs.as_object().unwrap().clone()
    }

    fn entity(eid: &str, status: EntityStatus, content: serde_json::Value) -> Entity {
        let now = Utc::now();
        Entity {
            id: format!("row-{eid}"),
            org_id: "default".into(),
            watch_id: "watch-1".into(),
            schema_type: "product".into(),
            external_id: eid.into(),
            content: record(content),
            status,
            first_seen_at: now,
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_external_id_is_stable_and_order_sensitive() {
        let fields = vec!["sku".to_string(), "store".to_string()];
        let a = record(json!({"sku": "A-1", "store": "north", "price": 10}));
        let b = record(json!({"price": 99, "store": "north", "sku": "A-1"}));

        // Same identity values, same id, regardless of other fields or
        // record layout.
        assert_eq!(external_id(&a, &fields), external_id(&b, &fields));

        // Configured field order participates in the hash.
        let swapped = vec!["store".to_string(), "sku".to_string()];
        assert_ne!(external_id(&a, &fields), external_id(&a, &swapped));

        // Whitespace around values does not change identity.
        let padded = record(json!({"sku": "  A-1 ", "store": "north"}));
        assert_eq!(external_id(&a, &fields), external_id(&padded, &fields));
    }

    #[test]
    fn test_external_id_unresolvable_when_all_parts_blank() {
        let fields = vec!["sku".to_string()];
        assert!(external_id(&record(json!({"name": "x"})), &fields).is_none());
        assert!(external_id(&record(json!({"sku": "  "})), &fields).is_none());
        assert!(external_id(&record(json!({"sku": null})), &fields).is_none());
        // Partial identity still resolves.
        let fields = vec!["sku".to_string(), "store".to_string()];
        assert!(external_id(&record(json!({"sku": "A"})), &fields).is_some());
    }

    #[test]
    fn test_key_batch_last_wins_on_collision() {
        let fields = vec!["sku".to_string()];
        let batch = key_batch(
            vec![
                record(json!({"sku": "A", "price": 1})),
                record(json!({"name": "no identity"})),
                record(json!({"sku": "A", "price": 2})),
            ],
            &fields,
        );

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.dropped, 1);
        assert_eq!(batch.collisions, 1);
        assert_eq!(batch.records[0].1["price"], json!(2));
    }

    #[test]
    fn test_diff_partitions_are_disjoint() {
        let fields = vec!["id".to_string()];
        let stored = vec![
            entity("a", EntityStatus::Active, json!({"id": "a", "price": 10})),
            entity("b", EntityStatus::Active, json!({"id": "b", "price": 5})),
        ];
        let batch = key_batch(
            vec![
                record(json!({"id": "a", "price": 8})),
                record(json!({"id": "c", "price": 3})),
            ],
            &fields,
        );
        // External ids in the batch are hashes; rebuild keyed by hash.
        let id_a = external_id(&record(json!({"id": "a"})), &fields).unwrap();

        let result = diff(&stored_with_hashed_ids(&stored, &fields), &batch);
        assert_eq!(result.appeared.len(), 1);
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.disappeared.len(), 1);
        assert_eq!(result.changed[0].external_id, id_a);
        assert_eq!(
            result.changed[0].changes,
            vec![FieldChange {
                field: "price".into(),
                old: json!(10),
                new: json!(8),
            }]
        );
    }

    // Stored fixtures above carry literal external ids; rewrite them with
    // the hash of their id field so they correlate with keyed batches.
    fn stored_with_hashed_ids(stored: &[Entity], fields: &[String]) -> Vec<Entity> {
        stored
            .iter()
            .map(|e| {
                let mut e = e.clone();
                e.external_id = external_id(&e.content, fields).unwrap();
                e
            })
            .collect()
    }

    #[test]
    fn test_diff_is_idempotent() {
        let fields = vec!["id".to_string()];
        let batch = key_batch(
            vec![
                record(json!({"id": "a", "price": 8})),
                record(json!({"id": "b", "price": 5})),
            ],
            &fields,
        );

        // Apply the first diff result to build the updated snapshot.
        let first = diff(&[], &batch);
        assert_eq!(first.appeared.len(), 2);

        let snapshot: Vec<Entity> = first
            .appeared
            .iter()
            .map(|d| {
                let mut e = entity(&d.external_id, EntityStatus::Active, json!({}));
                e.content = d.content.clone();
                e
            })
            .collect();

        // Same input against the updated snapshot: nothing to report.
        let second = diff(&snapshot, &batch);
        assert!(second.is_empty());
        assert_eq!(second.unchanged.len(), 2);
    }

    #[test]
    fn test_reappearance_is_appeared_not_changed() {
        let fields = vec!["id".to_string()];
        let batch = key_batch(vec![record(json!({"id": "b", "price": 7}))], &fields);
        let mut removed = entity("b", EntityStatus::Removed, json!({"id": "b", "price": 5}));
        removed.external_id =
            external_id(&record(json!({"id": "b"})), &fields).unwrap();

        let result = diff(&[removed], &batch);
        assert_eq!(result.appeared.len(), 1);
        assert!(result.changed.is_empty());
        assert!(result.disappeared.is_empty());
    }

    #[test]
    fn test_removed_and_still_absent_produces_nothing() {
        let fields = vec!["id".to_string()];
        let mut removed = entity("b", EntityStatus::Removed, json!({"id": "b"}));
        let eid = external_id(&removed.content, &fields).unwrap();
        removed.external_id = eid;

        let result = diff(&[removed], &key_batch(vec![], &fields));
        assert!(result.is_empty());
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_field_diff_covers_added_and_removed_fields() {
        let old = record(json!({"price": 10, "stock": "yes"}));
        let new = record(json!({"price": 10.0, "rating": 4}));
        let mut changes = diff_fields(&old, &new);
        changes.sort_by(|a, b| a.field.cmp(&b.field));

        // price 10 vs 10.0 compares numerically equal.
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "rating");
        assert_eq!(changes[0].old, json!(null));
        assert_eq!(changes[1].field, "stock");
        assert_eq!(changes[1].new, json!(null));
    }
}
