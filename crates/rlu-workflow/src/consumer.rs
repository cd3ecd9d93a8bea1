use rlu_core::ResourceId;
use rlu_store::{ConsumerStore, ConsumerUpdate};

/// Pushes `update` to every consumer copy of `resource_id`.
///
/// Best-effort: failures are logged and never returned. Returns the number
/// of copies updated.
pub fn propagate(consumers: &dyn ConsumerStore, resource_id: &ResourceId, update: &ConsumerUpdate) -> usize {
    if update.is_empty() {
        return 0;
    }
    let keys = match consumers.scan_by_resource_id(resource_id) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(resource_id = %resource_id, error = %e, "consumer store scan failed; skipping propagation");
            return 0;
        }
    };
    let mut updated = 0;
    for key in keys {
        match consumers.update(&key, update) {
            Ok(()) => updated += 1,
            Err(e) => tracing::warn!(
                resource_id = %resource_id,
                owner_id = %key.owner_id,
                error = %e,
                "consumer store update failed"
            ),
        }
    }
    tracing::debug!(resource_id = %resource_id, updated, "propagated to consumer store");
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlu_core::ConsumerStatus;
    use rlu_store::{ConsumerEntry, InMemoryConsumerStore};

    #[test]
    fn updates_every_owner_copy() {
        let store = InMemoryConsumerStore::new();
        let id = ResourceId::from_str("mcp-1");
        store.put(&id, ConsumerEntry { owner_id: "alice".into(), ..Default::default() });
        store.put(&id, ConsumerEntry { owner_id: "bob".into(), ..Default::default() });
        let n = propagate(&store, &id, &ConsumerUpdate::status(ConsumerStatus::Inactive));
        assert_eq!(n, 2);
        assert!(store.entries_for(&id).iter().all(|e| e.status == Some(ConsumerStatus::Inactive)));
    }

    #[test]
    fn failures_are_swallowed() {
        let store = InMemoryConsumerStore::new();
        let id = ResourceId::from_str("mcp-1");
        store.put(&id, ConsumerEntry { owner_id: "alice".into(), ..Default::default() });
        store.fail();
        assert_eq!(propagate(&store, &id, &ConsumerUpdate::status(ConsumerStatus::Active)), 0);
    }
}
