use super::*;

/// What a partition should do after its policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Keep accumulating.
    Continue,
    /// Hand a copy of the contents to the processor; keep the contents.
    Fire,
    /// Hand the contents to the processor and empty the partition.
    FireAndPurge,
}

/// Apply `policy` to a partition that just received a tuple. Eviction
/// happens here; the caller acts on the returned result.
pub(crate) fn on_insert<T: Tuple>(
    policy: &WindowPolicy,
    partition: &mut Partition<T>,
    now: EventTime,
) -> TriggerResult {
    match *policy {
        WindowPolicy::Sliding {
            count,
            age,
            trigger,
        } => {
            if let Some(n) = count {
                partition.evict_to_count(n);
            }
            if let Some(age) = age {
                partition.evict_older(age, now);
            }
            match trigger {
                Trigger::OnInsert => TriggerResult::Fire,
                Trigger::Every(_) => TriggerResult::Continue,
            }
        }
        WindowPolicy::CountBatch(n) if partition.tuples.len() >= n => TriggerResult::FireAndPurge,
        WindowPolicy::CountBatch(_) | WindowPolicy::TimeBatch(_) => TriggerResult::Continue,
    }
}

/// Apply `policy` to a partition whose timer fired.
pub(crate) fn on_timer<T: Tuple>(
    policy: &WindowPolicy,
    partition: &mut Partition<T>,
    now: EventTime,
) -> TriggerResult {
    match *policy {
        WindowPolicy::Sliding { age, trigger, .. } => {
            let evicted = age.map_or(0, |age| partition.evict_older(age, now));
            match trigger {
                Trigger::Every(_) => TriggerResult::Fire,
                Trigger::OnInsert if evicted > 0 => TriggerResult::Fire,
                Trigger::OnInsert => TriggerResult::Continue,
            }
        }
        WindowPolicy::TimeBatch(_) => TriggerResult::FireAndPurge,
        WindowPolicy::CountBatch(_) => TriggerResult::Continue,
    }
}
