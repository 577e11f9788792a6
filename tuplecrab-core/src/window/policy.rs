use super::*;

/// When a sliding window hands its contents to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// After every insertion.
    OnInsert,
    /// On a fixed period, starting one period after the partition's first
    /// insertion.
    Every(Duration),
}

/// Insertion, eviction and trigger rules of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Keeps at most `count` tuples and/or tuples younger than `age`.
    Sliding {
        count: Option<usize>,
        age: Option<Duration>,
        trigger: Trigger,
    },
    /// Collects `n` tuples, processes them and starts over.
    CountBatch(usize),
    /// Collects for a period starting at the first insertion, processes the
    /// batch and starts over.
    TimeBatch(Duration),
}

impl WindowPolicy {
    /// The last `n` tuples, processed on every insertion.
    pub fn last_count(n: usize) -> Self {
        WindowPolicy::Sliding {
            count: Some(n),
            age: None,
            trigger: Trigger::OnInsert,
        }
    }

    /// Tuples inserted within the last `age`, processed on every insertion
    /// and whenever tuples age out.
    pub fn last_time(age: Duration) -> Self {
        WindowPolicy::Sliding {
            count: None,
            age: Some(age),
            trigger: Trigger::OnInsert,
        }
    }

    /// The last `n` tuples, processed every `period`.
    pub fn last_count_every(n: usize, period: Duration) -> Self {
        WindowPolicy::Sliding {
            count: Some(n),
            age: None,
            trigger: Trigger::Every(period),
        }
    }

    /// Tuples inserted within the last `age`, processed every `period`.
    pub fn last_time_every(age: Duration, period: Duration) -> Self {
        WindowPolicy::Sliding {
            count: None,
            age: Some(age),
            trigger: Trigger::Every(period),
        }
    }

    pub fn batch_count(n: usize) -> Self {
        WindowPolicy::CountBatch(n)
    }

    pub fn batch_time(period: Duration) -> Self {
        WindowPolicy::TimeBatch(period)
    }

    /// Whether the policy reads the clock or sets timers.
    pub fn requires_scheduler(&self) -> bool {
        match self {
            WindowPolicy::Sliding { age, trigger, .. } => {
                age.is_some() || matches!(trigger, Trigger::Every(_))
            }
            WindowPolicy::CountBatch(_) => false,
            WindowPolicy::TimeBatch(_) => true,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), WindowError> {
        let positive = |d: &Duration| {
            if d.is_zero() {
                Err(WindowError::ZeroDuration)
            } else {
                Ok(())
            }
        };
        match self {
            WindowPolicy::Sliding {
                count,
                age,
                trigger,
            } => {
                if count.is_none() && age.is_none() {
                    return Err(WindowError::Unbounded);
                }
                if *count == Some(0) {
                    return Err(WindowError::ZeroCount);
                }
                if let Some(age) = age {
                    positive(age)?;
                }
                if let Trigger::Every(period) = trigger {
                    positive(period)?;
                }
                Ok(())
            }
            WindowPolicy::CountBatch(0) => Err(WindowError::ZeroCount),
            WindowPolicy::CountBatch(_) => Ok(()),
            WindowPolicy::TimeBatch(period) => positive(period),
        }
    }
}

/// A policy plus the choice of whether an empty partition is still handed
/// to the processor when its trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub policy: WindowPolicy,
    pub fire_empty: bool,
}

impl WindowConfig {
    pub fn new(policy: WindowPolicy, fire_empty: bool) -> Self {
        Self { policy, fire_empty }
    }
}
