use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When an iterator stops spawning further iterations.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IterationCondition {
    /// A single iteration
    #[default]
    Once,
    /// Exactly `n` completed iterations
    RepeatCount(u32),
    /// Keep iterating until the budget from the iterator's start has passed.
    /// At least one iteration always runs.
    #[serde(rename = "for_seconds", with = "seconds")]
    ForDuration(Duration),
}

impl IterationCondition {
    /// Whether another iteration should start after `completed` iterations
    /// and `elapsed` time
    pub fn should_continue(&self, completed: u32, elapsed: Duration) -> bool {
        match self {
            IterationCondition::Once => completed < 1,
            IterationCondition::RepeatCount(n) => completed < *n,
            IterationCondition::ForDuration(budget) => completed == 0 || elapsed < *budget,
        }
    }

    /// Number of iterations known up front, if any
    pub fn planned_iterations(&self) -> Option<u32> {
        match self {
            IterationCondition::Once => Some(1),
            IterationCondition::RepeatCount(n) => Some(*n),
            IterationCondition::ForDuration(_) => None,
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_count() {
        let condition = IterationCondition::RepeatCount(3);
        assert!(condition.should_continue(0, Duration::ZERO));
        assert!(condition.should_continue(2, Duration::ZERO));
        assert!(!condition.should_continue(3, Duration::ZERO));
        assert_eq!(condition.planned_iterations(), Some(3));
    }

    #[test]
    fn test_duration_runs_at_least_once() {
        let condition = IterationCondition::ForDuration(Duration::from_secs(1));
        assert!(condition.should_continue(0, Duration::from_secs(5)));
        assert!(condition.should_continue(4, Duration::from_millis(500)));
        assert!(!condition.should_continue(1, Duration::from_secs(2)));
    }

    #[test]
    fn test_condition_serde() {
        let parsed: IterationCondition = serde_json::from_str(r#"{"for_seconds": 1.5}"#).unwrap();
        assert_eq!(
            parsed,
            IterationCondition::ForDuration(Duration::from_millis(1500))
        );

        let parsed: IterationCondition = serde_json::from_str(r#"{"repeat_count": 4}"#).unwrap();
        assert_eq!(parsed, IterationCondition::RepeatCount(4));

        let parsed: IterationCondition = serde_json::from_str(r#""once""#).unwrap();
        assert_eq!(parsed, IterationCondition::Once);
    }
}
