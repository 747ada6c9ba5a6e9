use crate::models::Override;

/// Priority is positional: every override takes its index as both priority and original priority.
pub fn reindex(mut overrides: Vec<Override>) -> Vec<Override> {
    for (index, o) in overrides.iter_mut().enumerate() {
        o.original_priority = index;
        o.priority = index;
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FlagValue;

    fn override_with_priority(segment: i64, priority: usize) -> Override {
        Override {
            id: Some(segment * 10),
            segment,
            segment_name: format!("segment-{segment}"),
            priority,
            original_priority: 7,
            enabled: false,
            value: FlagValue::Null,
            multivariate_options: vec![],
            is_feature_specific: false,
            uuid: None,
            to_remove: false,
        }
    }

    #[test]
    fn test_priorities_follow_position() {
        let overrides = vec![
            override_with_priority(3, 5),
            override_with_priority(1, 0),
            override_with_priority(2, 0),
        ];

        let reindexed = reindex(overrides);

        let segments: Vec<i64> = reindexed.iter().map(|o| o.segment).collect();
        let priorities: Vec<(usize, usize)> = reindexed
            .iter()
            .map(|o| (o.priority, o.original_priority))
            .collect();
        assert_eq!(segments, vec![3, 1, 2]);
        assert_eq!(priorities, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_reindexing_twice_is_stable() {
        let overrides = vec![override_with_priority(1, 9), override_with_priority(2, 4)];

        let once = reindex(overrides);
        let twice = reindex(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_list() {
        assert!(reindex(vec![]).is_empty());
    }
}
