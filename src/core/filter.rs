use serde::Serialize;

use crate::error::{Error, Result};
use crate::instance::InstanceKey;

/// Selects instances by server, environment and stage.
///
/// `None` in a slot matches anything; `Some(values)` matches any of the values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub servers: Option<Vec<String>>,
    pub environments: Option<Vec<String>>,
    pub stages: Option<Vec<String>>,
}

impl Filter {
    pub fn new(
        servers: Option<Vec<String>>,
        environments: Option<Vec<String>>,
        stages: Option<Vec<String>>,
    ) -> Self {
        Self {
            servers,
            environments,
            stages,
        }
    }

    /// Parse `server:environment:stage`, `*` per segment, `,` for alternatives.
    pub fn from_instance_specification(specification: &str) -> Result<Self> {
        let segments: Vec<&str> = specification.split(':').collect();
        if segments.len() != 3 {
            return Err(Error::validation_invalid_argument(
                "target",
                format!(
                    "'{}' must have the form server:environment:stage",
                    specification
                ),
                Some(specification.to_string()),
                None,
            ));
        }

        let mut slots = Vec::with_capacity(3);
        for segment in segments {
            slots.push(parse_segment(segment, specification)?);
        }

        let stages = slots.pop().flatten();
        let environments = slots.pop().flatten();
        let servers = slots.pop().flatten();

        Ok(Self {
            servers,
            environments,
            stages,
        })
    }

    pub fn matches(&self, key: &InstanceKey) -> bool {
        slot_matches(&self.servers, &key.server)
            && slot_matches(&self.environments, &key.environment)
            && slot_matches(&self.stages, &key.stage)
    }

    /// Canonical `server:environment:stage` rendering (`*` for open slots).
    pub fn describe(&self) -> String {
        format!(
            "{}:{}:{}",
            describe_slot(&self.servers),
            describe_slot(&self.environments),
            describe_slot(&self.stages)
        )
    }
}

fn parse_segment(segment: &str, specification: &str) -> Result<Option<Vec<String>>> {
    let segment = segment.trim();
    if segment == "*" {
        return Ok(None);
    }

    let values: Vec<String> = segment
        .split(',')
        .map(|value| value.trim().to_string())
        .collect();

    if values.iter().any(|value| value.is_empty()) {
        return Err(Error::validation_invalid_argument(
            "target",
            format!("'{}' contains an empty segment", specification),
            Some(specification.to_string()),
            None,
        ));
    }

    Ok(Some(values))
}

fn slot_matches(slot: &Option<Vec<String>>, value: &str) -> bool {
    match slot {
        None => true,
        Some(values) => values.iter().any(|candidate| candidate == value),
    }
}

fn describe_slot(slot: &Option<Vec<String>>) -> String {
    match slot {
        None => "*".to_string(),
        Some(values) => values.join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(server: &str, environment: &str, stage: &str) -> InstanceKey {
        InstanceKey::new(server, environment, stage)
    }

    #[test]
    fn wildcard_environment_matches_any() {
        let filter = Filter::from_instance_specification("aws:*:production").unwrap();

        assert!(filter.matches(&key("aws", "shop.com", "production")));
        assert!(filter.matches(&key("aws", "blog.com", "production")));
        assert!(!filter.matches(&key("aws", "shop.com", "staging")));
        assert!(!filter.matches(&key("azure", "shop.com", "production")));
    }

    #[test]
    fn comma_list_is_or_match() {
        let filter = Filter::from_instance_specification("aws:*:staging,production").unwrap();

        assert!(filter.matches(&key("aws", "shop.com", "staging")));
        assert!(filter.matches(&key("aws", "shop.com", "production")));
        assert!(!filter.matches(&key("aws", "shop.com", "dev")));
    }

    #[test]
    fn describe_round_trips_specification() {
        let filter = Filter::from_instance_specification("aws:*:staging,production").unwrap();
        assert_eq!(filter.describe(), "aws:*:staging,production");
        assert_eq!(Filter::default().describe(), "*:*:*");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        let err = Filter::from_instance_specification("aws:production").unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn rejects_empty_alternatives() {
        assert!(Filter::from_instance_specification("aws::production").is_err());
        assert!(Filter::from_instance_specification("aws:shop,:production").is_err());
    }
}
