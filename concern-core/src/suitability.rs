//! Rules deciding whether a read or write concern may serve as a cluster-wide default.

use serde::{Deserialize, Serialize};

use crate::{
    ConfigError, ReadConcern, ReadConcernLevel, ValidationError, WriteAcknowledgment,
    WriteConcern,
};

/// Allow-list of read concern levels usable as defaults.
///
/// Levels that need per-request context (`snapshot`, `linearizable`) are left
/// out of the default list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuitabilityPolicy {
    pub allowed_read_concern_levels: Vec<ReadConcernLevel>,
}

impl Default for SuitabilityPolicy {
    fn default() -> Self {
        Self {
            allowed_read_concern_levels: vec![
                ReadConcernLevel::Local,
                ReadConcernLevel::Majority,
                ReadConcernLevel::Available,
            ],
        }
    }
}

impl SuitabilityPolicy {
    pub fn new(allowed_read_concern_levels: Vec<ReadConcernLevel>) -> Self {
        Self {
            allowed_read_concern_levels,
        }
    }

    pub fn is_suitable_read_concern_level(&self, level: ReadConcernLevel) -> bool {
        self.allowed_read_concern_levels.contains(&level)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_read_concern_levels.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "allowed_read_concern_levels".to_string(),
                value: "[]".to_string(),
                reason: "at least one read concern level must be allowed".to_string(),
            });
        }
        Ok(())
    }
}

/// A candidate that can be checked before being installed as a default.
pub trait SuitableAsDefault {
    fn check_suitability(&self, policy: &SuitabilityPolicy) -> Result<(), ValidationError>;
}

impl SuitableAsDefault for ReadConcern {
    fn check_suitability(&self, policy: &SuitabilityPolicy) -> Result<(), ValidationError> {
        if !policy.is_suitable_read_concern_level(self.level) {
            return Err(ValidationError::UnsuitableReadConcernLevel {
                level: self.level.to_string(),
            });
        }
        if self.after_cluster_time.is_some() {
            return Err(ValidationError::UnsuitableReadConcernArgument {
                argument: "afterClusterTime".to_string(),
            });
        }
        if self.at_cluster_time.is_some() {
            return Err(ValidationError::UnsuitableReadConcernArgument {
                argument: "atClusterTime".to_string(),
            });
        }
        Ok(())
    }
}

impl SuitableAsDefault for WriteConcern {
    fn check_suitability(&self, _policy: &SuitabilityPolicy) -> Result<(), ValidationError> {
        match &self.w {
            None => Err(ValidationError::MissingAcknowledgment),
            Some(WriteAcknowledgment::Nodes(0)) => Err(ValidationError::UnacknowledgedWriteConcern),
            Some(WriteAcknowledgment::Tag(tag)) if tag.trim().is_empty() => {
                Err(ValidationError::InvalidAcknowledgment {
                    reason: "tag name must not be empty".to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }
}
