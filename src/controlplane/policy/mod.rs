//! Policy Engine
//!
//! Splits a profile's tags into the synchronous set (features the selected
//! backend must satisfy at provisioning time) and the asynchronous set
//! (operations scheduled over the resource's lifecycle), then compiles the
//! asynchronous set into a [`Workflow`] of executors.
//!
//! The classification table is fixed at build time:
//!
//! | tag                    | class     | lifecycle |
//! |------------------------|-----------|-----------|
//! | `iops`                 | feature   | create    |
//! | `thinProvision`        | feature   | create    |
//! | `highAvailability`     | feature   | create    |
//! | `intervalSnapshot`     | operation | create    |
//! | `deleteSnapshotPolicy` | operation | delete    |

pub mod executors;
pub mod workflow;

pub use executors::{DeleteSnapshotPolicyExecutor, Executor, ExecutorContext, IntervalSnapshotExecutor};
pub use workflow::Workflow;

use crate::config::parse_duration;
use crate::domain::model::{LifecycleStage, TagMap};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TAG_IOPS: &str = "iops";
pub const TAG_THIN_PROVISION: &str = "thinProvision";
pub const TAG_HIGH_AVAILABILITY: &str = "highAvailability";
pub const TAG_INTERVAL_SNAPSHOT: &str = "intervalSnapshot";
pub const TAG_DELETE_SNAPSHOT_POLICY: &str = "deleteSnapshotPolicy";

// =============================================================================
// Classification Table
// =============================================================================

/// Class of a profile tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagClass {
    /// Placement constraint evaluated against pools
    Feature,
    /// Action scheduled over the resource lifecycle
    Operation,
}

impl std::fmt::Display for TagClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagClass::Feature => write!(f, "feature"),
            TagClass::Operation => write!(f, "operation"),
        }
    }
}

/// Declared class and lifecycle of a recognized tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSpec {
    pub name: &'static str,
    pub class: TagClass,
    pub lifecycle: LifecycleStage,
}

pub const TAG_TABLE: &[TagSpec] = &[
    TagSpec {
        name: TAG_IOPS,
        class: TagClass::Feature,
        lifecycle: LifecycleStage::Create,
    },
    TagSpec {
        name: TAG_THIN_PROVISION,
        class: TagClass::Feature,
        lifecycle: LifecycleStage::Create,
    },
    TagSpec {
        name: TAG_HIGH_AVAILABILITY,
        class: TagClass::Feature,
        lifecycle: LifecycleStage::Create,
    },
    TagSpec {
        name: TAG_INTERVAL_SNAPSHOT,
        class: TagClass::Operation,
        lifecycle: LifecycleStage::Create,
    },
    TagSpec {
        name: TAG_DELETE_SNAPSHOT_POLICY,
        class: TagClass::Operation,
        lifecycle: LifecycleStage::Delete,
    },
];

/// Look up a tag in the classification table
pub fn tag_spec(name: &str) -> Option<&'static TagSpec> {
    TAG_TABLE.iter().find(|spec| spec.name == name)
}

/// Whether a `deleteSnapshotPolicy` value asks for snapshots to be drained
pub fn delete_snapshot_policy_enabled(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "retain" | "none"
    )
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry budget for workflow executors and polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(3),
        }
    }
}

// =============================================================================
// Policy Engine
// =============================================================================

/// Result of classifying a tag map for one lifecycle stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    /// Features the backend must satisfy
    pub sync: TagMap,
    /// Operations to schedule
    pub asynchronous: TagMap,
}

impl Classified {
    pub fn is_empty(&self) -> bool {
        self.sync.is_empty() && self.asynchronous.is_empty()
    }
}

/// Stateless tag classifier and workflow compiler
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    retry: RetryPolicy,
}

impl PolicyEngine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Reject unknown tags and malformed operation values
    pub fn validate(&self, tags: &TagMap) -> Result<()> {
        for (name, value) in tags {
            if tag_spec(name).is_none() {
                return Err(Error::UnsupportedTag { tag: name.clone() });
            }
            if name == TAG_INTERVAL_SNAPSHOT {
                let interval = parse_duration(value)?;
                if interval.as_secs() == 0 {
                    return Err(Error::Validation(format!(
                        "{} must be at least one second",
                        TAG_INTERVAL_SNAPSHOT
                    )));
                }
            }
        }
        Ok(())
    }

    /// Partition `tags` into synchronous and asynchronous sets for `stage`
    ///
    /// Tags declared for another stage are dropped. Any unknown tag fails
    /// the whole classification.
    pub fn classify(&self, tags: &TagMap, stage: LifecycleStage) -> Result<Classified> {
        let mut classified = Classified::default();
        for (name, value) in tags {
            let spec = tag_spec(name).ok_or_else(|| Error::UnsupportedTag { tag: name.clone() })?;
            if spec.lifecycle != stage {
                continue;
            }
            let target = match spec.class {
                TagClass::Feature => &mut classified.sync,
                TagClass::Operation => &mut classified.asynchronous,
            };
            target.insert(name.clone(), value.clone());
        }
        Ok(classified)
    }

    /// Build and initialize the executors for an asynchronous tag set
    ///
    /// Executors run in tag-name order.
    pub async fn compile(
        &self,
        label: impl Into<String>,
        asynchronous: &TagMap,
        base: &ExecutorContext,
    ) -> Result<Workflow> {
        let mut steps: Vec<Box<dyn Executor>> = Vec::with_capacity(asynchronous.len());
        for (name, value) in asynchronous {
            let mut executor: Box<dyn Executor> = match name.as_str() {
                TAG_DELETE_SNAPSHOT_POLICY => Box::new(DeleteSnapshotPolicyExecutor::default()),
                TAG_INTERVAL_SNAPSHOT => Box::new(IntervalSnapshotExecutor::default()),
                other => return Err(Error::UnsupportedTag { tag: other.to_string() }),
            };
            executor.init(&base.with_tag_value(value)).await?;
            steps.push(executor);
        }
        Ok(Workflow::new(label, self.retry, steps))
    }
}
