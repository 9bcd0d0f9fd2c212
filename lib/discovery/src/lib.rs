mod file_sd;
mod run;

use std::collections::BTreeMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use file_sd::{FileSdEntry, FileSdWriter, to_file_sd};
pub use run::run;

#[macro_use]
extern crate tracing;

/// The label holding the `host:port` a target can be scraped at.
pub const ADDRESS_LABEL: &str = "__address__";
/// The label identifying the instance a target belongs to.
pub const INSTANCE_LABEL: &str = "instance";

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// LabelSet is a set of labels describing a single target. Iteration is
/// always ordered by label name.
pub type LabelSet = BTreeMap<String, String>;

/// TargetGroup is a set of targets with a common tags
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TargetGroup {
    /// `targets` is a list of targets identified by a label set. Each target
    /// is uniquely identifiable in the group by its `address` label
    pub targets: Vec<LabelSet>,

    /// `labels` is a set of labels that is common across all targets in the group
    pub labels: LabelSet,

    /// An identifier that describes a group of targets, consumers replace
    /// previously received groups with the same source.
    pub source: String,
}

impl TargetGroup {
    pub fn new(source: impl Into<String>, targets: Vec<LabelSet>) -> Self {
        TargetGroup {
            targets,
            labels: LabelSet::new(),
            source: source.into(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Discoverer provides information about target groups.
///
/// `Discoverer` does not know if an actual change happened. Every call of
/// `refresh` rebuilds the full view, and the caller is expected to replace
/// whatever it received before.
#[async_trait::async_trait]
pub trait Discoverer: Send + Sync {
    /// Build the current target groups. The implementation must stop as soon
    /// as `cancel` fires, and return an error instead of partial results.
    async fn refresh(&self, cancel: &CancellationToken) -> Result<Vec<TargetGroup>, Error>;
}
