use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ADDRESS_LABEL, LabelSet, TargetGroup};

/// One entry of the Prometheus `file_sd` format.
///
/// ```json
/// [
///   {
///     "targets": ["10.0.0.1:9100"],
///     "labels": {"instance": "10.0.0.1:9100"}
///   }
/// ]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileSdEntry {
    pub targets: Vec<String>,
    pub labels: LabelSet,
}

/// Flatten target groups into `file_sd` entries, one per target. Labels of
/// the target take precedence over labels of its group, targets without an
/// address are ignored.
pub fn to_file_sd(groups: &[TargetGroup]) -> Vec<FileSdEntry> {
    groups
        .iter()
        .flat_map(|group| {
            group.targets.iter().filter_map(|target| {
                let address = target.get(ADDRESS_LABEL)?;

                let mut labels = group.labels.clone();
                for (key, value) in target {
                    if key != ADDRESS_LABEL {
                        labels.insert(key.clone(), value.clone());
                    }
                }

                Some(FileSdEntry {
                    targets: vec![address.clone()],
                    labels,
                })
            })
        })
        .collect()
}

/// Writes target groups to a `file_sd` file.
///
/// Content is written to a sibling temporary file first and then renamed over
/// the destination, so readers never observe a partially written file.
pub struct FileSdWriter {
    path: PathBuf,
    temp: PathBuf,
}

impl FileSdWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp = OsString::from(path.as_os_str());
        temp.push(".tmp");

        FileSdWriter {
            path,
            temp: PathBuf::from(temp),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, groups: &[TargetGroup]) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(&to_file_sd(groups)).map_err(io::Error::other)?;

        tokio::fs::write(&self.temp, data).await?;
        tokio::fs::rename(&self.temp, &self.path).await
    }
}
