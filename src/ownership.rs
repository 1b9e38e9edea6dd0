//! Cluster ownership of cloud volumes.
//!
//! Volumes provisioned by the agent carry a cluster tag whose value is the
//! cluster UUID. Enumerations of provider volumes are filtered through
//! [`is_cluster_volume`] so volumes belonging to other tenants or other
//! clusters are never touched.

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::cloud::{BlockDeviceApi, VolumeTags};
use crate::device::{Volume, VolumeError};

/// Tag key holding the owning cluster's UUID.
pub const CLUSTER_ID_LABEL: &str = "flocker-cluster-id";

/// Tag key holding the dataset UUID the volume backs.
pub const DATASET_ID_LABEL: &str = "flocker-dataset-id";

/// Errors raised when rebuilding a volume record from provider metadata.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OwnershipError {
    /// Raised when the volume has no dataset tag.
    #[error("volume {blockdevice_id} has no flocker-dataset-id tag")]
    MissingDatasetId {
        /// Provider identifier of the volume.
        blockdevice_id: String,
    },
    /// Raised when the dataset tag is not a UUID.
    #[error("volume {blockdevice_id} has invalid flocker-dataset-id '{value}'")]
    InvalidDatasetId {
        /// Provider identifier of the volume.
        blockdevice_id: String,
        /// Offending tag value.
        value: String,
    },
    /// Raised when the provider record is not a valid volume.
    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// Provider-side view of a volume, including its tags.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudVolume {
    /// Provider identifier for the volume.
    pub blockdevice_id: String,
    /// Size reported by the provider, in bytes.
    pub size: u64,
    /// Compute instance currently holding the volume, if any.
    pub attached_to: Option<String>,
    /// Provider tags recorded on the volume.
    pub tags: VolumeTags,
}

impl CloudVolume {
    /// Rebuilds the agent's volume record from the dataset tag.
    ///
    /// # Errors
    ///
    /// Returns [`OwnershipError`] when the dataset tag is missing or invalid,
    /// or when the provider record has no identifier or a zero size.
    pub fn to_volume(&self) -> Result<Volume, OwnershipError> {
        let raw = self
            .tags
            .get(DATASET_ID_LABEL)
            .ok_or_else(|| OwnershipError::MissingDatasetId {
                blockdevice_id: self.blockdevice_id.clone(),
            })?;
        let dataset_id = Uuid::parse_str(raw).map_err(|_| OwnershipError::InvalidDatasetId {
            blockdevice_id: self.blockdevice_id.clone(),
            value: raw.clone(),
        })?;
        let volume = Volume::new(dataset_id, self.blockdevice_id.as_str(), self.size)?;
        Ok(Volume {
            attached_to: self.attached_to.clone(),
            ..volume
        })
    }
}

/// Returns `true` only when `volume` carries a cluster tag equal to
/// `cluster_id`.
///
/// Untagged and foreign volumes are skipped silently. A tag value that is not
/// a UUID is skipped with a warning, since it points at corruption or
/// interference rather than ordinary multi-tenancy.
#[must_use]
pub fn is_cluster_volume(cluster_id: Uuid, volume: &CloudVolume) -> bool {
    let Some(value) = volume.tags.get(CLUSTER_ID_LABEL) else {
        return false;
    };
    match Uuid::parse_str(value) {
        Ok(tagged) => tagged == cluster_id,
        Err(err) => {
            warn!(
                blockdevice_id = %volume.blockdevice_id,
                value = %value,
                error = %err,
                "invalid flocker-cluster-id tag on volume"
            );
            false
        }
    }
}

/// Filters an enumeration down to this cluster's volumes.
pub fn cluster_volumes<'a, I>(cluster_id: Uuid, volumes: I) -> impl Iterator<Item = &'a CloudVolume>
where
    I: IntoIterator<Item = &'a CloudVolume>,
{
    volumes
        .into_iter()
        .filter(move |volume| is_cluster_volume(cluster_id, volume))
}

/// Tags to record on a volume provisioned for `dataset_id` in this cluster.
#[must_use]
pub fn cluster_tags(cluster_id: Uuid, dataset_id: Uuid) -> VolumeTags {
    VolumeTags::from([
        (CLUSTER_ID_LABEL.to_owned(), cluster_id.to_string()),
        (DATASET_ID_LABEL.to_owned(), dataset_id.to_string()),
    ])
}

/// Looks up the tags of `blockdevice_id` and returns the volume when it
/// belongs to `cluster_id`.
///
/// # Errors
///
/// Returns the provider error when the tag lookup fails.
pub async fn fetch_cluster_volume<A: BlockDeviceApi>(
    api: &A,
    cluster_id: Uuid,
    blockdevice_id: &str,
    size: u64,
    attached_to: Option<String>,
) -> Result<Option<CloudVolume>, A::Error> {
    let tags = api.list_tags(blockdevice_id).await?;
    let volume = CloudVolume {
        blockdevice_id: blockdevice_id.to_owned(),
        size,
        attached_to,
        tags,
    };
    Ok(is_cluster_volume(cluster_id, &volume).then_some(volume))
}
