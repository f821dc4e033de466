//! Storage provisioning: matches mount requirements to block devices,
//! formats and mounts what is missing.
//!
//! A pass is idempotent. Anything already mounted at its target is left
//! alone, so re-running against a provisioned node issues no mkfs or mount.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info};

use crate::application::ports::StorageHost;
use crate::domain::block_device::{BlockDevice, device_names, find_device};
use crate::domain::config::MountSpec;
use crate::domain::error::ProvisionError;

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// What a provisioning pass did for one mount requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAction {
    /// A filesystem was created and mounted.
    Created,
    /// The target was already mounted; nothing was changed.
    AlreadyMounted,
}

/// Per-requirement result of [`provision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOutcome {
    /// Resolved (home-expanded) mountpoint.
    pub mountpoint: String,
    /// Name of the device or partition that backs it.
    pub device: String,
    pub action: MountAction,
}

/// Which device of a tree satisfies a requirement, and whether work is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    AlreadyMounted(&'a BlockDevice),
    Format(&'a BlockDevice),
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Picks the device within `device` that satisfies `spec` at `mountpoint`.
///
/// Without children the device itself is the candidate, subject to the same
/// size floor as a partition. With children every
/// descendant is scanned depth-first: one already mounted at `mountpoint`
/// wins, otherwise the first unmounted, unclaimed leaf of at least
/// `spec.min_size_gb` GiB is chosen.
///
/// # Errors
///
/// Returns [`ProvisionError::NoValidPartitionFound`] when nothing qualifies.
pub fn select_partition<'a>(
    host: &str,
    device: &'a BlockDevice,
    spec: &MountSpec,
    mountpoint: &str,
    claimed: &HashSet<String>,
) -> Result<Selection<'a>, ProvisionError> {
    let no_valid = || ProvisionError::NoValidPartitionFound {
        host: host.to_string(),
        mount: spec.clone(),
        snapshot: device.clone(),
    };

    if !device.has_children() {
        return match device.mountpoint.as_deref() {
            None if device.size_gb() >= spec.min_size_gb => Ok(Selection::Format(device)),
            None => Err(no_valid()),
            Some(mp) if mp == mountpoint => Ok(Selection::AlreadyMounted(device)),
            Some(_) => Err(no_valid()),
        };
    }

    let partitions = device.descendants();
    if let Some(mounted) = partitions.iter().find(|p| p.is_mounted_at(mountpoint)) {
        return Ok(Selection::AlreadyMounted(mounted));
    }
    partitions
        .into_iter()
        .find(|p| {
            !p.has_children()
                && !p.is_mounted()
                && p.size_gb() >= spec.min_size_gb
                && !claimed.contains(&p.name)
        })
        .map(Selection::Format)
        .ok_or_else(no_valid)
}

// ── Provisioning pass ─────────────────────────────────────────────────────────

/// Satisfy every requirement in `specs`, in order.
///
/// The device tree is re-queried for each requirement, so mounts made earlier
/// in the pass are visible to later ones.
///
/// # Errors
///
/// Returns a [`ProvisionError`] for the first requirement that cannot be met,
/// or the underlying error of a failed remote command.
pub async fn provision<H: StorageHost>(host: &H, specs: &[MountSpec]) -> Result<Vec<MountOutcome>> {
    let mut claimed = HashSet::new();
    let mut outcomes = Vec::with_capacity(specs.len());

    for spec in specs {
        let devices = host.list_block_devices().await?;
        let Some(device) = find_device(&devices, &spec.device_name) else {
            return Err(ProvisionError::BlockDeviceNotFound {
                host: host.host().to_string(),
                device: spec.device_name.clone(),
                available: device_names(&devices),
            }
            .into());
        };

        let mountpoint = host.resolve_path(&spec.mountpoint);
        host.make_directory(&mountpoint).await?;
        host.change_owner(&mountpoint).await?;

        let outcome = match select_partition(host.host(), device, spec, &mountpoint, &claimed)? {
            Selection::AlreadyMounted(dev) => {
                debug!(host = host.host(), device = %dev.name, %mountpoint, "already mounted");
                MountOutcome {
                    mountpoint,
                    device: dev.name.clone(),
                    action: MountAction::AlreadyMounted,
                }
            }
            Selection::Format(dev) => {
                let path = dev.path();
                host.make_filesystem(&path).await?;
                host.mount(&path, &mountpoint).await?;
                info!(
                    host = host.host(),
                    device = %dev.name,
                    size_gb = dev.size_gb(),
                    %mountpoint,
                    "mounted"
                );
                claimed.insert(dev.name.clone());
                MountOutcome {
                    mountpoint,
                    device: dev.name.clone(),
                    action: MountAction::Created,
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}
