//! Block devices as reported by `lsblk`, and the queries run against them.
//!
//! Sizes are converted to bytes exactly once, here at the parse boundary.
//! Everything downstream compares `size_bytes` / [`BlockDevice::size_gb`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Command that produces the structured device tree parsed by [`parse_lsblk`].
pub const LSBLK_ARGV: &[&str] = &["lsblk", "-b", "--json", "-o", "NAME,SIZE,MOUNTPOINT,TYPE"];

const GIB: u64 = 1024 * 1024 * 1024;

/// A disk, partition or other block device, with its nested children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    pub name: String,
    pub size_bytes: u64,
    pub mountpoint: Option<String>,
    /// lsblk `TYPE` column (`disk`, `part`, `lvm`, ...), when reported.
    pub kind: Option<String>,
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Whole GiB of capacity, rounded down.
    #[must_use]
    pub fn size_gb(&self) -> u64 {
        self.size_bytes / GIB
    }

    /// Device node path, e.g. `/dev/sdb1`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some()
    }

    #[must_use]
    pub fn is_mounted_at(&self, mountpoint: &str) -> bool {
        self.mountpoint.as_deref() == Some(mountpoint)
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Every nested device below this one, depth-first in listed order.
    #[must_use]
    pub fn descendants(&self) -> Vec<&BlockDevice> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child);
            out.extend(child.descendants());
        }
        out
    }

    /// This device or the first descendant mounted at `mountpoint`.
    #[must_use]
    pub fn find_mountpoint(&self, mountpoint: &str) -> Option<&BlockDevice> {
        if self.is_mounted_at(mountpoint) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_mountpoint(mountpoint))
    }
}

/// Top-level device named `name`.
#[must_use]
pub fn find_device<'a>(devices: &'a [BlockDevice], name: &str) -> Option<&'a BlockDevice> {
    devices.iter().find(|d| d.name == name)
}

/// First device or partition, at any depth, mounted at `mountpoint`.
#[must_use]
pub fn find_mountpoint<'a>(devices: &'a [BlockDevice], mountpoint: &str) -> Option<&'a BlockDevice> {
    devices.iter().find_map(|d| d.find_mountpoint(mountpoint))
}

/// Names of the top-level devices, for diagnostics.
#[must_use]
pub fn device_names(devices: &[BlockDevice]) -> Vec<String> {
    devices.iter().map(|d| d.name.clone()).collect()
}

// ── lsblk parsing ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<RawDevice>,
}

#[derive(Deserialize)]
struct RawDevice {
    name: String,
    #[serde(default)]
    size: Option<RawSize>,
    #[serde(default)]
    mountpoint: Option<String>,
    /// util-linux >= 2.37 reports every mountpoint of a device.
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    children: Vec<RawDevice>,
}

/// Older lsblk versions emit every JSON value as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

impl RawDevice {
    fn into_device(self) -> Result<BlockDevice> {
        let size_bytes = match self.size {
            None => 0,
            Some(RawSize::Bytes(b)) => b,
            Some(RawSize::Text(t)) => {
                parse_size(&t).with_context(|| format!("size of block device {}", self.name))?
            }
        };
        let mountpoint = self
            .mountpoint
            .or_else(|| self.mountpoints.into_iter().flatten().next());
        let children = self
            .children
            .into_iter()
            .map(RawDevice::into_device)
            .collect::<Result<Vec<_>>>()?;
        Ok(BlockDevice {
            name: self.name,
            size_bytes,
            mountpoint,
            kind: self.kind,
            children,
        })
    }
}

/// Parses `lsblk --json` output into a device tree.
///
/// # Errors
///
/// Returns an error if the output is not lsblk JSON or a size is unparseable.
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput = serde_json::from_str(json).context("parsing lsblk output")?;
    output
        .blockdevices
        .into_iter()
        .map(RawDevice::into_device)
        .collect()
}

/// Converts an lsblk size string to bytes.
///
/// Accepts plain byte counts (`"1000204886016"`) and binary human-readable
/// sizes (`"931.5G"`, `"512M"`, `"4K"`, `"1.8T"`).
///
/// # Errors
///
/// Returns an error if the string is neither.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    if let Ok(bytes) = text.parse::<u64>() {
        return Ok(bytes);
    }
    let Some(suffix) = text.chars().last() else {
        anyhow::bail!("empty size string");
    };
    let number = &text[..text.len() - suffix.len_utf8()];
    let multiplier: u64 = match suffix.to_ascii_uppercase() {
        'B' => 1,
        'K' => 1 << 10,
        'M' => 1 << 20,
        'G' => 1 << 30,
        'T' => 1 << 40,
        'P' => 1 << 50,
        _ => anyhow::bail!("cannot parse size string {text:?}"),
    };
    let value: f64 = number
        .trim()
        .replace(',', ".")
        .parse()
        .with_context(|| format!("cannot parse size string {text:?}"))?;
    anyhow::ensure!(value >= 0.0, "negative size string {text:?}");
    Ok((value * multiplier as f64).round() as u64)
}
