//! Optional on-disk geometry override, loaded once at startup.
//!
//! A flash image file carries no on-flash description of its own PEB
//! size or header offsets (that is exactly what attach has to
//! reconstruct from content, not read from a superblock) - so the CLI
//! needs geometry from somewhere external. Rather than pile on a
//! dozen `--peb-size`-style flags, any field the TOML file sets
//! overrides `DeviceGeometry::default()`; the rest keep their default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use ubiattach_core::DeviceGeometry;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeometryOverride {
    peb_size: Option<u32>,
    min_io_size: Option<u32>,
    vid_hdr_offset: Option<u32>,
    data_offset: Option<u32>,
    max_user_volumes: Option<i32>,
    internal_vol_start: Option<i32>,
    layout_vol_id: Option<i32>,
    fm_max_start: Option<u32>,
    fastmap_sb_vol_id: Option<i32>,
    backup_vol_id: Option<i32>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ubiattach").join("geometry.toml"))
}

/// Loads `DeviceGeometry`, applying overrides from `explicit_path` if
/// given, else the default config path if it exists, else the
/// built-in default untouched.
pub fn load_geometry(explicit_path: Option<&Path>) -> Result<DeviceGeometry> {
    let path = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };

    let Some(path) = path else {
        return Ok(DeviceGeometry::default());
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading geometry config {}", path.display()))?;
    let over: GeometryOverride = toml::from_str(&text)
        .with_context(|| format!("parsing geometry config {}", path.display()))?;

    let mut geo = DeviceGeometry::default();
    if let Some(v) = over.peb_size {
        geo.peb_size = v;
    }
    if let Some(v) = over.min_io_size {
        geo.min_io_size = v;
    }
    if let Some(v) = over.vid_hdr_offset {
        geo.vid_hdr_offset = v;
    }
    if let Some(v) = over.data_offset {
        geo.data_offset = v;
    }
    if let Some(v) = over.max_user_volumes {
        geo.max_user_volumes = v;
    }
    if let Some(v) = over.internal_vol_start {
        geo.internal_vol_start = v;
    }
    if let Some(v) = over.layout_vol_id {
        geo.layout_vol_id = v;
    }
    if let Some(v) = over.fm_max_start {
        geo.fm_max_start = v;
    }
    if let Some(v) = over.fastmap_sb_vol_id {
        geo.fastmap_sb_vol_id = v;
    }
    if let Some(v) = over.backup_vol_id {
        geo.backup_vol_id = v;
    }
    Ok(geo)
}
