//! Unpacking downloaded assets into the cache

use crate::error::AssetError;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use vigil_proto::Asset;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Lowercase hex sha256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Kind of payload, detected from its leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// gzip-compressed tar
    TarGz,
    /// uncompressed tar
    Tar,
    /// a single file, installed as an executable
    Binary,
}

/// Detect the payload format by magic number
pub fn detect_format(data: &[u8]) -> Format {
    if data.starts_with(&GZIP_MAGIC) {
        Format::TarGz
    } else if data.len() > TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &data[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        Format::Tar
    } else {
        Format::Binary
    }
}

/// Unpack a verified asset body into `deps_dir/<hash>`
///
/// The body is staged in a temporary directory next to the target and
/// renamed into place, so the target either does not exist or is
/// complete. Losing the rename to a concurrent installer counts as success.
pub fn stage(deps_dir: &Path, asset: &Asset, data: &[u8]) -> Result<(), AssetError> {
    fs::create_dir_all(deps_dir).map_err(|e| AssetError::io(deps_dir, e))?;
    let target = deps_dir.join(&asset.hash);

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(deps_dir)
        .map_err(|e| AssetError::io(deps_dir, e))?;

    unpack(staging.path(), asset, data)?;

    match fs::rename(staging.path(), &target) {
        Ok(()) => {
            debug!("Installed asset {} into {}", asset.name, target.display());
            Ok(())
        }
        Err(_) if target.is_dir() => {
            debug!("Asset {} was installed concurrently", asset.name);
            Ok(())
        }
        Err(e) => Err(AssetError::io(&target, e)),
    }
}

fn unpack(dir: &Path, asset: &Asset, data: &[u8]) -> Result<(), AssetError> {
    match detect_format(data) {
        Format::TarGz => unpack_tar(dir, asset, GzDecoder::new(Cursor::new(data))),
        Format::Tar => unpack_tar(dir, asset, Cursor::new(data)),
        Format::Binary => install_binary(dir, asset, data),
    }
}

fn unpack_tar<R: Read>(dir: &Path, asset: &Asset, reader: R) -> Result<(), AssetError> {
    let extract_error = |reason: String| AssetError::Extract {
        name: asset.name.clone(),
        reason,
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let entries = archive.entries().map_err(|e| extract_error(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| extract_error(e.to_string()))?;
        let path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let unpacked = entry.unpack_in(dir).map_err(|e| extract_error(format!("{}: {}", path, e)))?;
        if !unpacked {
            return Err(extract_error(format!("entry {} escapes the asset directory", path)));
        }
    }
    Ok(())
}

fn install_binary(dir: &Path, asset: &Asset, data: &[u8]) -> Result<(), AssetError> {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).map_err(|e| AssetError::io(&bin, e))?;
    let path = bin.join(file_name(asset));
    fs::write(&path, data).map_err(|e| AssetError::io(&path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(|e| AssetError::io(&path, e))?;
    }
    Ok(())
}

/// Last path segment of the asset URL, falling back to the asset name
fn file_name(asset: &Asset) -> String {
    let without_query = asset.url.split(['?', '#']).next().unwrap_or_default();
    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != ".." && !segment.contains('\\'))
        .unwrap_or(asset.name.as_str())
        .to_string()
}
