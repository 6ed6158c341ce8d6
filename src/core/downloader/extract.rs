use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use xz2::read::XzDecoder;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::source::SourceMethod;

/// Unpacks `archive` into `staging` with the strategy selected by `method`.
/// `staging` is recreated from scratch. Malformed input surfaces as
/// `LauncherError::CorruptArchive`.
pub fn extract_archive(method: SourceMethod, archive: &Path, staging: &Path) -> LauncherResult<()> {
    if staging.exists() {
        std::fs::remove_dir_all(staging).map_err(|e| LauncherError::io(staging, e))?;
    }
    std::fs::create_dir_all(staging).map_err(|e| LauncherError::io(staging, e))?;

    debug!("Extracting {:?} ({}) into {:?}", archive, method, staging);
    match method {
        SourceMethod::Zip => extract_zip(archive, staging),
        SourceMethod::TarXz => extract_tar_xz(archive, staging),
    }
}

fn extract_zip(archive: &Path, staging: &Path) -> LauncherResult<()> {
    let file = File::open(archive).map_err(|e| LauncherError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| corrupt(archive, e))?;

    for index in 0..zip.len() {
        let mut zipped = zip.by_index(index).map_err(|e| corrupt(archive, e))?;
        let Some(rel_path) = zipped.enclosed_name() else {
            warn!("Skipping unsafe zip entry {:?} in {:?}", zipped.name(), archive);
            continue;
        };

        let out_path = staging.join(rel_path);
        if zipped.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
        }

        let mut out = File::create(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
        io::copy(&mut zipped, &mut out).map_err(|e| classify_io(archive, &out_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = zipped.unix_mode() {
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|e| LauncherError::io(&out_path, e))?;
            }
        }
    }

    Ok(())
}

fn extract_tar_xz(archive: &Path, staging: &Path) -> LauncherResult<()> {
    let file = File::open(archive).map_err(|e| LauncherError::io(archive, e))?;
    let mut tar = tar::Archive::new(XzDecoder::new(file));
    tar.set_preserve_permissions(true);

    let mut unpacked = 0usize;
    for entry in tar.entries().map_err(|e| corrupt(archive, e))? {
        let mut entry = entry.map_err(|e| corrupt(archive, e))?;
        entry
            .unpack_in(staging)
            .map_err(|e| classify_io(archive, staging, e))?;
        unpacked += 1;
    }

    if unpacked == 0 {
        return Err(LauncherError::CorruptArchive {
            path: archive.to_path_buf(),
            reason: "archive contains no entries".into(),
        });
    }
    Ok(())
}

/// Moves the unpacked contents of `staging` to `install`.
///
/// When the archive had a single top-level directory, that directory
/// becomes the install root; otherwise the staging root itself does.
pub fn promote_staging(staging: &Path, install: &Path) -> LauncherResult<()> {
    let source = single_root_dir(staging)?.unwrap_or_else(|| staging.to_path_buf());

    if install.exists() {
        std::fs::remove_dir_all(install).map_err(|e| LauncherError::io(install, e))?;
    }
    if let Some(parent) = install.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
    }

    move_dir(&source, install)?;

    if staging.exists() {
        std::fs::remove_dir_all(staging).map_err(|e| LauncherError::io(staging, e))?;
    }
    debug!("Promoted {:?} -> {:?}", source, install);
    Ok(())
}

fn single_root_dir(staging: &Path) -> LauncherResult<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(staging)
        .map_err(|e| LauncherError::io(staging, e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path());

    match (entries.next(), entries.next()) {
        (Some(only), None) if only.is_dir() => Ok(Some(only)),
        _ => Ok(None),
    }
}

/// Renames `source` to `destination`, falling back to copy + delete when the
/// two are on different filesystems.
pub fn move_dir(source: &Path, destination: &Path) -> LauncherResult<()> {
    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(
                "rename {:?} -> {:?} failed ({}), copying instead",
                source, destination, err
            );
            copy_dir_recursive(source, destination)?;
            std::fs::remove_dir_all(source).map_err(|e| LauncherError::io(source, e))
        }
    }
}

pub fn copy_dir_recursive(source: &Path, destination: &Path) -> LauncherResult<()> {
    std::fs::create_dir_all(destination).map_err(|e| LauncherError::io(destination, e))?;

    for entry in std::fs::read_dir(source).map_err(|e| LauncherError::io(source, e))? {
        let entry = entry.map_err(|e| LauncherError::io(source, e))?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| LauncherError::io(&src_path, e))?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path).map_err(|e| LauncherError::io(&dst_path, e))?;
        }
    }

    Ok(())
}

fn corrupt(archive: &Path, reason: impl std::fmt::Display) -> LauncherError {
    LauncherError::CorruptArchive {
        path: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Decoder errors surface as `io::Error`; only data errors mean corruption,
/// anything else (disk full, permissions) is a plain IO failure.
fn classify_io(archive: &Path, target: &Path, err: io::Error) -> LauncherError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => corrupt(archive, err),
        _ => LauncherError::io(target, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{write_tar_xz, write_zip};

    #[test]
    fn zip_with_single_root_is_promoted_to_install() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("client.zip");
        write_zip(
            &archive,
            &[
                ("LCDR Unpacked/legouniverse.exe", "exe"),
                ("LCDR Unpacked/boot.cfg", "SERVERNAME=0:Overbuild,"),
            ],
        );
        let staging = dir.path().join("ClientExtract");
        let install = dir.path().join("Client");

        extract_archive(SourceMethod::Zip, &archive, &staging).unwrap();
        promote_staging(&staging, &install).unwrap();

        assert!(install.join("legouniverse.exe").exists());
        assert!(install.join("boot.cfg").exists());
        assert!(!staging.exists());
    }

    #[test]
    fn zip_with_several_roots_promotes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("client.zip");
        write_zip(&archive, &[("a.txt", "a"), ("res/b.txt", "b")]);
        let staging = dir.path().join("ClientExtract");
        let install = dir.path().join("Client");

        extract_archive(SourceMethod::Zip, &archive, &staging).unwrap();
        promote_staging(&staging, &install).unwrap();

        assert!(install.join("a.txt").exists());
        assert!(install.join("res").join("b.txt").exists());
    }

    #[test]
    fn garbage_zip_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("client.zip");
        std::fs::write(&archive, b"definitely not a zip file").unwrap();

        let err = extract_archive(SourceMethod::Zip, &archive, &dir.path().join("x")).unwrap_err();
        assert!(err.is_corrupt_archive(), "unexpected error: {err}");
    }

    #[test]
    fn garbage_tar_xz_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("client.tar.xz");
        std::fs::write(&archive, b"not xz data at all").unwrap();

        let err =
            extract_archive(SourceMethod::TarXz, &archive, &dir.path().join("x")).unwrap_err();
        assert!(err.is_corrupt_archive(), "unexpected error: {err}");
    }

    #[test]
    fn tar_xz_extracts_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("layer.tar.xz");
        write_tar_xz(&archive, &[("wine/bin/wine", "#!/bin/sh\n")]);

        let staging = dir.path().join("staging");
        extract_archive(SourceMethod::TarXz, &archive, &staging).unwrap();
        assert!(staging.join("wine").join("bin").join("wine").exists());
    }
}
