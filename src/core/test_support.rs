//! Fixtures shared by the unit tests.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::core::downloader::{ArtifactFetcher, DownloadProgress};
use crate::core::error::LauncherResult;

pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

pub fn write_tar_xz(path: &Path, files: &[(&str, &str)]) {
    let encoder = xz2::write::XzEncoder::new(File::create(path).unwrap(), 6);
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, *name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Fetcher that writes the requested url as the file contents.
#[derive(Default)]
pub struct EchoFetcher {
    calls: AtomicUsize,
}

impl EchoFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for EchoFetcher {
    async fn fetch(&self, url: &str, dest: &Path, _: &DownloadProgress) -> LauncherResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dest, url)?;
        Ok(())
    }
}
