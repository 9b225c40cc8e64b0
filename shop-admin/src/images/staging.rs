use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const FALLBACK_FILENAME: &str = "upload";
const FALLBACK_MIME: &str = "application/octet-stream";

/// Directory where incoming uploads are staged before they go to the host.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts staging a file. The returned stager owns a temp file that is
    /// deleted if the stager (or the finished image) is dropped.
    pub fn begin(
        &self,
        original_name: Option<&str>,
        content_type: Option<&str>,
    ) -> std::io::Result<ImageStager> {
        let filename = sanitize_filename(original_name.unwrap_or_default());
        let mime_type = content_type
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(&filename)
                    .first_raw()
                    .unwrap_or(FALLBACK_MIME)
                    .to_string()
            });

        let temp = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.dir)?;
        let writer = File::from_std(temp.reopen()?);
        debug!(path = %temp.path().display(), filename = %filename, "staging upload");

        Ok(ImageStager {
            temp,
            writer,
            filename,
            mime_type,
            len: 0,
        })
    }
}

#[derive(Debug)]
pub struct ImageStager {
    temp: NamedTempFile,
    writer: File,
    filename: String,
    mime_type: String,
    len: u64,
}

impl ImageStager {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> std::io::Result<StagedImage> {
        self.writer.flush().await?;
        self.writer.sync_all().await?;
        Ok(StagedImage {
            temp: self.temp,
            filename: self.filename,
            mime_type: self.mime_type,
            len: self.len,
        })
    }
}

/// A fully written upload waiting in the staging area.
#[derive(Debug)]
pub struct StagedImage {
    temp: NamedTempFile,
    filename: String,
    mime_type: String,
    len: u64,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn open(&self) -> std::io::Result<File> {
        File::open(self.path()).await
    }
}

/// Reduces a client-supplied filename to a safe, portable name: directory
/// parts are dropped and anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut cleaned = String::with_capacity(base.len());
    for ch in base.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            cleaned.push(ch);
        } else if ch.is_whitespace() {
            cleaned.push('_');
        }
    }

    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() {
        String::from(FALLBACK_FILENAME)
    } else {
        cleaned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{sanitize_filename, StagingArea};

    #[test]
    fn sanitize_filename_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\red shoe.png"), "red_shoe.png");
        assert_eq!(sanitize_filename("caf\u{e9} menu!.jpg"), "caf_menu.jpg");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn sanitize_filename_falls_back_when_nothing_is_left() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("///"), "upload");
        assert_eq!(sanitize_filename("..."), "upload");
    }

    #[tokio::test]
    async fn staged_image_is_removed_on_drop() -> Result<()> {
        let dir = tempdir()?;
        let staging = StagingArea::new(dir.path().to_path_buf());

        let mut stager = staging.begin(Some("shoe.png"), None)?;
        stager.write_chunk(b"\x89PNG").await?;
        stager.write_chunk(b"rest").await?;
        let staged = stager.finish().await?;

        assert_eq!(staged.len(), 8);
        assert_eq!(staged.filename(), "shoe.png");
        assert_eq!(staged.mime_type(), "image/png");
        assert_eq!(tokio::fs::read(staged.path()).await?, b"\x89PNGrest");
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

        drop(staged);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_stager_leaves_nothing_behind() -> Result<()> {
        let dir = tempdir()?;
        let staging = StagingArea::new(dir.path().to_path_buf());

        let mut stager = staging.begin(Some("x.bin"), Some("application/x-custom"))?;
        stager.write_chunk(b"partial").await?;
        drop(stager);

        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
