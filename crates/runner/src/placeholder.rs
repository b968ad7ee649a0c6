//! Placeholder bitmaps copied in place of a capture that could not be taken

use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{RunnerError, RunnerResult};

const NOT_FOUND_FILE: &str = "notFound.png";
const NOT_VISIBLE_FILE: &str = "notVisible.png";
const ERROR_FILE: &str = "unexpectedError.png";

const PLACEHOLDER_WIDTH: u32 = 240;
const PLACEHOLDER_HEIGHT: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    NotFound,
    NotVisible,
    Error,
}

impl Placeholder {
    fn file_name(self) -> &'static str {
        match self {
            Placeholder::NotFound => NOT_FOUND_FILE,
            Placeholder::NotVisible => NOT_VISIBLE_FILE,
            Placeholder::Error => ERROR_FILE,
        }
    }

    /// Diagonal stripes in a colour per kind, so the three are easy to tell apart
    fn render(self) -> RgbaImage {
        let stripe = match self {
            Placeholder::NotFound => Rgba([214, 51, 132, 255]),
            Placeholder::NotVisible => Rgba([240, 173, 78, 255]),
            Placeholder::Error => Rgba([200, 35, 51, 255]),
        };
        let background = Rgba([245, 245, 245, 255]);
        RgbaImage::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |x, y| {
            if (x + y) / 12 % 2 == 0 {
                stripe
            } else {
                background
            }
        })
    }
}

/// Fixed locations of the three placeholder assets
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderSet {
    dir: PathBuf,
}

impl PlaceholderSet {
    /// Use `dir`, generating any asset that does not exist yet. Files already
    /// present are left alone so projects can ship their own images.
    pub fn ensure(dir: &Path) -> RunnerResult<Self> {
        std::fs::create_dir_all(dir)?;
        for kind in [Placeholder::NotFound, Placeholder::NotVisible, Placeholder::Error] {
            let path = dir.join(kind.file_name());
            if !path.exists() {
                kind.render().save(&path)?;
                info!("Generated placeholder {}", path.display());
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// [`Self::ensure`] on a blocking thread, for async callers.
    pub async fn prepare(dir: &Path) -> RunnerResult<Self> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::ensure(&dir))
            .await
            .map_err(|e| RunnerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    pub fn path(&self, kind: Placeholder) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Copy a placeholder verbatim to `target`.
    pub async fn copy_to(&self, kind: Placeholder, target: &Path) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.path(kind), target).await?;
        debug!("Copied {:?} placeholder to {}", kind, target.display());
        Ok(())
    }
}
