pub mod codec;
pub mod diff_buffer;
pub mod image;
pub mod line_diff;
pub mod merge_buffer;
pub mod scanline;

use serde::Serialize;
use std::env;
use std::env::set_var;
use std::fmt;
use std::path::PathBuf;

pub use diff_buffer::ImgDiffBuffer;
pub use image::Image;
pub use merge_buffer::ImgMergeBuffer;

/// Classification of a difference region in a two- or three-pane comparison.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum OpType {
    None,
    /// Only the first pane deviates from the others.
    FirstOnly,
    /// Only the middle pane deviates.
    SecondOnly,
    /// Only the third pane deviates.
    ThirdOnly,
    /// A true conflict. In a two-pane comparison every region carries this.
    Diff,
    Trivial,
}

#[derive(Debug)]
pub enum Error {
    /// The codec or vector renderer declined the file.
    Load { path: PathBuf, source: anyhow::Error },
    /// Persisting an image failed.
    Save { path: PathBuf, source: anyhow::Error },
    /// Coordinates outside a pane's pixel area.
    OutOfBounds { pane: usize, x: i32, y: i32 },
    /// Pane index not in `[0, pane_count)`.
    BadPaneIndex(usize),
    /// Mutation attempted on a read-only pane.
    ReadOnly(usize),
    PageOutOfRange { pane: usize, page: usize },
    /// The operation has no backend, e.g. a non-orthogonal rotation.
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { path, source } => {
                write!(f, "cannot load {}: {source}", path.display())
            }
            Self::Save { path, source } => {
                write!(f, "cannot save {}: {source}", path.display())
            }
            Self::OutOfBounds { pane, x, y } => {
                write!(f, "({x}, {y}) is outside pane {pane}")
            }
            Self::BadPaneIndex(pane) => write!(f, "no such pane: {pane}"),
            Self::ReadOnly(pane) => write!(f, "pane {pane} is read-only"),
            Self::PageOutOfRange { pane, page } => {
                write!(f, "pane {pane} has no page {page}")
            }
            Self::Unsupported(what) => write!(f, "unsupported operation: {what}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load { source, .. } | Self::Save { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn set_up_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();
}
