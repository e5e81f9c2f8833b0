//! Format loaders for the modplay tracker player.
//!
//! Each loader decodes one binary layout into the shared `Song` model,
//! best-effort: truncated headers fall back to defaults, out-of-range
//! pointers are clamped, and missing sample data yields empty samples.
//! Only a file that is unrecognizable at the binary level returns an error.

mod bytes;
mod it_format;
mod mod_format;
mod pcm;
mod s3m_format;
mod xm_format;

pub use it_format::load_it;
pub use mod_format::load_mod;
pub use s3m_format::load_s3m;
pub use xm_format::load_xm;

use mp_ir::Song;
use std::path::Path;

/// Error type for module loading.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// File is smaller than the format's fixed header
    #[error("file too short for a module header ({0} bytes)")]
    TooShort(usize),
    /// Required magic bytes are missing
    #[error("missing {0} signature")]
    BadMagic(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Extensions the loader dispatch recognizes (lowercase).
pub const EXTENSIONS: [&str; 4] = ["mod", "s3m", "xm", "it"];

/// Returns true if the path carries a recognized module extension.
pub fn is_module_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load a module from bytes, dispatching on the file extension
/// (case-insensitive). Unknown extensions fall back to MOD.
pub fn load_bytes(data: &[u8], extension: &str) -> Result<Song, LoadError> {
    match extension.to_ascii_lowercase().as_str() {
        "s3m" => load_s3m(data),
        "xm" => load_xm(data),
        "it" => load_it(data),
        _ => load_mod(data),
    }
}

/// Read and load a module file.
pub fn load_path(path: &Path) -> Result<Song, LoadError> {
    let data = std::fs::read(path)?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    load_bytes(&data, extension)
}
