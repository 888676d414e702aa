//! Extension-keyed dispatch to the format codecs. Extensions compare
//! case-insensitively and ignore one leading dot; `compressed.ply` is a
//! single extension token matched as a double suffix before ordinary
//! last-dot parsing.

use crate::error::ConvError;
use crate::structures::{GaussianCloudIR, ReadOptions, ReadOutcome, WriteOptions};
use crate::{ksplat, ply, ply_auto, ply_compressed, sog, splat, spz};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ply,
    CompressedPly,
    Splat,
    Ksplat,
    Spz,
    Sog,
}

const REGISTERED: [(&str, Format); 6] = [
    ("ply", Format::Ply),
    ("compressed.ply", Format::CompressedPly),
    ("splat", Format::Splat),
    ("ksplat", Format::Ksplat),
    ("spz", Format::Spz),
    ("sog", Format::Sog),
];

fn normalize(ext: &str) -> String {
    ext.strip_prefix('.').unwrap_or(ext).to_ascii_lowercase()
}

impl Format {
    /// Resolve a bare extension (`"ply"`, `".SOG"`, `"compressed.ply"`).
    pub fn from_ext(ext: &str) -> Option<Format> {
        let normalized = normalize(ext);
        REGISTERED
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|&(_, format)| format)
    }

    /// Resolve from a file path, recognizing the `.compressed.ply` double
    /// suffix before falling back to the last-dot extension.
    pub fn from_path(path: &str) -> Option<Format> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".compressed.ply") {
            return Some(Format::CompressedPly);
        }
        let ext = lower.rsplit_once('.').map(|(_, e)| e)?;
        Format::from_ext(ext)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Format::Ply => "ply",
            Format::CompressedPly => "compressed.ply",
            Format::Splat => "splat",
            Format::Ksplat => "ksplat",
            Format::Spz => "spz",
            Format::Sog => "sog",
        }
    }

    /// Decode a byte buffer. The `ply` extension dispatches through the
    /// header auto-detector.
    pub fn read(&self, data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
        match self {
            Format::Ply => ply_auto::read(data, options),
            Format::CompressedPly => ply_compressed::read(data, options),
            Format::Splat => splat::read(data, options),
            Format::Ksplat => ksplat::read(data, options),
            Format::Spz => spz::read(data, options),
            Format::Sog => sog::read(data, options),
        }
    }

    pub fn write(&self, ir: &GaussianCloudIR, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
        match self {
            Format::Ply => ply::write(ir, options),
            Format::CompressedPly => ply_compressed::write(ir, options),
            Format::Splat => splat::write(ir, options),
            Format::Ksplat => ksplat::write(ir, options),
            Format::Spz => spz::write(ir, options),
            Format::Sog => sog::write(ir, options),
        }
    }
}

pub fn reader_for(ext: &str) -> Option<Format> {
    Format::from_ext(ext)
}

pub fn writer_for(ext: &str) -> Option<Format> {
    Format::from_ext(ext)
}

/// Every extension a handler is registered for.
pub fn registered_extensions() -> Vec<&'static str> {
    REGISTERED.iter().map(|&(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup_is_case_insensitive_and_dot_tolerant() {
        assert_eq!(Format::from_ext("ply"), Some(Format::Ply));
        assert_eq!(Format::from_ext(".PLY"), Some(Format::Ply));
        assert_eq!(Format::from_ext("Sog"), Some(Format::Sog));
        assert_eq!(Format::from_ext("compressed.ply"), Some(Format::CompressedPly));
        assert_eq!(Format::from_ext("gltf"), None);
    }

    #[test]
    fn double_suffix_wins_over_last_dot() {
        assert_eq!(
            Format::from_path("scene.compressed.ply"),
            Some(Format::CompressedPly)
        );
        assert_eq!(Format::from_path("scene.ply"), Some(Format::Ply));
        assert_eq!(Format::from_path("a/b/model.KSPLAT"), Some(Format::Ksplat));
        assert_eq!(Format::from_path("noext"), None);
    }

    #[test]
    fn all_six_extensions_are_registered() {
        let exts = registered_extensions();
        assert_eq!(
            exts,
            vec!["ply", "compressed.ply", "splat", "ksplat", "spz", "sog"]
        );
        for ext in exts {
            assert!(reader_for(ext).is_some());
            assert!(writer_for(ext).is_some());
        }
    }
}
