//! Format-conversion core for 3D Gaussian point clouds.
//!
//! Six interoperable on-disk formats (`ply`, `compressed.ply`, `splat`,
//! `ksplat`, `spz`, `sog`) converge on a single in-memory representation,
//! [`GaussianCloudIR`]. Every codec is a pure function over a fully
//! materialized byte buffer; conversion is strictly
//! `bytes -> reader -> IR -> writer -> bytes`.

pub mod bitpack;
pub mod common;
pub mod error;
pub mod ksplat;
pub mod model_info;
pub mod ply;
pub mod ply_auto;
pub mod ply_compressed;
pub mod registry;
pub mod sog;
pub mod splat;
pub mod spz;
pub mod structures;
pub mod validate;
mod webp;
mod zip;

pub use error::ConvError;
pub use model_info::{format_bytes, model_info, ModelInfo};
pub use registry::{reader_for, registered_extensions, writer_for, Format};
pub use structures::{
    sh_coeffs_per_point, ColorSpace, GaussMetadata, GaussianCloudIR, Handedness, LengthUnit,
    ReadOptions, ReadOutcome, UpAxis, WriteOptions,
};
pub use validate::validate;

/// Decode `data` using the handler registered for `ext`.
pub fn read(data: &[u8], ext: &str, options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    let format =
        registry::reader_for(ext).ok_or_else(|| ConvError::UnknownExtension(ext.to_string()))?;
    format.read(data, options)
}

/// Encode `ir` using the handler registered for `ext`.
pub fn write(ir: &GaussianCloudIR, ext: &str, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
    let format =
        registry::writer_for(ext).ok_or_else(|| ConvError::UnknownExtension(ext.to_string()))?;
    format.write(ir, options)
}

/// Bytes produced by a conversion, plus any read-side validation warning.
#[derive(Debug)]
pub struct ConvertOutcome {
    pub bytes: Vec<u8>,
    pub warning: Option<String>,
}

/// `read` then `write`: decode `data` as `from`, re-encode as `to`.
pub fn convert(data: &[u8], from: &str, to: &str, strict: bool) -> Result<ConvertOutcome, ConvError> {
    let outcome = read(data, from, &ReadOptions { strict })?;
    let bytes = write(&outcome.cloud, to, &WriteOptions { strict })?;
    Ok(ConvertOutcome {
        bytes,
        warning: outcome.warning,
    })
}
