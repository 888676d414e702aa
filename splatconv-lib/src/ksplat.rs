//! KSPLAT container codec: a 4096-byte main header, fixed 1024-byte
//! section headers, and per-section splat payloads in one of three
//! compression modes (raw float32, float16 + bucket-quantized positions,
//! or additionally u8-normalized harmonics).

use crate::bitpack::{
    read_f16_le, read_f32_le, read_u16_le, read_u32_le, unpack_rot, write_f32_le, write_u16_le,
    write_u32_le,
};
use crate::common::{linear_scale_to_log, normalize_quat_wxyz, sigmoid, SH_C0};
use crate::error::ConvError;
use crate::structures::{
    sh_coeffs_per_point, GaussianCloudIR, ReadOptions, ReadOutcome, WriteOptions,
};
use crate::validate::validate;

pub(crate) const MAIN_HEADER_SIZE: usize = 4096;
pub(crate) const SECTION_HEADER_SIZE: usize = 1024;

const HARMONICS_COMPONENT_COUNT: [usize; 4] = [0, 9, 24, 45];

struct CompressionConfig {
    center_bytes: usize,
    scale_bytes: usize,
    rotation_bytes: usize,
    color_bytes: usize,
    harmonics_bytes: usize,
    scale_start: usize,
    rotation_start: usize,
    color_start: usize,
    harmonics_start: usize,
    default_quant_range: u32,
}

const COMPRESSION_MODES: [CompressionConfig; 3] = [
    CompressionConfig {
        center_bytes: 12,
        scale_bytes: 12,
        rotation_bytes: 16,
        color_bytes: 4,
        harmonics_bytes: 4,
        scale_start: 12,
        rotation_start: 24,
        color_start: 40,
        harmonics_start: 44,
        default_quant_range: 1,
    },
    CompressionConfig {
        center_bytes: 6,
        scale_bytes: 6,
        rotation_bytes: 8,
        color_bytes: 4,
        harmonics_bytes: 2,
        scale_start: 6,
        rotation_start: 12,
        color_start: 20,
        harmonics_start: 24,
        default_quant_range: 32767,
    },
    CompressionConfig {
        center_bytes: 6,
        scale_bytes: 6,
        rotation_bytes: 8,
        color_bytes: 4,
        harmonics_bytes: 1,
        scale_start: 6,
        rotation_start: 12,
        color_start: 20,
        harmonics_start: 24,
        default_quant_range: 32767,
    },
];

fn err(msg: impl Into<String>) -> ConvError {
    ConvError::Ksplat(msg.into())
}

fn bytes_per_splat(config: &CompressionConfig, harmonics_components: usize) -> usize {
    let raw = config.center_bytes
        + config.scale_bytes
        + config.rotation_bytes
        + config.color_bytes
        + harmonics_components * config.harmonics_bytes;
    // Records are padded to a 4-byte boundary.
    (raw + 3) & !3
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    if data.is_empty() {
        return Err(err("read failed: empty input"));
    }
    if data.len() < MAIN_HEADER_SIZE {
        return Err(err("read failed: file too small to be a valid container"));
    }

    let major_version = data[0];
    let minor_version = data[1];
    if major_version != 0 || minor_version < 1 {
        return Err(err(format!(
            "read failed: unsupported version {}.{}",
            major_version, minor_version
        )));
    }

    let max_sections = read_u32_le(data, 4) as usize;
    let num_splats = read_u32_le(data, 16) as usize;
    let compression_mode = read_u16_le(data, 20);
    if compression_mode > 2 {
        return Err(err(format!(
            "read failed: invalid compression mode {}",
            compression_mode
        )));
    }

    let mut min_harmonics = read_f32_le(data, 36);
    let mut max_harmonics = read_f32_le(data, 40);
    if min_harmonics == 0.0 && max_harmonics == 0.0 {
        min_harmonics = -1.5;
        max_harmonics = 1.5;
    }

    if num_splats == 0 {
        return Err(err("read failed: file is empty"));
    }
    // Even the smallest record layout needs 24 bytes per splat.
    if num_splats > data.len() / 24 {
        return Err(err("read failed: insufficient data for splat count"));
    }

    let config = &COMPRESSION_MODES[compression_mode as usize];

    // First pass over section headers: the cloud's SH degree is the
    // maximum across non-empty sections.
    let mut max_degree: usize = 0;
    for section_idx in 0..max_sections {
        let header_offset = MAIN_HEADER_SIZE + section_idx * SECTION_HEADER_SIZE;
        if header_offset + SECTION_HEADER_SIZE > data.len() {
            return Err(err("read failed: insufficient data for section header"));
        }
        if read_u32_le(data, header_offset) == 0 {
            continue;
        }
        let degree = read_u16_le(data, header_offset + 40) as usize;
        if degree > 3 {
            return Err(err(format!(
                "read failed: invalid harmonics degree {}",
                degree
            )));
        }
        max_degree = max_degree.max(degree);
    }

    let sh_per_point = sh_coeffs_per_point(max_degree as i32);

    let mut ir = GaussianCloudIR {
        num_points: num_splats as i32,
        positions: Vec::with_capacity(num_splats * 3),
        scales: Vec::with_capacity(num_splats * 3),
        rotations: Vec::with_capacity(num_splats * 4),
        alphas: Vec::with_capacity(num_splats),
        colors: Vec::with_capacity(num_splats * 3),
        sh: Vec::with_capacity(num_splats * sh_per_point),
        ..Default::default()
    };
    ir.meta.sh_degree = max_degree as i32;
    ir.meta.source_format = "ksplat".to_string();

    let mut section_data_offset = MAIN_HEADER_SIZE + max_sections * SECTION_HEADER_SIZE;
    let mut splat_index: usize = 0;

    for section_idx in 0..max_sections {
        let header_offset = MAIN_HEADER_SIZE + section_idx * SECTION_HEADER_SIZE;

        let section_splat_count = read_u32_le(data, header_offset) as usize;
        let max_section_splats = read_u32_le(data, header_offset + 4) as usize;
        let bucket_capacity = read_u32_le(data, header_offset + 8) as usize;
        let bucket_count = read_u32_le(data, header_offset + 12) as usize;
        let spatial_block_size = read_f32_le(data, header_offset + 16);
        let bucket_storage_size = read_u16_le(data, header_offset + 20) as usize;
        let mut quantization_range = read_u32_le(data, header_offset + 24);
        if quantization_range == 0 {
            quantization_range = config.default_quant_range;
        }
        let full_buckets = read_u32_le(data, header_offset + 32) as usize;
        let partial_buckets = read_u32_le(data, header_offset + 36) as usize;
        let harmonics_degree = read_u16_le(data, header_offset + 40) as usize;

        let full_bucket_splats = full_buckets * bucket_capacity;
        let partial_meta_size = partial_buckets * 4;
        let total_bucket_storage = bucket_storage_size * bucket_count + partial_meta_size;
        let harmonics_components = HARMONICS_COMPONENT_COUNT[harmonics_degree.min(3)];
        let record_size = bytes_per_splat(config, harmonics_components);
        let section_data_size = record_size * max_section_splats;

        if section_data_offset + total_bucket_storage + section_data_size > data.len() {
            return Err(err("read failed: insufficient data for section"));
        }

        let position_scale = spatial_block_size / 2.0 / quantization_range as f32;

        let centers_offset = section_data_offset + partial_meta_size;
        if centers_offset + bucket_count * 12 > data.len() {
            return Err(err("read failed: insufficient data for bucket centers"));
        }
        let mut bucket_centers = vec![0.0_f32; bucket_count * 3];
        for (dst, src) in bucket_centers
            .iter_mut()
            .zip(data[centers_offset..centers_offset + bucket_count * 12].chunks_exact(4))
        {
            *dst = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        }

        let mut partial_sizes = vec![0_u32; partial_buckets];
        for (dst, src) in partial_sizes
            .iter_mut()
            .zip(data[section_data_offset..section_data_offset + partial_meta_size].chunks_exact(4))
        {
            *dst = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        }

        let splat_data = &data[section_data_offset + total_bucket_storage
            ..section_data_offset + total_bucket_storage + section_data_size];

        // Running cursor over partial-bucket sizes.
        let mut current_partial_bucket = full_buckets;
        let mut current_partial_base = full_bucket_splats;

        for splat_idx in 0..section_splat_count {
            let record = &splat_data[splat_idx * record_size..(splat_idx + 1) * record_size];

            let (x, y, z) = if compression_mode == 0 {
                (
                    read_f32_le(record, 0),
                    read_f32_le(record, 4),
                    read_f32_le(record, 8),
                )
            } else {
                let bucket_idx = if splat_idx < full_bucket_splats {
                    splat_idx / bucket_capacity
                } else {
                    let rel = current_partial_bucket - full_buckets;
                    let bucket_size = *partial_sizes
                        .get(rel)
                        .ok_or_else(|| err("read failed: partial bucket walk out of range"))?
                        as usize;
                    if splat_idx >= current_partial_base + bucket_size {
                        current_partial_bucket += 1;
                        current_partial_base += bucket_size;
                    }
                    current_partial_bucket
                };
                if bucket_idx >= bucket_count {
                    return Err(err("read failed: bucket index out of range"));
                }
                let center = &bucket_centers[bucket_idx * 3..bucket_idx * 3 + 3];
                let dequant = |offset: usize, base: f32| {
                    (read_u16_le(record, offset) as i16 as f32 - quantization_range as f32)
                        * position_scale
                        + base
                };
                (
                    dequant(0, center[0]),
                    dequant(2, center[1]),
                    dequant(4, center[2]),
                )
            };

            let (scale_x, scale_y, scale_z) = if compression_mode == 0 {
                (
                    read_f32_le(record, config.scale_start),
                    read_f32_le(record, config.scale_start + 4),
                    read_f32_le(record, config.scale_start + 8),
                )
            } else {
                (
                    read_f16_le(record, config.scale_start),
                    read_f16_le(record, config.scale_start + 2),
                    read_f16_le(record, config.scale_start + 4),
                )
            };

            let rot = if config.rotation_bytes == 4 {
                unpack_rot(read_u32_le(record, config.rotation_start))
            } else if compression_mode == 0 {
                [
                    read_f32_le(record, config.rotation_start),
                    read_f32_le(record, config.rotation_start + 4),
                    read_f32_le(record, config.rotation_start + 8),
                    read_f32_le(record, config.rotation_start + 12),
                ]
            } else {
                [
                    read_f16_le(record, config.rotation_start),
                    read_f16_le(record, config.rotation_start + 2),
                    read_f16_le(record, config.rotation_start + 4),
                    read_f16_le(record, config.rotation_start + 6),
                ]
            };

            let red = record[config.color_start];
            let green = record[config.color_start + 1];
            let blue = record[config.color_start + 2];
            let opacity = record[config.color_start + 3];

            ir.positions.extend_from_slice(&[x, y, z]);
            ir.scales.extend_from_slice(&[
                linear_scale_to_log(scale_x),
                linear_scale_to_log(scale_y),
                linear_scale_to_log(scale_z),
            ]);
            ir.colors.extend_from_slice(&[
                (red as f32 / 255.0 - 0.5) / SH_C0,
                (green as f32 / 255.0 - 0.5) / SH_C0,
                (blue as f32 / 255.0 - 0.5) / SH_C0,
            ]);
            let normalized_opacity = (opacity as f32 / 255.0).clamp(1e-6, 1.0 - 1e-6);
            ir.alphas
                .push((normalized_opacity / (1.0 - normalized_opacity)).ln());
            ir.rotations.extend_from_slice(&rot);

            let sh_base = splat_index * sh_per_point;
            ir.sh.resize(sh_base + sh_per_point, 0.0);

            // On disk SH are channel-major (all R, then G, then B); the IR
            // interleaves RGB per coefficient.
            let coeffs_per_channel = harmonics_components / 3;
            for i in 0..harmonics_components {
                let value = match compression_mode {
                    0 => read_f32_le(record, config.harmonics_start + i * 4),
                    1 => read_f16_le(record, config.harmonics_start + i * 2),
                    _ => {
                        let normalized = record[config.harmonics_start + i] as f32 / 255.0;
                        min_harmonics + normalized * (max_harmonics - min_harmonics)
                    }
                };
                let channel = i / coeffs_per_channel;
                let coeff = i % coeffs_per_channel;
                let offset = sh_base + coeff * 3 + channel;
                if offset < ir.sh.len() {
                    ir.sh[offset] = value;
                }
            }

            splat_index += 1;
        }

        section_data_offset += section_data_size + total_bucket_storage;
    }

    if splat_index != num_splats {
        return Err(err(format!(
            "read failed: splat count mismatch, expected {}, processed {}",
            num_splats, splat_index
        )));
    }

    let warning = validate(&ir, options.strict);
    if options.strict {
        if let Some(msg) = warning {
            return Err(ConvError::Validate(msg));
        }
        return Ok(ReadOutcome::clean(ir));
    }
    Ok(ReadOutcome { cloud: ir, warning })
}

/// Write a single full-precision (mode 0) section with identity bucketing.
pub fn write(ir: &GaussianCloudIR, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
    if let Some(msg) = validate(ir, options.strict) {
        return Err(ConvError::Validate(msg));
    }

    let n = ir.num_points as usize;
    if n == 0 {
        return Err(err("write failed: no points to write"));
    }

    let harmonics_degree = ir.meta.sh_degree.clamp(0, 3) as usize;
    let harmonics_components = HARMONICS_COMPONENT_COUNT[harmonics_degree];
    let sh_per_point = sh_coeffs_per_point(harmonics_degree as i32);

    let config = &COMPRESSION_MODES[0];
    let record_size = bytes_per_splat(config, harmonics_components);
    let section_data_size = record_size * n;

    let total_size = MAIN_HEADER_SIZE + SECTION_HEADER_SIZE + section_data_size;
    let mut result = vec![0_u8; total_size];

    // Main header.
    result[0] = 0; // major version
    result[1] = 1; // minor version
    write_u32_le(&mut result, 4, 1); // max sections
    write_u32_le(&mut result, 16, n as u32);
    write_u16_le(&mut result, 20, 0); // compression mode
    write_f32_le(&mut result, 36, -1.5);
    write_f32_le(&mut result, 40, 1.5);

    // Section header: one section, no spatial bucketing.
    let sh = MAIN_HEADER_SIZE;
    write_u32_le(&mut result, sh, n as u32); // section splat count
    write_u32_le(&mut result, sh + 4, n as u32); // max section splats
    write_u32_le(&mut result, sh + 8, n as u32); // bucket capacity
    write_u32_le(&mut result, sh + 12, 0); // bucket count
    write_f32_le(&mut result, sh + 16, 1.0); // spatial block size
    write_u16_le(&mut result, sh + 20, 0); // bucket storage size
    write_u32_le(&mut result, sh + 24, 1); // quantization range
    write_u32_le(&mut result, sh + 32, 0); // full buckets
    write_u32_le(&mut result, sh + 36, 0); // partial buckets
    write_u16_le(&mut result, sh + 40, harmonics_degree as u16);

    let splat_data = &mut result[MAIN_HEADER_SIZE + SECTION_HEADER_SIZE..];
    for i in 0..n {
        let record = &mut splat_data[i * record_size..(i + 1) * record_size];

        for d in 0..3 {
            write_f32_le(record, d * 4, ir.positions[i * 3 + d]);
        }
        for d in 0..3 {
            write_f32_le(record, config.scale_start + d * 4, ir.scales[i * 3 + d].exp());
        }

        let q = normalize_quat_wxyz([
            ir.rotations[i * 4],
            ir.rotations[i * 4 + 1],
            ir.rotations[i * 4 + 2],
            ir.rotations[i * 4 + 3],
        ]);
        for d in 0..4 {
            write_f32_le(record, config.rotation_start + d * 4, q[d]);
        }

        for d in 0..3 {
            let c = ir.colors[i * 3 + d];
            record[config.color_start + d] = ((c * SH_C0 + 0.5) * 255.0).clamp(0.0, 255.0) as u8;
        }
        record[config.color_start + 3] =
            (sigmoid(ir.alphas[i]) * 255.0).clamp(0.0, 255.0) as u8;

        if harmonics_components > 0 && !ir.sh.is_empty() {
            let coeffs_per_channel = harmonics_components / 3;
            for channel in 0..3 {
                for coeff in 0..coeffs_per_channel {
                    let disk_index = channel * coeffs_per_channel + coeff;
                    let value = ir.sh[i * sh_per_point + coeff * 3 + channel];
                    write_f32_le(record, config.harmonics_start + disk_index * 4, value);
                }
            }
        }
    }

    Ok(result)
}
