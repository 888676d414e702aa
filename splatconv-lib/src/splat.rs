//! Plain `.splat` codec: headerless back-to-back 32-byte records of
//! float32 position + linear-space scale, u8 RGBA, and a u8-quantized
//! `[w, x, y, z]` quaternion.

use crate::bitpack::{read_f32_le, write_f32_le};
use crate::common::{
    linear_scale_to_log, normalize_quat_wxyz, sigmoid, u8_alpha_to_logit, SH_C0,
};
use crate::error::ConvError;
use crate::structures::{GaussianCloudIR, ReadOptions, ReadOutcome, WriteOptions};
use crate::validate::validate;

pub(crate) const BYTES_PER_SPLAT: usize = 32;

fn err(msg: impl Into<String>) -> ConvError {
    ConvError::Splat(msg.into())
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    if data.is_empty() {
        return Err(err("read failed: empty input"));
    }
    if data.len() % BYTES_PER_SPLAT != 0 {
        return Err(err("read failed: file size is not a multiple of 32 bytes"));
    }

    let num_splats = data.len() / BYTES_PER_SPLAT;
    let mut ir = GaussianCloudIR {
        num_points: num_splats as i32,
        positions: Vec::with_capacity(num_splats * 3),
        scales: Vec::with_capacity(num_splats * 3),
        rotations: Vec::with_capacity(num_splats * 4),
        alphas: Vec::with_capacity(num_splats),
        colors: Vec::with_capacity(num_splats * 3),
        ..Default::default()
    };
    // The format carries no higher-order SH.
    ir.meta.sh_degree = 0;
    ir.meta.source_format = "splat".to_string();

    for record in data.chunks_exact(BYTES_PER_SPLAT) {
        for d in 0..3 {
            ir.positions.push(read_f32_le(record, d * 4));
        }
        for d in 0..3 {
            ir.scales.push(linear_scale_to_log(read_f32_le(record, 12 + d * 4)));
        }
        for d in 0..3 {
            ir.colors.push((record[24 + d] as f32 / 255.0 - 0.5) / SH_C0);
        }
        ir.alphas.push(u8_alpha_to_logit(record[27]));

        let q = [
            (record[28] as f32 - 128.0) / 128.0,
            (record[29] as f32 - 128.0) / 128.0,
            (record[30] as f32 - 128.0) / 128.0,
            (record[31] as f32 - 128.0) / 128.0,
        ];
        ir.rotations.extend_from_slice(&normalize_quat_wxyz(q));
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

pub fn write(ir: &GaussianCloudIR, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
    if let Some(msg) = validate(ir, options.strict) {
        return Err(ConvError::Validate(msg));
    }

    let n = ir.num_points as usize;
    if n == 0 {
        return Err(err("write failed: no points to write"));
    }
    // Higher-order SH are not representable and are dropped silently.

    let mut result = vec![0_u8; n * BYTES_PER_SPLAT];
    for (i, record) in result.chunks_exact_mut(BYTES_PER_SPLAT).enumerate() {
        for d in 0..3 {
            write_f32_le(record, d * 4, ir.positions[i * 3 + d]);
        }
        for d in 0..3 {
            write_f32_le(record, 12 + d * 4, ir.scales[i * 3 + d].exp());
        }
        for d in 0..3 {
            let c = ir.colors[i * 3 + d];
            record[24 + d] = ((c * SH_C0 + 0.5) * 255.0).clamp(0.0, 255.0) as u8;
        }
        record[27] = (sigmoid(ir.alphas[i]) * 255.0).clamp(0.0, 255.0) as u8;

        let q = normalize_quat_wxyz([
            ir.rotations[i * 4],
            ir.rotations[i * 4 + 1],
            ir.rotations[i * 4 + 2],
            ir.rotations[i * 4 + 3],
        ]);
        for d in 0..4 {
            record[28 + d] = (q[d] * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(result)
}
