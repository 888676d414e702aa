//! SPZ codec: a zstd-compressed packed-gaussian block behind a 16-byte
//! header. The wire layer works on [`SpzCloud`], whose only convention
//! difference from the IR is quaternion order (`[x, y, z, w]` on the wire);
//! the adapter at the bottom permutes on both directions.

use std::io::Cursor;

use crate::common::{clamp_u8, dim_for_degree, inv_sigmoid, normalize_quat_wxyz, sigmoid};
use crate::error::ConvError;
use crate::structures::{GaussianCloudIR, ReadOptions, ReadOutcome, WriteOptions};
use crate::validate::validate;

pub(crate) const MAGIC: u32 = 0x5053_474E;
pub(crate) const VERSION: u32 = 2;
const FLAG_ANTIALIASED: u8 = 0x1;
const FRACTIONAL_BITS: u8 = 12;
const COLOR_SCALE: f32 = 0.15;
const ZSTD_LEVEL: i32 = 3;

/// SPZ's native cloud struct. Arrays map field-for-field onto the IR
/// except `rotations`, which are `[x, y, z, w]` per point here.
#[derive(Debug, Default, Clone)]
pub struct SpzCloud {
    pub num_points: i32,
    pub sh_degree: i32,
    pub antialiased: bool,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
}

fn err(msg: impl Into<String>) -> ConvError {
    ConvError::Spz(msg.into())
}

#[inline]
fn quantize_sh(x: f32, bucket_size: i32) -> u8 {
    let q = (x * 128.0).round() as i32 + 128;
    let q = ((q + bucket_size / 2) / bucket_size) * bucket_size;
    q.clamp(0, 255) as u8
}

#[inline]
fn unquantize_sh(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

#[inline]
fn parse_3bytes(bytes: &[u8]) -> f32 {
    let b0 = bytes[0] as u32;
    let b1 = bytes[1] as u32;
    let b2 = bytes[2] as u32;
    let mut fixed = b0 | (b1 << 8) | (b2 << 16);
    if (fixed & 0x0080_0000) != 0 {
        fixed |= 0xFF00_0000; // sign extend
    }
    fixed as i32 as f32
}

fn serialize_packed(cloud: &SpzCloud) -> Vec<u8> {
    let sf = (1_i32 << FRACTIONAL_BITS) as f32;
    let color_factor = COLOR_SCALE * 255.0;
    let sh_dim = dim_for_degree(cloud.sh_degree);

    let positions: Vec<u8> = cloud
        .positions
        .iter()
        .flat_map(|&v| {
            let fixed = (v * sf).round() as i32;
            [
                (fixed & 0xFF) as u8,
                ((fixed >> 8) & 0xFF) as u8,
                ((fixed >> 16) & 0xFF) as u8,
            ]
        })
        .collect();

    let alphas: Vec<u8> = cloud
        .alphas
        .iter()
        .map(|&a| clamp_u8(sigmoid(a) * 255.0))
        .collect();

    let colors: Vec<u8> = cloud
        .colors
        .iter()
        .map(|&c| clamp_u8(c * color_factor + 127.5))
        .collect();

    let scales: Vec<u8> = cloud
        .scales
        .iter()
        .map(|&s| clamp_u8((s + 10.0) * 16.0))
        .collect();

    let rotations: Vec<u8> = cloud
        .rotations
        .chunks_exact(4)
        .flat_map(|quat| {
            // Wire order is [x, y, z, w]; canonicalize on w and store xyz.
            let q = normalize_quat_wxyz([quat[3], quat[0], quat[1], quat[2]]);
            let scale = if q[0] < 0.0 { -127.5 } else { 127.5 };
            [
                clamp_u8(q[1] * scale + 127.5),
                clamp_u8(q[2] * scale + 127.5),
                clamp_u8(q[3] * scale + 127.5),
            ]
        })
        .collect();

    let sh: Vec<u8> = if cloud.sh_degree > 0 {
        let sh_per_point = sh_dim * 3;
        cloud
            .sh
            .chunks_exact(sh_per_point)
            .flat_map(|chunk| {
                chunk.iter().enumerate().map(|(j, &x)| {
                    let bucket = if j < 9 { 8 } else { 16 };
                    quantize_sh(x, bucket)
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut out = Vec::with_capacity(
        16 + positions.len()
            + alphas.len()
            + colors.len()
            + scales.len()
            + rotations.len()
            + sh.len(),
    );
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(cloud.num_points as u32).to_le_bytes());
    out.push(cloud.sh_degree as u8);
    out.push(FRACTIONAL_BITS);
    out.push(if cloud.antialiased { FLAG_ANTIALIASED } else { 0 });
    out.push(0); // reserved

    out.extend_from_slice(&positions);
    out.extend_from_slice(&alphas);
    out.extend_from_slice(&colors);
    out.extend_from_slice(&scales);
    out.extend_from_slice(&rotations);
    out.extend_from_slice(&sh);
    out
}

fn deserialize_packed(data: &[u8]) -> Result<SpzCloud, ConvError> {
    if data.len() < 16 {
        return Err(err("read failed: corrupt header"));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let num_points = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let sh_degree = data[12] as i32;
    let fractional_bits = data[13];
    let flags = data[14];

    if magic != MAGIC {
        return Err(err("read failed: invalid magic number"));
    }
    if version != VERSION {
        return Err(err(format!("read failed: unsupported version {}", version)));
    }
    if sh_degree > 3 {
        return Err(err(format!("read failed: invalid SH degree {}", sh_degree)));
    }

    let np = num_points as usize;
    let dim = dim_for_degree(sh_degree);
    let positions_len = np * 9;
    let alphas_len = np;
    let colors_len = np * 3;
    let scales_len = np * 3;
    let rotations_len = np * 3;
    let sh_len = np * dim * 3;

    let needed =
        16 + positions_len + alphas_len + colors_len + scales_len + rotations_len + sh_len;
    if data.len() < needed {
        return Err(err(format!(
            "read failed: payload too short, need {} bytes, have {}",
            needed,
            data.len()
        )));
    }

    let mut offset = 16;
    let mut take = |len: usize| {
        let slice = &data[offset..offset + len];
        offset += len;
        slice
    };
    let positions = take(positions_len);
    let alphas = take(alphas_len);
    let colors = take(colors_len);
    let scales = take(scales_len);
    let rotations = take(rotations_len);
    let sh = take(sh_len);

    let mut cloud = SpzCloud {
        num_points: np as i32,
        sh_degree,
        antialiased: (flags & FLAG_ANTIALIASED) != 0,
        positions: vec![0.0; np * 3],
        scales: vec![0.0; np * 3],
        rotations: vec![0.0; np * 4],
        alphas: vec![0.0; np],
        colors: vec![0.0; np * 3],
        sh: vec![0.0; np * dim * 3],
    };

    let scale = 1.0 / (1_i32 << fractional_bits) as f32;
    for (i, chunk) in positions.chunks_exact(9).enumerate() {
        cloud.positions[i * 3] = parse_3bytes(&chunk[0..3]) * scale;
        cloud.positions[i * 3 + 1] = parse_3bytes(&chunk[3..6]) * scale;
        cloud.positions[i * 3 + 2] = parse_3bytes(&chunk[6..9]) * scale;
    }

    for (dst, &src) in cloud.scales.iter_mut().zip(scales.iter()) {
        *dst = src as f32 / 16.0 - 10.0;
    }

    let rotation_scale = 1.0 / 127.5;
    for (chunk, out) in rotations
        .chunks_exact(3)
        .zip(cloud.rotations.chunks_exact_mut(4))
    {
        let x = chunk[0] as f32 * rotation_scale - 1.0;
        let y = chunk[1] as f32 * rotation_scale - 1.0;
        let z = chunk[2] as f32 * rotation_scale - 1.0;
        let rr = 1.0 - (x * x + y * y + z * z);
        let w = if rr < 0.0 { 0.0 } else { rr.sqrt() };
        out[0] = x;
        out[1] = y;
        out[2] = z;
        out[3] = w;
    }

    for (dst, &src) in cloud.alphas.iter_mut().zip(alphas.iter()) {
        *dst = inv_sigmoid((src as f32 / 255.0).clamp(1e-6, 1.0 - 1e-6));
    }

    for (dst, &src) in cloud.colors.iter_mut().zip(colors.iter()) {
        *dst = (src as f32 / 255.0 - 0.5) / COLOR_SCALE;
    }

    for (dst, &src) in cloud.sh.iter_mut().zip(sh.iter()) {
        *dst = unquantize_sh(src);
    }

    Ok(cloud)
}

/// Serialize and zstd-compress a cloud into the wire format.
pub fn encode(cloud: &SpzCloud) -> Result<Vec<u8>, ConvError> {
    let packed = serialize_packed(cloud);
    zstd::stream::encode_all(Cursor::new(packed), ZSTD_LEVEL)
        .map_err(|e| err(format!("zstd compression failed: {}", e)))
}

/// Decompress and deserialize a wire buffer.
pub fn decode(data: &[u8]) -> Result<SpzCloud, ConvError> {
    let packed = zstd::stream::decode_all(Cursor::new(data))
        .map_err(|e| err(format!("zstd decompression failed: {}", e)))?;
    deserialize_packed(&packed)
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    if data.is_empty() {
        return Err(err("read failed: empty input"));
    }
    let cloud = decode(data)?;

    let mut ir = GaussianCloudIR {
        num_points: cloud.num_points,
        positions: cloud.positions,
        scales: cloud.scales,
        rotations: Vec::with_capacity(cloud.rotations.len()),
        alphas: cloud.alphas,
        colors: cloud.colors,
        sh: cloud.sh,
        ..Default::default()
    };
    ir.meta.sh_degree = cloud.sh_degree;
    ir.meta.antialiased = cloud.antialiased;
    ir.meta.source_format = "spz".to_string();

    for q in cloud.rotations.chunks_exact(4) {
        ir.rotations.extend_from_slice(&[q[3], q[0], q[1], q[2]]);
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
    if ir.num_points == 0 {
        return Err(err("write failed: no points to write"));
    }

    let mut cloud = SpzCloud {
        num_points: ir.num_points,
        sh_degree: ir.meta.sh_degree,
        antialiased: ir.meta.antialiased,
        positions: ir.positions.clone(),
        scales: ir.scales.clone(),
        rotations: Vec::with_capacity(ir.rotations.len()),
        alphas: ir.alphas.clone(),
        colors: ir.colors.clone(),
        sh: ir.sh.clone(),
    };
    for q in ir.rotations.chunks_exact(4) {
        cloud.rotations.extend_from_slice(&[q[1], q[2], q[3], q[0]]);
    }

    encode(&cloud)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(n: usize) -> GaussianCloudIR {
        let mut ir = GaussianCloudIR {
            num_points: n as i32,
            positions: (0..n * 3).map(|v| v as f32 * 0.5 - 1.0).collect(),
            scales: vec![-2.0; n * 3],
            rotations: Vec::with_capacity(n * 4),
            alphas: vec![0.5; n],
            colors: vec![0.25; n * 3],
            ..Default::default()
        };
        for _ in 0..n {
            ir.rotations.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
        }
        ir
    }

    #[test]
    fn round_trip_within_wire_quantization() {
        let ir = cloud(4);
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;

        assert_eq!(back.num_points, 4);
        for (a, b) in ir.positions.iter().zip(back.positions.iter()) {
            assert!((a - b).abs() <= 1.0 / 4096.0, "{} vs {}", a, b);
        }
        for (a, b) in ir.scales.iter().zip(back.scales.iter()) {
            assert!((a - b).abs() <= 1.0 / 16.0);
        }
        for (a, b) in ir.colors.iter().zip(back.colors.iter()) {
            assert!((a - b).abs() <= 0.5 / (0.15 * 255.0) + 1e-3);
        }
        for (a, b) in ir.alphas.iter().zip(back.alphas.iter()) {
            assert!((a - b).abs() <= 0.05);
        }
        for (a, b) in ir.rotations.iter().zip(back.rotations.iter()) {
            assert!((a - b).abs() <= 1.0 / 127.5 + 1e-3);
        }
    }

    #[test]
    fn quaternion_order_is_permuted_on_the_wire() {
        let mut ir = cloud(1);
        // A rotation whose w is dominant and positive.
        ir.rotations = vec![0.8, 0.1, 0.3, 0.5];
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let wire = decode(&bytes).unwrap();
        let norm: f32 = ir.rotations.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((wire.rotations[0] - 0.1 / norm).abs() < 0.02); // x first
        assert!((wire.rotations[3] - 0.8 / norm).abs() < 0.02); // w last

        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert!((back.rotations[0] - 0.8 / norm).abs() < 0.02); // w first again
    }

    #[test]
    fn antialiased_flag_and_degree_survive() {
        let mut ir = cloud(2);
        ir.meta.antialiased = true;
        ir.meta.sh_degree = 1;
        ir.sh = vec![0.25; 2 * 9];
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert!(back.meta.antialiased);
        assert_eq!(back.meta.sh_degree, 1);
        for &v in &back.sh {
            // Bucketed 8-step quantization around 0.25 * 128 = 32.
            assert!((v - 0.25).abs() <= 8.0 / 128.0);
        }
    }

    #[test]
    fn rejects_garbage_and_bad_magic() {
        assert!(read(b"not zstd at all", &ReadOptions::default()).is_err());

        let mut cloudw = SpzCloud {
            num_points: 1,
            positions: vec![0.0; 3],
            scales: vec![0.0; 3],
            rotations: vec![0.0, 0.0, 0.0, 1.0],
            alphas: vec![0.0],
            colors: vec![0.0; 3],
            ..Default::default()
        };
        cloudw.sh_degree = 0;
        let mut packed = serialize_packed(&cloudw);
        packed[0] ^= 0xFF;
        let bytes = zstd::stream::encode_all(Cursor::new(packed), 3).unwrap();
        assert!(matches!(decode(&bytes), Err(ConvError::Spz(_))));
    }
}
