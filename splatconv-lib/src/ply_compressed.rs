//! Chunk-compressed PLY codec. Points are grouped in fixed blocks of 256;
//! each block stores per-axis min/max for positions, log-scales and
//! RGB-mapped DC colors, and every vertex packs into four 32-bit words
//! (11-10-11 position, smallest-three rotation, 11-10-11 scale, 8-8-8-8
//! color+opacity). Higher-order SH are a third element of u8 rows.

use crate::bitpack::{pack_111011, pack_8888, pack_rot, unpack_111011, unpack_8888, unpack_rot};
use crate::common::{lerp, sigmoid, SH_C0};
use crate::error::ConvError;
use crate::ply::{HeaderCursor, FORMAT_LINE};
use crate::structures::{
    sh_coeffs_per_point, GaussianCloudIR, ReadOptions, ReadOutcome, WriteOptions,
};
use crate::validate::validate;

pub(crate) const CHUNK_SIZE: usize = 256;

fn err(msg: impl Into<String>) -> ConvError {
    ConvError::CompressedPly(msg.into())
}

fn degree_for_sh_props(num_props: usize) -> i32 {
    match num_props {
        9 => 1,
        24 => 2,
        45 => 3,
        _ => 0,
    }
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    if data.is_empty() {
        return Err(err("read failed: empty input"));
    }

    let mut cursor = HeaderCursor::new(data);
    if cursor.next_line().map_or(true, |l| l != b"ply") {
        return Err(err("read failed: not a ply file"));
    }
    if cursor.next_line() != Some(FORMAT_LINE) {
        return Err(err("read failed: unsupported format"));
    }

    let mut num_chunks: i64 = 0;
    let mut num_vertices: i64 = 0;
    let mut num_sh: i64 = 0;
    let mut sh_props: usize = 0;
    let mut current_element = Vec::new();

    loop {
        let line = cursor
            .next_line()
            .ok_or_else(|| err("read failed: EOF in header"))?;
        if line == b"end_header" {
            break;
        }
        if let Some(rest) = line.strip_prefix(b"element ") {
            let space = memchr::memchr(b' ', rest)
                .ok_or_else(|| err("read failed: invalid element line"))?;
            current_element = rest[..space].to_vec();
            let count: i64 = std::str::from_utf8(&rest[space + 1..])
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| err("read failed: invalid element line"))?;
            match current_element.as_slice() {
                b"chunk" => num_chunks = count,
                b"vertex" => num_vertices = count,
                b"sh" => num_sh = count,
                _ => {}
            }
        } else if line.starts_with(b"property ") && current_element == b"sh" {
            sh_props += 1;
        }
    }

    if num_vertices <= 0 {
        return Err(err("read failed: invalid vertex count"));
    }
    let num_vertices = num_vertices as usize;
    if num_chunks as usize != num_vertices.div_ceil(CHUNK_SIZE) {
        return Err(err("read failed: chunk count mismatch"));
    }
    let num_chunks = num_chunks as usize;

    let mut offset = cursor.payload_offset();

    let chunk_bytes = num_chunks
        .checked_mul(18 * 4)
        .ok_or_else(|| err("read failed: chunk count overflow"))?;
    if data.len() - offset < chunk_bytes {
        return Err(err("read failed: insufficient data for chunks"));
    }
    let mut chunk_data = vec![0.0_f32; num_chunks * 18];
    for (dst, src) in chunk_data
        .iter_mut()
        .zip(data[offset..offset + chunk_bytes].chunks_exact(4))
    {
        *dst = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    }
    offset += chunk_bytes;

    let vertex_bytes = num_vertices
        .checked_mul(4 * 4)
        .ok_or_else(|| err("read failed: vertex count overflow"))?;
    if data.len() - offset < vertex_bytes {
        return Err(err("read failed: insufficient data for vertices"));
    }
    let mut vertex_data = vec![0_u32; num_vertices * 4];
    for (dst, src) in vertex_data
        .iter_mut()
        .zip(data[offset..offset + vertex_bytes].chunks_exact(4))
    {
        *dst = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    }
    offset += vertex_bytes;

    let mut sh_data: &[u8] = &[];
    if num_sh > 0 && sh_props > 0 {
        let sh_bytes = num_vertices * sh_props;
        if data.len() - offset < sh_bytes {
            return Err(err("read failed: insufficient data for SH"));
        }
        sh_data = &data[offset..offset + sh_bytes];
    }

    let mut ir = GaussianCloudIR {
        num_points: num_vertices as i32,
        positions: vec![0.0; num_vertices * 3],
        scales: vec![0.0; num_vertices * 3],
        rotations: vec![0.0; num_vertices * 4],
        alphas: vec![0.0; num_vertices],
        colors: vec![0.0; num_vertices * 3],
        ..Default::default()
    };
    ir.meta.sh_degree = degree_for_sh_props(sh_props);
    ir.meta.source_format = "compressed.ply".to_string();
    if sh_props > 0 {
        ir.sh = vec![0.0; num_vertices * sh_props];
    }

    for i in 0..num_vertices {
        let chunk = &chunk_data[(i / CHUNK_SIZE) * 18..(i / CHUNK_SIZE) * 18 + 18];
        let (pos_min, pos_max) = (&chunk[0..3], &chunk[3..6]);
        let (scale_min, scale_max) = (&chunk[6..9], &chunk[9..12]);
        let (col_min, col_max) = (&chunk[12..15], &chunk[15..18]);

        let packed_position = vertex_data[i * 4];
        let packed_rotation = vertex_data[i * 4 + 1];
        let packed_scale = vertex_data[i * 4 + 2];
        let packed_color = vertex_data[i * 4 + 3];

        let pos = unpack_111011(packed_position);
        for d in 0..3 {
            ir.positions[i * 3 + d] = lerp(pos_min[d], pos_max[d], pos[d]);
        }

        let rot = unpack_rot(packed_rotation);
        ir.rotations[i * 4..i * 4 + 4].copy_from_slice(&rot);

        let scale = unpack_111011(packed_scale);
        for d in 0..3 {
            ir.scales[i * 3 + d] = lerp(scale_min[d], scale_max[d], scale[d]);
        }

        let color = unpack_8888(packed_color);
        for d in 0..3 {
            let c = lerp(col_min[d], col_max[d], color[d]);
            ir.colors[i * 3 + d] = (c - 0.5) / SH_C0;
        }
        let opacity = color[3].clamp(0.001, 0.999);
        ir.alphas[i] = -(1.0 / opacity - 1.0).ln();
    }

    // SH rows are channel-major on disk; interleave per coefficient.
    if sh_props > 0 {
        let sh_dim = sh_props / 3;
        for i in 0..num_vertices {
            let row = &sh_data[i * sh_props..(i + 1) * sh_props];
            for j in 0..sh_dim {
                for c in 0..3 {
                    let byte = row[c * sh_dim + j];
                    let n = match byte {
                        0 => 0.0,
                        255 => 1.0,
                        b => (b as f32 + 0.5) / 256.0,
                    };
                    ir.sh[i * sh_props + j * 3 + c] = (n - 0.5) * 8.0;
                }
            }
        }
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

struct MinMax {
    min: f32,
    max: f32,
}

fn min_max(values: impl Iterator<Item = f32>) -> MinMax {
    let mut result = MinMax {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };
    for v in values {
        result.min = result.min.min(v);
        result.max = result.max.max(v);
    }
    result
}

fn normalize(x: f32, min: f32, max: f32) -> f32 {
    if x <= min {
        return 0.0;
    }
    if x >= max {
        return 1.0;
    }
    if max - min < 1e-5 {
        0.0
    } else {
        (x - min) / (max - min)
    }
}

pub fn write(ir: &GaussianCloudIR, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
    if let Some(msg) = validate(ir, options.strict) {
        return Err(ConvError::Validate(msg));
    }

    let num_points = ir.num_points as usize;
    if num_points == 0 {
        return Err(err("write failed: no points to write"));
    }

    let num_chunks = num_points.div_ceil(CHUNK_SIZE);
    let sh_coeffs = sh_coeffs_per_point(ir.meta.sh_degree);

    let mut chunk_data = vec![0.0_f32; num_chunks * 18];
    let mut packed_data = vec![0_u32; num_points * 4];
    let mut sh_data = vec![0_u8; num_points * sh_coeffs];

    // Chunk working set, padded to a full block by repeating the last
    // real point so min/max cover all 256 slots.
    let mut tmp_positions = vec![0.0_f32; CHUNK_SIZE * 3];
    let mut tmp_scales = vec![0.0_f32; CHUNK_SIZE * 3];
    let mut tmp_colors = vec![0.0_f32; CHUNK_SIZE * 3];

    for chunk_idx in 0..num_chunks {
        let start = chunk_idx * CHUNK_SIZE;
        let count = CHUNK_SIZE.min(num_points - start);

        for i in 0..CHUNK_SIZE {
            let idx = start + i.min(count - 1);
            for d in 0..3 {
                tmp_positions[i * 3 + d] = ir.positions[idx * 3 + d];
                tmp_scales[i * 3 + d] = ir.scales[idx * 3 + d];
                tmp_colors[i * 3 + d] = ir.colors[idx * 3 + d] * SH_C0 + 0.5;
            }
        }

        let mut ranges = [[0.0_f32; 2]; 9];
        for d in 0..3 {
            let p = min_max(tmp_positions.iter().skip(d).step_by(3).copied());
            ranges[d] = [p.min, p.max];

            let s = min_max(tmp_scales.iter().skip(d).step_by(3).copied());
            // Outlier log-scales are clamped before they define the range.
            ranges[3 + d] = [s.min.clamp(-20.0, 20.0), s.max.clamp(-20.0, 20.0)];

            let c = min_max(tmp_colors.iter().skip(d).step_by(3).copied());
            ranges[6 + d] = [c.min, c.max];
        }

        let chunk = &mut chunk_data[chunk_idx * 18..chunk_idx * 18 + 18];
        for d in 0..3 {
            chunk[d] = ranges[d][0];
            chunk[3 + d] = ranges[d][1];
            chunk[6 + d] = ranges[3 + d][0];
            chunk[9 + d] = ranges[3 + d][1];
            chunk[12 + d] = ranges[6 + d][0];
            chunk[15 + d] = ranges[6 + d][1];
        }

        for i in 0..count {
            let idx = start + i;
            let out = &mut packed_data[idx * 4..idx * 4 + 4];

            out[0] = pack_111011(
                normalize(tmp_positions[i * 3], ranges[0][0], ranges[0][1]),
                normalize(tmp_positions[i * 3 + 1], ranges[1][0], ranges[1][1]),
                normalize(tmp_positions[i * 3 + 2], ranges[2][0], ranges[2][1]),
            );

            let rot = [
                ir.rotations[idx * 4],
                ir.rotations[idx * 4 + 1],
                ir.rotations[idx * 4 + 2],
                ir.rotations[idx * 4 + 3],
            ];
            out[1] = pack_rot(rot);

            out[2] = pack_111011(
                normalize(tmp_scales[i * 3], ranges[3][0], ranges[3][1]),
                normalize(tmp_scales[i * 3 + 1], ranges[4][0], ranges[4][1]),
                normalize(tmp_scales[i * 3 + 2], ranges[5][0], ranges[5][1]),
            );

            out[3] = pack_8888(
                normalize(tmp_colors[i * 3], ranges[6][0], ranges[6][1]),
                normalize(tmp_colors[i * 3 + 1], ranges[7][0], ranges[7][1]),
                normalize(tmp_colors[i * 3 + 2], ranges[8][0], ranges[8][1]),
                sigmoid(ir.alphas[idx]),
            );
        }

        // SH rows are channel-major on disk: all R coefficients, then G,
        // then B.
        if sh_coeffs > 0 {
            let sh_dim = sh_coeffs / 3;
            for i in 0..count {
                let idx = start + i;
                for c in 0..3 {
                    for j in 0..sh_dim {
                        let value = ir.sh[idx * sh_coeffs + j * 3 + c];
                        let nvalue = value / 8.0 + 0.5;
                        sh_data[idx * sh_coeffs + c * sh_dim + j] =
                            ((nvalue * 256.0).floor()).clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }
    }

    let mut header = String::new();
    header.push_str("ply\n");
    header.push_str("format binary_little_endian 1.0\n");
    header.push_str("comment generated by splatconv\n");
    header.push_str(&format!("element chunk {}\n", num_chunks));
    for group in ["", "scale_"] {
        for bound in ["min_", "max_"] {
            for axis in ["x", "y", "z"] {
                header.push_str(&format!("property float {}{}{}\n", bound, group, axis));
            }
        }
    }
    for bound in ["min_", "max_"] {
        for ch in ["r", "g", "b"] {
            header.push_str(&format!("property float {}{}\n", bound, ch));
        }
    }
    header.push_str(&format!("element vertex {}\n", num_points));
    header.push_str("property uint packed_position\n");
    header.push_str("property uint packed_rotation\n");
    header.push_str("property uint packed_scale\n");
    header.push_str("property uint packed_color\n");
    if sh_coeffs > 0 {
        header.push_str(&format!("element sh {}\n", num_points));
        for i in 0..sh_coeffs {
            header.push_str(&format!("property uchar f_rest_{}\n", i));
        }
    }
    header.push_str("end_header\n");

    let mut result = Vec::with_capacity(
        header.len() + chunk_data.len() * 4 + packed_data.len() * 4 + sh_data.len(),
    );
    result.extend_from_slice(header.as_bytes());
    for &v in &chunk_data {
        result.extend_from_slice(&v.to_le_bytes());
    }
    for &v in &packed_data {
        result.extend_from_slice(&v.to_le_bytes());
    }
    result.extend_from_slice(&sh_data);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(n: usize) -> GaussianCloudIR {
        let mut ir = GaussianCloudIR {
            num_points: n as i32,
            positions: Vec::with_capacity(n * 3),
            scales: vec![0.0; n * 3],
            rotations: Vec::with_capacity(n * 4),
            alphas: vec![0.0; n],
            colors: vec![0.0; n * 3],
            ..Default::default()
        };
        for i in 0..n {
            ir.positions
                .extend_from_slice(&[i as f32, i as f32 * 0.5, -(i as f32)]);
            ir.rotations.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
        }
        ir
    }

    #[test]
    fn header_ordering_matches_wire_layout() {
        // Property ordering in the emitted header must stay in the
        // min-xyz/max-xyz, min-scale/max-scale, min-rgb/max-rgb record order.
        let bytes = write(&cloud(1), &WriteOptions::default()).unwrap();
        let text = String::from_utf8_lossy(&bytes[..400]);
        let order = [
            "min_x", "min_y", "min_z", "max_x", "max_y", "max_z", "min_scale_x", "max_scale_z",
            "min_r", "max_b",
        ];
        let mut last = 0;
        for name in order {
            let pos = text.find(&format!("property float {}\n", name)).unwrap();
            assert!(pos > last, "{} out of order", name);
            last = pos;
        }
    }

    #[test]
    fn chunk_boundary_pads_with_last_point() {
        let ir = cloud(257);
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let text = String::from_utf8_lossy(&bytes[..200]);
        assert!(text.contains("element chunk 2\n"));

        // The second chunk holds a single real point, so its min == max.
        let header_end = bytes.windows(11).position(|w| w == b"end_header\n").unwrap() + 11;
        let chunk2 = &bytes[header_end + 18 * 4..header_end + 36 * 4];
        let f = |o: usize| f32::from_le_bytes(chunk2[o * 4..o * 4 + 4].try_into().unwrap());
        assert_eq!(f(0), f(3)); // min_x == max_x
        assert_eq!(f(1), f(4));
        assert_eq!(f(2), f(5));

        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert_eq!(back.num_points, 257);
        for i in 0..257 {
            // 11-bit grid over a range of 256 units.
            assert!((back.positions[i * 3] - i as f32).abs() < 0.2);
            assert!((back.rotations[i * 4] - 1.0).abs() < 0.01);
            assert!(back.alphas[i].abs() < 0.05);
        }
    }

    #[test]
    fn sh_round_trips_through_u8_grid() {
        let mut ir = cloud(2);
        ir.meta.sh_degree = 1;
        ir.sh = (0..18).map(|v| (v as f32 - 9.0) / 4.0).collect();
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert_eq!(back.meta.sh_degree, 1);
        assert_eq!(back.sh.len(), 18);
        for (a, b) in ir.sh.iter().zip(back.sh.iter()) {
            assert!((a - b).abs() <= 8.0 / 256.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn auto_detect_accepts_own_output() {
        let bytes = write(&cloud(5), &WriteOptions::default()).unwrap();
        assert!(crate::ply_auto::is_compressed_ply(&bytes));
        let mut with_sh = cloud(5);
        with_sh.meta.sh_degree = 2;
        with_sh.sh = vec![0.0; 5 * 24];
        let bytes = write(&with_sh, &WriteOptions::default()).unwrap();
        assert!(crate::ply_auto::is_compressed_ply(&bytes));
    }

    #[test]
    fn rejects_chunk_count_mismatch() {
        let bytes = write(&cloud(5), &WriteOptions::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let bad = text.replace("element chunk 1\n", "element chunk 2\n");
        assert!(read(bad.as_bytes(), &ReadOptions::default()).is_err());
    }

    #[test]
    fn scale_range_is_clamped() {
        let mut ir = cloud(1);
        ir.scales = vec![-30.0, 0.0, 30.0];
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert!(back.scales[0] >= -20.0);
        assert!(back.scales[2] <= 20.0);
    }
}
