use crate::structures::{ColorSpace, GaussianCloudIR, Handedness, LengthUnit, UpAxis};

/// Min/max/mean over a single float attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatStats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBox {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub min_z: f32,
    pub max_z: f32,
}

/// Summary of a cloud: counts, bounds, attribute statistics, and an
/// in-memory size breakdown.
#[derive(Debug, Clone, Default)]
pub struct ModelInfo {
    pub num_points: i32,
    pub file_size: usize,
    pub source_format: String,

    pub handedness: Handedness,
    pub up_axis: UpAxis,
    pub unit: LengthUnit,
    pub color_space: ColorSpace,
    pub sh_degree: i32,
    pub antialiased: bool,

    pub bounds: BoundingBox,
    pub scale_stats: FloatStats,
    pub alpha_stats: FloatStats,

    pub positions_size: usize,
    pub scales_size: usize,
    pub rotations_size: usize,
    pub alphas_size: usize,
    pub colors_size: usize,
    pub sh_size: usize,
    pub total_size: usize,

    pub extra_attrs: Vec<(String, usize)>,
}

fn compute_float_stats(data: &[f32]) -> FloatStats {
    let mut stats = FloatStats::default();
    if data.is_empty() {
        return stats;
    }

    stats.count = data.len();
    stats.min = data[0];
    stats.max = data[0];
    let mut sum = 0.0_f64;
    for &v in data {
        stats.min = stats.min.min(v);
        stats.max = stats.max.max(v);
        sum += v as f64;
    }
    stats.avg = (sum / data.len() as f64) as f32;
    stats
}

fn compute_bounds(positions: &[f32]) -> BoundingBox {
    let mut bounds = BoundingBox::default();
    if positions.len() < 3 {
        return bounds;
    }

    bounds.min_x = positions[0];
    bounds.max_x = positions[0];
    bounds.min_y = positions[1];
    bounds.max_y = positions[1];
    bounds.min_z = positions[2];
    bounds.max_z = positions[2];

    for p in positions.chunks_exact(3).skip(1) {
        bounds.min_x = bounds.min_x.min(p[0]);
        bounds.max_x = bounds.max_x.max(p[0]);
        bounds.min_y = bounds.min_y.min(p[1]);
        bounds.max_y = bounds.max_y.max(p[1]);
        bounds.min_z = bounds.min_z.min(p[2]);
        bounds.max_z = bounds.max_z.max(p[2]);
    }
    bounds
}

/// Summarize a cloud. `file_size` is the on-disk size when known, 0
/// otherwise; attribute sizes always reflect the in-memory f32 arrays.
pub fn model_info(ir: &GaussianCloudIR, file_size: usize) -> ModelInfo {
    let mut info = ModelInfo {
        num_points: ir.num_points,
        file_size,
        source_format: ir.meta.source_format.clone(),
        handedness: ir.meta.handedness,
        up_axis: ir.meta.up,
        unit: ir.meta.unit,
        color_space: ir.meta.color,
        sh_degree: ir.meta.sh_degree,
        antialiased: ir.meta.antialiased,
        bounds: compute_bounds(&ir.positions),
        scale_stats: compute_float_stats(&ir.scales),
        alpha_stats: compute_float_stats(&ir.alphas),
        positions_size: ir.positions.len() * 4,
        scales_size: ir.scales.len() * 4,
        rotations_size: ir.rotations.len() * 4,
        alphas_size: ir.alphas.len() * 4,
        colors_size: ir.colors.len() * 4,
        sh_size: ir.sh.len() * 4,
        ..Default::default()
    };

    info.total_size = info.positions_size
        + info.scales_size
        + info.rotations_size
        + info.alphas_size
        + info.colors_size
        + info.sh_size;

    for (name, arr) in &ir.extras {
        info.extra_attrs.push((name.clone(), arr.len() * 4));
        info.total_size += arr.len() * 4;
    }
    info.extra_attrs.sort();

    info
}

/// Human-readable byte count, base-1024 with two decimals.
pub fn format_bytes(bytes: usize) -> String {
    const SUFFIX: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut exp = 0;
    while value >= 1024.0 && exp < 3 {
        value /= 1024.0;
        exp += 1;
    }
    format!("{:.2} {}", value, SUFFIX[exp])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_uses_base_1024() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn summarizer_reports_bounds_and_sizes() {
        let ir = GaussianCloudIR {
            num_points: 2,
            positions: vec![-1.0, 0.0, 2.0, 3.0, -4.0, 5.0],
            scales: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            rotations: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            alphas: vec![-1.0, 1.0],
            colors: vec![0.0; 6],
            ..Default::default()
        };
        let info = model_info(&ir, 64);

        assert_eq!(info.num_points, 2);
        assert_eq!(info.file_size, 64);
        assert_eq!(info.bounds.min_x, -1.0);
        assert_eq!(info.bounds.max_x, 3.0);
        assert_eq!(info.bounds.min_y, -4.0);
        assert_eq!(info.bounds.max_z, 5.0);
        assert_eq!(info.scale_stats.min, 0.0);
        assert_eq!(info.scale_stats.max, 5.0);
        assert!((info.scale_stats.avg - 2.5).abs() < 1e-6);
        assert_eq!(info.alpha_stats.avg, 0.0);
        assert_eq!(info.positions_size, 24);
        assert_eq!(info.rotations_size, 32);
        assert_eq!(info.total_size, 24 + 24 + 32 + 8 + 24);
    }

    #[test]
    fn extras_are_counted_into_total() {
        let mut ir = GaussianCloudIR::default();
        ir.extras.insert("nx".to_string(), vec![0.0; 8]);
        let info = model_info(&ir, 0);
        assert_eq!(info.extra_attrs, vec![("nx".to_string(), 32)]);
        assert_eq!(info.total_size, 32);
    }
}
