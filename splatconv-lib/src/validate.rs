use crate::structures::{sh_coeffs_per_point, GaussianCloudIR};

/// Check array-length invariants against `num_points` and `sh_degree`.
///
/// Returns the first mismatch found, in a fixed field order, as a message;
/// `None` means the cloud is consistent. With `strict` every float array is
/// additionally scanned for non-finite values.
pub fn validate(ir: &GaussianCloudIR, strict: bool) -> Option<String> {
    if ir.num_points < 0 {
        return Some("numPoints is negative".to_string());
    }

    let n = ir.num_points as usize;
    let expect = |got: usize, expect: usize, name: &str| -> Option<String> {
        if got != expect {
            Some(format!(
                "{} size mismatch, got {}, expect {}",
                name, got, expect
            ))
        } else {
            None
        }
    };

    if let Some(msg) = expect(ir.positions.len(), n * 3, "positions") {
        return Some(msg);
    }
    if let Some(msg) = expect(ir.scales.len(), n * 3, "scales") {
        return Some(msg);
    }
    if let Some(msg) = expect(ir.rotations.len(), n * 4, "rotations") {
        return Some(msg);
    }
    if let Some(msg) = expect(ir.alphas.len(), n, "alphas") {
        return Some(msg);
    }
    if let Some(msg) = expect(ir.colors.len(), n * 3, "colors") {
        return Some(msg);
    }
    if let Some(msg) = expect(ir.sh.len(), n * sh_coeffs_per_point(ir.meta.sh_degree), "sh") {
        return Some(msg);
    }

    if strict {
        let arrays: [(&str, &[f32]); 6] = [
            ("positions", &ir.positions),
            ("scales", &ir.scales),
            ("rotations", &ir.rotations),
            ("alphas", &ir.alphas),
            ("colors", &ir.colors),
            ("sh", &ir.sh),
        ];
        for (name, values) in arrays {
            if values.iter().any(|v| !v.is_finite()) {
                return Some(format!("{} contains non-finite value", name));
            }
        }
    }

    None
}
