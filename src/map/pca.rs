//! Two-component PCA by power iteration
//!
//! Works on the implicit covariance `v ↦ (1/n)·Xᵀ(Xv)` so nothing of size d×d
//! is ever built.

pub const DEFAULT_POWER_ITERATIONS: usize = 12;

const EPSILON: f64 = 1e-12;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &[f64]) -> Option<Vec<f64>> {
    let norm = dot(v, v).sqrt();
    if norm < EPSILON {
        None
    } else {
        Some(v.iter().map(|x| x / norm).collect())
    }
}

/// Remove the component of `v` along unit vector `axis`
fn project_out(v: &mut [f64], axis: &[f64]) {
    let along = dot(v, axis);
    for (value, a) in v.iter_mut().zip(axis) {
        *value -= along * a;
    }
}

fn covariance_apply(rows: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; v.len()];
    for row in rows {
        let weight = dot(row, v);
        for (acc, value) in out.iter_mut().zip(row) {
            *acc += value * weight;
        }
    }
    let n = rows.len() as f64;
    out.iter_mut().for_each(|value| *value /= n);
    out
}

/// Dominant direction of `rows`, optionally restricted to the complement of `orthogonal_to`
pub fn power_iteration(
    rows: &[Vec<f64>],
    iterations: usize,
    orthogonal_to: Option<&[f64]>,
) -> Option<Vec<f64>> {
    let first = rows.first()?;
    let dim = first.len();

    let mut start = vec![0.0; dim];
    for row in rows {
        for (acc, value) in start.iter_mut().zip(row) {
            *acc += value;
        }
    }
    // Centered rows sum to ~0, so seed from the first row instead
    if dot(&start, &start).sqrt() < EPSILON {
        start = first.clone();
    }
    if let Some(axis) = orthogonal_to {
        project_out(&mut start, axis);
    }

    let mut v = normalize(&start)?;
    for _ in 0..iterations {
        let mut next = covariance_apply(rows, &v);
        if let Some(axis) = orthogonal_to {
            project_out(&mut next, axis);
        }
        match normalize(&next) {
            Some(n) => v = n,
            None => break,
        }
    }
    Some(v)
}

/// Unit vector orthogonal to `axis`, built from the basis vector it leans on least
pub fn orthogonal_basis(axis: &[f64]) -> Vec<f64> {
    let weakest = axis
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .map(|(index, _)| index)
        .unwrap_or(0);

    let mut candidate = vec![0.0; axis.len()];
    if let Some(slot) = candidate.get_mut(weakest) {
        *slot = 1.0;
    }
    project_out(&mut candidate, axis);
    normalize(&candidate).unwrap_or_else(|| axis.to_vec())
}

/// Project rows onto their top two principal axes
///
/// Returns `None` when the centered data is all zeros.
pub fn pca_2d(vectors: &[Vec<f64>], iterations: usize) -> Option<Vec<(f64, f64)>> {
    let first = vectors.first()?;
    let dim = first.len();
    let n = vectors.len() as f64;

    let mut mean = vec![0.0; dim];
    for row in vectors {
        for (acc, value) in mean.iter_mut().zip(row) {
            *acc += value;
        }
    }
    mean.iter_mut().for_each(|value| *value /= n);

    let centered: Vec<Vec<f64>> = vectors
        .iter()
        .map(|row| row.iter().zip(&mean).map(|(v, m)| v - m).collect())
        .collect();

    if centered.iter().flatten().all(|value| value.abs() <= EPSILON) {
        return None;
    }

    let axis1 = power_iteration(&centered, iterations, None)?;
    let axis2 = power_iteration(&centered, iterations, Some(&axis1))
        .unwrap_or_else(|| orthogonal_basis(&axis1));

    Some(
        centered
            .iter()
            .map(|row| (dot(row, &axis1), dot(row, &axis2)))
            .collect(),
    )
}
