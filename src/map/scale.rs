//! Fitting projected coordinates onto the canvas

use std::cmp::Ordering;
use std::f64::consts::PI;

const MIN_SPREAD: f64 = 1e-6;
const CIRCLE_RADIUS_RATIO: f64 = 0.35;
/// Largest distances ignored when picking the reference radius
const TRIMMED_OUTLIERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
}

impl Canvas {
    pub fn center(&self) -> (f64, f64) {
        (self.width / 2.0, self.height / 2.0)
    }

    /// Radius the reference distance is mapped to
    pub fn target_radius(&self) -> f64 {
        (self.width.min(self.height) / 2.0 - self.padding).max(0.0)
    }

    pub fn contains(&self, (x, y): (f64, f64)) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 390.0,
            height: 520.0,
            padding: 48.0,
        }
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Max after dropping the `trim` largest values; plain max for short input
pub fn trimmed_max(values: &[f64], trim: usize) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    if sorted.len() > trim {
        sorted[sorted.len() - trim - 1]
    } else {
        sorted.last().copied().unwrap_or(0.0)
    }
}

/// Evenly spaced points around the center; a lone point sits on the center
pub fn circle_coords(count: usize, canvas: &Canvas) -> Vec<(f64, f64)> {
    let (cx, cy) = canvas.center();
    if count <= 1 {
        return vec![(cx, cy); count];
    }

    let radius = CIRCLE_RADIUS_RATIO * canvas.width.min(canvas.height);
    (0..count)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / count as f64;
            (cx + radius * angle.cos(), cy + radius * angle.sin())
        })
        .collect()
}

/// Robust fit: center on the median, scale the trimmed max distance to the
/// target radius, and pull outliers in to that radius
pub fn scale_coords(coords: &[(f64, f64)], canvas: &Canvas) -> Vec<(f64, f64)> {
    let xs: Vec<f64> = coords.iter().map(|c| c.0).collect();
    let ys: Vec<f64> = coords.iter().map(|c| c.1).collect();
    let (mx, my) = (median(&xs), median(&ys));

    let distances: Vec<f64> = coords
        .iter()
        .map(|(x, y)| (x - mx).hypot(y - my))
        .collect();
    let max_distance = distances.iter().copied().fold(0.0, f64::max);
    if max_distance < MIN_SPREAD {
        return circle_coords(coords.len(), canvas);
    }

    let mut radius_ref = trimmed_max(&distances, TRIMMED_OUTLIERS);
    if radius_ref < MIN_SPREAD {
        radius_ref = max_distance;
    }

    let scale = canvas.target_radius() / radius_ref;
    let (cx, cy) = canvas.center();

    coords
        .iter()
        .zip(&distances)
        .map(|(&(x, y), &distance)| {
            if distance > 0.0 {
                let ratio = distance.min(radius_ref) / distance * scale;
                ((x - mx) * ratio + cx, (y - my) * ratio + cy)
            } else {
                (cx, cy)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_trimmed_max() {
        assert_eq!(trimmed_max(&[1.0, 9.0, 3.0, 8.0, 2.0], 2), 3.0);
        assert_eq!(trimmed_max(&[1.0, 5.0], 2), 5.0);
    }

    #[test]
    fn test_circle_layout() {
        let canvas = Canvas::default();
        assert_eq!(circle_coords(1, &canvas), vec![(195.0, 260.0)]);

        let points = circle_coords(4, &canvas);
        let radius = 0.35 * 390.0;
        assert!((points[0].0 - (195.0 + radius)).abs() < 1e-9);
        assert!((points[0].1 - 260.0).abs() < 1e-9);
        assert!(points.iter().all(|p| canvas.contains(*p)));
    }

    #[test]
    fn test_outliers_are_clamped() {
        let canvas = Canvas::default();
        let coords = vec![
            (0.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (-1.0, 0.0),
            (0.0, -1.0),
            (1000.0, 0.0),
            (0.0, -5000.0),
        ];
        let scaled = scale_coords(&coords, &canvas);
        let target = canvas.target_radius();

        for point in &scaled {
            let d = (point.0 - 195.0).hypot(point.1 - 260.0);
            assert!(d <= target + 1e-9, "{:?} outside target radius", point);
            assert!(canvas.contains(*point));
        }
        // The inner ring spans the full target radius
        assert!((scaled[1].0 - (195.0 + target)).abs() < 1e-9);
        assert_eq!(scaled[0], (195.0, 260.0));
    }

    #[test]
    fn test_coincident_points_use_circle() {
        let canvas = Canvas::default();
        let scaled = scale_coords(&[(2.0, 2.0), (2.0, 2.0), (2.0, 2.0)], &canvas);
        assert_eq!(scaled, circle_coords(3, &canvas));
    }
}
