//! Skew-angle normalization for page rotation.
//!
//! OCR reports a detected skew per page; page rotation fields only support
//! quarter turns, and the rotation to apply runs opposite the detected skew.

/// Tolerance around 0°/360° treated as noise.
const ZERO_TOLERANCE: f64 = 1.0;
/// Tolerance around the quarter-turn targets.
const TARGET_TOLERANCE: f64 = 5.0;

/// A quantized rotation for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRotation {
    /// Zero-based page index.
    pub page: usize,
    /// Clockwise rotation in degrees, one of {0, 90, 180, 270}.
    pub degrees: u16,
}

/// Quantize a detected skew angle to the rotation to apply.
///
/// The result is a clockwise quarter turn complementary to the detected
/// skew direction. Near-zero skew is treated as noise. Angles away from any
/// quarter-turn target are rounded to the nearest one; genuinely
/// non-axis-aligned skew is not corrected.
pub fn normalize(detected_degrees: f64) -> u16 {
    let angle = detected_degrees.rem_euclid(360.0);

    if angle < ZERO_TOLERANCE || (360.0 - angle) < ZERO_TOLERANCE {
        return 0;
    }

    for target in [90.0_f64, 180.0, 270.0] {
        if (angle - target).abs() <= TARGET_TOLERANCE {
            return (360 - target as u16) % 360;
        }
    }

    let rounded = ((angle / 90.0).round() as u16 % 4) * 90;
    (360 - rounded) % 360
}

/// Map per-page skew angles to the rotations worth applying (non-zero only).
pub fn page_rotations(skew_angles: &[f64]) -> Vec<PageRotation> {
    skew_angles
        .iter()
        .enumerate()
        .filter_map(|(page, &skew)| {
            let degrees = normalize(skew);
            (degrees != 0).then_some(PageRotation { page, degrees })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_zero_is_noise() {
        assert_eq!(normalize(0.0), 0);
        assert_eq!(normalize(0.9), 0);
        assert_eq!(normalize(-0.9), 0);
        assert_eq!(normalize(359.2), 0);
        assert_eq!(normalize(360.0), 0);
        assert_eq!(normalize(720.5), 0);
    }

    #[test]
    fn test_snaps_to_targets() {
        assert_eq!(normalize(88.0), 270);
        assert_eq!(normalize(90.0), 270);
        assert_eq!(normalize(94.0), 270);
        assert_eq!(normalize(182.0), 180);
        assert_eq!(normalize(178.0), 180);
        assert_eq!(normalize(270.0), 90);
        assert_eq!(normalize(274.5), 90);
    }

    #[test]
    fn test_negative_angles_wrap() {
        assert_eq!(normalize(-90.0), 90);
        assert_eq!(normalize(-180.0), 180);
        assert_eq!(normalize(-270.0), 270);
        assert_eq!(normalize(-450.0), 90);
    }

    #[test]
    fn test_odd_angles_round_to_quarter_turn() {
        // 45° rounds up to 90°, complement 270.
        assert_eq!(normalize(45.0), 270);
        // 130° is closest to 90°.
        assert_eq!(normalize(130.0), 270);
        // 140° is closest to 180°.
        assert_eq!(normalize(140.0), 180);
        // 310° is closest to 270°.
        assert_eq!(normalize(310.0), 90);
        // 320° rounds to 360°, which is no rotation at all.
        assert_eq!(normalize(320.0), 0);
    }

    #[test]
    fn test_result_always_quarter_turn() {
        let mut angle = -720.0;
        while angle <= 720.0 {
            let result = normalize(angle);
            assert!(
                [0, 90, 180, 270].contains(&result),
                "normalize({}) produced {}",
                angle,
                result
            );
            angle += 0.37;
        }
    }

    #[test]
    fn test_page_rotations_filters_noise() {
        let rotations = page_rotations(&[0.2, 91.0, -0.5, 179.0]);
        assert_eq!(
            rotations,
            vec![
                PageRotation { page: 1, degrees: 270 },
                PageRotation { page: 3, degrees: 180 },
            ]
        );
    }
}
