//! Texture-coordinate transforms and viewport math
//!
//! Matrices are column-major 4x4, applied to output texture coordinates
//! (origin top-left, `t` growing downwards) to find the source texel to
//! sample. The rotation matrices undo the display rotation of the decoded
//! picture.

/// Column-major 4x4 matrix, laid out for a WGSL `mat4x4<f32>` uniform
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Sampling transform that shows a picture rotated clockwise by `degrees`
///
/// `degrees` must be 0, 90, 180 or 270; anything else is treated as 0.
pub fn rotation_matrix(degrees: u32) -> Mat4 {
    match degrees {
        // (s, t) -> (t, 1 - s)
        90 => [
            [0.0, -1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 1.0, 0.0, 1.0],
        ],
        // (s, t) -> (1 - s, 1 - t)
        180 => [
            [-1.0, 0.0, 0.0, 0.0],
            [0.0, -1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0, 1.0],
        ],
        // (s, t) -> (1 - t, s)
        270 => [
            [0.0, 1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0, 1.0],
        ],
        _ => IDENTITY,
    }
}

/// Pixel rectangle inside a render target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0.0, y: 0.0, width: width as f32, height: height as f32 }
    }
}

/// Aspect-preserving, centred placement of a `content_width` x `content_height`
/// picture inside a square canvas of side `canvas`
pub fn letterbox_viewport(content_width: u32, content_height: u32, canvas: u32) -> Viewport {
    let side = canvas as f32;
    if content_width == 0 || content_height == 0 {
        return Viewport::full(canvas, canvas);
    }

    let aspect = content_width as f32 / content_height as f32;
    if aspect > 1.0 {
        let height = side / aspect;
        Viewport { x: 0.0, y: (side - height) / 2.0, width: side, height }
    } else {
        let width = side * aspect;
        Viewport { x: (side - width) / 2.0, y: 0.0, width, height: side }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `a * b`: applying the result equals applying `b` first, then `a`
    fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for (col, out_col) in out.iter_mut().enumerate() {
            for (row, value) in out_col.iter_mut().enumerate() {
                *value = (0..4).map(|k| a[k][row] * b[col][k]).sum();
            }
        }
        out
    }

    // Where the shader samples for output coordinate (s, t)
    fn apply(m: &Mat4, (s, t): (f32, f32)) -> (f32, f32) {
        (
            m[0][0] * s + m[1][0] * t + m[3][0],
            m[0][1] * s + m[1][1] * t + m[3][1],
        )
    }

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn test_identity() {
        assert!(close(apply(&rotation_matrix(0), (0.25, 0.75)), (0.25, 0.75)));
    }

    #[test]
    fn test_rotation_corners() {
        // Top-left of a 90 degree output shows the bottom-left of the source
        assert!(close(apply(&rotation_matrix(90), (0.0, 0.0)), (0.0, 1.0)));
        assert!(close(apply(&rotation_matrix(90), (1.0, 0.0)), (0.0, 0.0)));

        assert!(close(apply(&rotation_matrix(180), (0.0, 0.0)), (1.0, 1.0)));

        assert!(close(apply(&rotation_matrix(270), (0.0, 0.0)), (1.0, 0.0)));
        assert!(close(apply(&rotation_matrix(270), (0.0, 1.0)), (0.0, 0.0)));
    }

    #[test]
    fn test_quarter_turns_compose() {
        let twice = multiply(&rotation_matrix(90), &rotation_matrix(90));
        for point in [(0.0, 0.0), (0.3, 0.8), (1.0, 0.5)] {
            assert!(close(apply(&twice, point), apply(&rotation_matrix(180), point)));
        }

        let full = multiply(&rotation_matrix(270), &rotation_matrix(90));
        assert!(close(apply(&full, (0.2, 0.6)), (0.2, 0.6)));
    }

    #[test]
    fn test_unknown_rotation_is_identity() {
        assert_eq!(rotation_matrix(45), IDENTITY);
    }

    #[test]
    fn test_letterbox_landscape() {
        let vp = letterbox_viewport(1920, 1080, 512);
        assert_eq!(vp.width, 512.0);
        assert!((vp.height - 288.0).abs() < 1e-3);
        assert!((vp.y - 112.0).abs() < 1e-3);
        assert_eq!(vp.x, 0.0);
    }

    #[test]
    fn test_letterbox_portrait_and_square() {
        let vp = letterbox_viewport(1080, 1920, 512);
        assert_eq!(vp.height, 512.0);
        assert!((vp.width - 288.0).abs() < 1e-3);
        assert!((vp.x - 112.0).abs() < 1e-3);

        assert_eq!(letterbox_viewport(100, 100, 512), Viewport::full(512, 512));
    }
}
