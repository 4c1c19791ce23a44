use std::fmt;

/// A 2D affine transform stored as `[a, b, c, d, e, f]`, i.e. the matrix
///
/// ```text
/// | a c e |
/// | b d f |
/// | 0 0 1 |
/// ```
///
/// All the mutating operations right-multiply `self` by an elementary transform,
/// so with column vectors the most recently applied transform acts first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub values: [f64; 6],
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const fn identity() -> Self {
        Self {
            values: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        }
    }

    pub fn is_identity(&self) -> bool {
        let [a, b, c, d, e, f] = self.values;
        (a - 1.0).abs() < f64::EPSILON
            && b.abs() < f64::EPSILON
            && c.abs() < f64::EPSILON
            && (d - 1.0).abs() < f64::EPSILON
            && e.abs() < f64::EPSILON
            && f.abs() < f64::EPSILON
    }

    /// `self = self * other`
    pub fn multiply_right(&mut self, other: &Matrix) -> &mut Self {
        let [a, b, c, d, e, f] = self.values;
        let [oa, ob, oc, od, oe, of] = other.values;
        self.values = [
            a * oa + c * ob,
            b * oa + d * ob,
            a * oc + c * od,
            b * oc + d * od,
            a * oe + c * of + e,
            b * oe + d * of + f,
        ];
        self
    }

    /// `self = self * [[x, 0, 0], [0, y, 0], [0, 0, 1]]`
    pub fn scale(&mut self, x: f64, y: f64) -> &mut Self {
        self.values[0] *= x;
        self.values[1] *= x;
        self.values[2] *= y;
        self.values[3] *= y;
        self
    }

    /// `self = self * [[1, 0, x], [0, 1, y], [0, 0, 1]]`
    pub fn translate(&mut self, x: f64, y: f64) -> &mut Self {
        let [a, b, c, d, e, f] = self.values;
        self.values[4] = a * x + c * y + e;
        self.values[5] = b * x + d * y + f;
        self
    }

    /// `self = self * [[cos t, -sin t, 0], [sin t, cos t, 0], [0, 0, 1]]` with `degrees`
    /// measured as in PostScript. SVG's y axis points down, so a positive angle turns
    /// clockwise on screen.
    pub fn rotate(&mut self, degrees: f64) -> &mut Self {
        let (s, c) = degrees.to_radians().sin_cos();
        let [a, b, m2, m3, _, _] = self.values;
        self.values[0] = a * c + m2 * s;
        self.values[1] = b * c + m3 * s;
        self.values[2] = -a * s + m2 * c;
        self.values[3] = -b * s + m3 * c;
        self
    }

    /// The SVG attribute applying this transform, or the empty string for the identity.
    pub fn to_svg_transform(&self) -> String {
        if self.is_identity() {
            return String::new();
        }
        let [a, b, c, d, e, f] = self.values;
        format!(" transform=\"matrix({a} {b} {c} {d} {e} {f})\"")
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.values;
        write!(f, "[{a},{b},{c},{d},{e},{g}]")
    }
}
