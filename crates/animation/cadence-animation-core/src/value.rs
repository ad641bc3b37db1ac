//! Channel values and the interpolation used for both keyframe sampling and blending.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Vec3,
    Quat,
    Color,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    Scalar(f32),
    /// Position or scale
    Vec3([f32; 3]),
    /// Quaternion (x, y, z, w)
    Quat([f32; 4]),
    /// RGBA color
    Color([f32; 4]),
}

impl Value {
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(_) => ValueKind::Scalar,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Quat(_) => ValueKind::Quat,
            Value::Color(_) => ValueKind::Color,
        }
    }

    /// Interpolate toward `other` by `t`. Quaternions use nlerp along the
    /// shorter arc. A kind mismatch keeps `self`.
    pub fn lerp(&self, other: &Value, t: f32) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(lerp_f32(*a, *b, t)),
            (Value::Vec3(a), Value::Vec3(b)) => Value::Vec3(lerp_vec3(*a, *b, t)),
            (Value::Quat(a), Value::Quat(b)) => Value::Quat(nlerp_quat(*a, *b, t)),
            (Value::Color(a), Value::Color(b)) => Value::Color(lerp_vec4(*a, *b, t)),
            _ => self.clone(),
        }
    }
}

#[inline]
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
pub fn lerp_vec3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        lerp_f32(a[0], b[0], t),
        lerp_f32(a[1], b[1], t),
        lerp_f32(a[2], b[2], t),
    ]
}

#[inline]
pub fn lerp_vec4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        lerp_f32(a[0], b[0], t),
        lerp_f32(a[1], b[1], t),
        lerp_f32(a[2], b[2], t),
        lerp_f32(a[3], b[3], t),
    ]
}

#[inline]
fn dot4(a: [f32; 4], b: [f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

#[inline]
fn normalize4(q: [f32; 4]) -> [f32; 4] {
    let len2 = dot4(q, q);
    if len2 > 0.0 {
        let inv = len2.sqrt().recip();
        [q[0] * inv, q[1] * inv, q[2] * inv, q[3] * inv]
    } else {
        q
    }
}

/// Normalized lerp; flips `b` when the quaternions lie in opposite hemispheres.
pub fn nlerp_quat(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let b = if dot4(a, b) < 0.0 {
        [-b[0], -b[1], -b[2], -b[3]]
    } else {
        b
    };
    normalize4(lerp_vec4(a, b, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scalar_lerp_midpoint() {
        assert_eq!(Value::Scalar(0.0).lerp(&Value::Scalar(10.0), 0.25), Value::Scalar(2.5));
    }

    #[test]
    fn quat_lerp_stays_unit_length() {
        let a = [0.0, 0.0, 0.0, 1.0];
        let b = [0.0, 0.7071068, 0.0, 0.7071068];
        let Value::Quat(q) = Value::Quat(a).lerp(&Value::Quat(b), 0.5) else {
            panic!("expected quat");
        };
        assert_relative_eq!(dot4(q, q), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn mismatched_kinds_keep_left() {
        let left = Value::Vec3([1.0, 2.0, 3.0]);
        assert_eq!(left.lerp(&Value::Scalar(5.0), 0.5), left);
    }
}
