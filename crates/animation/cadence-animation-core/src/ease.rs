//! Ease curves: bounded acceleration profiles used while a time converter
//! starts, stops or changes speed.
//!
//! A curve runs from `start_speed` to `speed` over `length` seconds of world
//! time beginning at `begin_world_time`. Position is measured in animation
//! seconds travelled since the curve began.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use cadence_message::WireError;

/// Profile selector as stored in animation definitions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EaseKind {
    #[default]
    None,
    ConstAccel,
    Spline,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EaseParams {
    pub min_length: f32,
    pub max_length: f32,
    pub norm_length: f32,
    pub start_speed: f32,
    pub speed: f32,
    pub length: f32,
    pub begin_world_time: f64,
}

impl EaseParams {
    fn new(min_length: f32, max_length: f32, norm_length: f32, start_speed: f32, speed: f32) -> Self {
        Self {
            min_length,
            max_length,
            norm_length,
            start_speed,
            speed,
            length: norm_length,
            begin_world_time: 0.0,
        }
    }

    #[inline]
    fn mean_speed(&self) -> f32 {
        (self.start_speed + self.speed) * 0.5
    }

    fn is_finite(&self) -> bool {
        [
            self.min_length,
            self.max_length,
            self.norm_length,
            self.start_speed,
            self.speed,
            self.length,
        ]
        .iter()
        .all(|v| v.is_finite())
            && self.begin_world_time.is_finite()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EaseCurve {
    /// Velocity changes linearly with time.
    ConstAccel(EaseParams),
    /// Velocity follows smoothstep, so acceleration is zero at both ends.
    Spline(EaseParams),
}

const TAG_NONE: u8 = 0;
const TAG_CONST_ACCEL: u8 = 1;
const TAG_SPLINE: u8 = 2;
const PAYLOAD_LEN: u16 = 6 * 4 + 8;

#[inline]
fn smoothstep(u: f32) -> f32 {
    u * u * (3.0 - 2.0 * u)
}

impl EaseCurve {
    /// Build a curve of `kind`; `EaseKind::None` yields no curve.
    pub fn create(
        kind: EaseKind,
        min_length: f32,
        max_length: f32,
        norm_length: f32,
        start_speed: f32,
        speed: f32,
    ) -> Option<Self> {
        let p = EaseParams::new(min_length, max_length, norm_length, start_speed, speed);
        match kind {
            EaseKind::None => None,
            EaseKind::ConstAccel => Some(EaseCurve::ConstAccel(p)),
            EaseKind::Spline => Some(EaseCurve::Spline(p)),
        }
    }

    pub fn kind(&self) -> EaseKind {
        match self {
            EaseCurve::ConstAccel(_) => EaseKind::ConstAccel,
            EaseCurve::Spline(_) => EaseKind::Spline,
        }
    }

    #[inline]
    pub fn params(&self) -> &EaseParams {
        match self {
            EaseCurve::ConstAccel(p) | EaseCurve::Spline(p) => p,
        }
    }

    #[inline]
    pub fn params_mut(&mut self) -> &mut EaseParams {
        match self {
            EaseCurve::ConstAccel(p) | EaseCurve::Spline(p) => p,
        }
    }

    pub fn set_begin_world_time(&mut self, t: f64) {
        self.params_mut().begin_world_time = t;
    }

    #[inline]
    pub fn end_world_time(&self) -> f64 {
        let p = self.params();
        p.begin_world_time + p.length as f64
    }

    /// Animation seconds travelled after `t` seconds on the curve.
    pub fn position_given_time(&self, t: f32) -> f32 {
        let p = self.params();
        if p.length <= 0.0 {
            return 0.0;
        }
        let t = t.clamp(0.0, p.length);
        let dv = p.speed - p.start_speed;
        match self {
            EaseCurve::ConstAccel(_) => p.start_speed * t + 0.5 * dv * t * t / p.length,
            EaseCurve::Spline(_) => {
                let u = t / p.length;
                let u3 = u * u * u;
                p.start_speed * t + dv * p.length * (u3 - 0.5 * u3 * u)
            }
        }
    }

    pub fn velocity_given_time(&self, t: f32) -> f32 {
        let p = self.params();
        if p.length <= 0.0 {
            return p.speed;
        }
        let u = (t / p.length).clamp(0.0, 1.0);
        let dv = p.speed - p.start_speed;
        match self {
            EaseCurve::ConstAccel(_) => p.start_speed + dv * u,
            EaseCurve::Spline(_) => p.start_speed + dv * smoothstep(u),
        }
    }

    /// Time on the curve at which velocity equals `v`, clamped to the curve.
    pub fn time_given_velocity(&self, v: f32) -> f32 {
        let p = self.params();
        let dv = p.speed - p.start_speed;
        if p.length <= 0.0 || dv == 0.0 {
            return 0.0;
        }
        let frac = ((v - p.start_speed) / dv).clamp(0.0, 1.0);
        match self {
            EaseCurve::ConstAccel(_) => frac * p.length,
            EaseCurve::Spline(_) => {
                let (mut lo, mut hi) = (0.0f32, 1.0f32);
                for _ in 0..24 {
                    let mid = 0.5 * (lo + hi);
                    if smoothstep(mid) < frac {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                0.5 * (lo + hi) * p.length
            }
        }
    }

    #[inline]
    pub fn min_distance(&self) -> f32 {
        let p = self.params();
        p.min_length * p.mean_speed()
    }

    #[inline]
    pub fn max_distance(&self) -> f32 {
        let p = self.params();
        p.max_length * p.mean_speed()
    }

    #[inline]
    pub fn norm_distance(&self) -> f32 {
        let p = self.params();
        p.norm_length * p.mean_speed()
    }

    /// Full distance covered by the curve.
    #[inline]
    pub fn distance(&self) -> f32 {
        let p = self.params();
        p.length * p.mean_speed()
    }

    /// Change the end speeds, keeping every distance and rescaling the lengths.
    pub fn recalc_to_speed(&mut self, start_speed: f32, speed: f32) {
        let dists = [
            self.min_distance(),
            self.max_distance(),
            self.norm_distance(),
            self.distance(),
        ];
        let p = self.params_mut();
        p.start_speed = start_speed;
        p.speed = speed;
        let mean = p.mean_speed();
        if mean == 0.0 {
            return;
        }
        p.min_length = dists[0] / mean;
        p.max_length = dists[1] / mean;
        p.norm_length = dists[2] / mean;
        p.length = dists[3] / mean;
    }

    pub fn set_length_on_rate(&mut self, rate: f32) {
        let p = self.params_mut();
        if rate != 0.0 {
            p.length = ((p.speed - p.start_speed) / rate).abs();
        }
    }

    pub fn set_length_on_distance(&mut self, dist: f32) {
        let p = self.params_mut();
        let sum = p.start_speed + p.speed;
        if sum != 0.0 {
            p.length = 2.0 * dist / sum;
        }
    }

    /// Animation seconds travelled along the curve between two world times,
    /// each clamped to the curve's window.
    pub fn distance_between(&self, start_world: f64, end_world: f64) -> f32 {
        let p = self.params();
        let start = (start_world - p.begin_world_time).max(0.0);
        let end = (end_world - p.begin_world_time).min(p.length as f64);
        if start >= p.length as f64 {
            return 0.0;
        }
        self.position_given_time(end as f32) - self.position_given_time(start as f32)
    }

    /// `[tag u8][len u16][payload]`; absent curves write tag 0 with no payload.
    pub fn write_opt<W: Write>(w: &mut W, curve: Option<&EaseCurve>) -> Result<(), WireError> {
        let Some(curve) = curve else {
            w.write_u8(TAG_NONE)?;
            w.write_u16::<LittleEndian>(0)?;
            return Ok(());
        };
        w.write_u8(match curve {
            EaseCurve::ConstAccel(_) => TAG_CONST_ACCEL,
            EaseCurve::Spline(_) => TAG_SPLINE,
        })?;
        w.write_u16::<LittleEndian>(PAYLOAD_LEN)?;
        let p = curve.params();
        for v in [
            p.min_length,
            p.max_length,
            p.norm_length,
            p.start_speed,
            p.speed,
            p.length,
        ] {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_f64::<LittleEndian>(p.begin_world_time)?;
        Ok(())
    }

    /// Read a curve written by `write_opt`. Unknown tags, short payloads and
    /// non-finite values decode as no curve; only stream failures are errors.
    pub fn read_opt<R: Read>(r: &mut R) -> Result<Option<EaseCurve>, WireError> {
        let tag = r.read_u8()?;
        let len = r.read_u16::<LittleEndian>()?;
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload)?;

        if tag == TAG_NONE {
            return Ok(None);
        }
        if tag != TAG_CONST_ACCEL && tag != TAG_SPLINE {
            warn!(target: "cadence::time", tag, "unknown ease curve tag skipped");
            return Ok(None);
        }
        if len < PAYLOAD_LEN {
            warn!(target: "cadence::time", len, "short ease curve payload skipped");
            return Ok(None);
        }

        let mut cur = payload.as_slice();
        let mut f = [0f32; 6];
        for slot in f.iter_mut() {
            *slot = cur.read_f32::<LittleEndian>()?;
        }
        let p = EaseParams {
            min_length: f[0],
            max_length: f[1],
            norm_length: f[2],
            start_speed: f[3],
            speed: f[4],
            length: f[5],
            begin_world_time: cur.read_f64::<LittleEndian>()?,
        };
        if !p.is_finite() {
            warn!(target: "cadence::time", "non-finite ease curve skipped");
            return Ok(None);
        }
        Ok(Some(if tag == TAG_CONST_ACCEL {
            EaseCurve::ConstAccel(p)
        } else {
            EaseCurve::Spline(p)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    fn ease_in(kind: EaseKind) -> EaseCurve {
        EaseCurve::create(kind, 0.5, 2.0, 1.0, 0.0, 2.0).unwrap()
    }

    #[test]
    fn velocity_reaches_target_at_end() {
        for kind in [EaseKind::ConstAccel, EaseKind::Spline] {
            let c = ease_in(kind);
            assert_relative_eq!(c.velocity_given_time(c.params().length), 2.0, epsilon = 1e-5);
            assert_relative_eq!(c.velocity_given_time(0.0), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn position_at_end_is_full_distance() {
        for kind in [EaseKind::ConstAccel, EaseKind::Spline] {
            let c = ease_in(kind);
            assert_relative_eq!(c.position_given_time(1.0), c.distance(), epsilon = 1e-5);
            assert_relative_eq!(c.distance(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn time_given_velocity_inverts_velocity() {
        for kind in [EaseKind::ConstAccel, EaseKind::Spline] {
            let c = ease_in(kind);
            let t = c.time_given_velocity(1.5);
            assert_relative_eq!(c.velocity_given_time(t), 1.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn recalc_keeps_distance() {
        let mut c = ease_in(EaseKind::ConstAccel);
        let before = c.norm_distance();
        c.recalc_to_speed(0.0, 4.0);
        assert_relative_eq!(c.norm_distance(), before, epsilon = 1e-6);
        assert_relative_eq!(c.params().length, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn length_setters() {
        let mut c = ease_in(EaseKind::ConstAccel);
        c.set_length_on_rate(4.0);
        assert_relative_eq!(c.params().length, 0.5);
        c.set_length_on_distance(3.0);
        assert_relative_eq!(c.params().length, 3.0);
    }

    #[test]
    fn distance_between_clamps_to_window() {
        let mut c = ease_in(EaseKind::ConstAccel);
        c.set_begin_world_time(10.0);
        assert_relative_eq!(c.distance_between(5.0, 20.0), c.distance(), epsilon = 1e-6);
        assert_eq!(c.distance_between(12.0, 13.0), 0.0);
    }

    #[test]
    fn unknown_tag_reads_as_none_and_consumes_payload() {
        let mut buf = vec![7u8];
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        buf.push(0xAA);
        let mut cur = Cursor::new(buf);
        assert_eq!(EaseCurve::read_opt(&mut cur).unwrap(), None);
        assert_eq!(cur.read_u8().unwrap(), 0xAA);
    }

    #[test]
    fn non_finite_payload_reads_as_none() {
        let mut c = ease_in(EaseKind::Spline);
        c.params_mut().speed = f32::NAN;
        let mut buf = Vec::new();
        EaseCurve::write_opt(&mut buf, Some(&c)).unwrap();
        assert_eq!(EaseCurve::read_opt(&mut Cursor::new(buf)).unwrap(), None);
    }
}
