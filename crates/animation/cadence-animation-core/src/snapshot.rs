//! Immutable records of time converter state and the position math shared by
//! live evaluation and historical queries.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use cadence_message::WireError;

use crate::ease::EaseCurve;
use crate::flags::PlaybackFlags;

/// Playback window a position is resolved against.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Window {
    pub begin: f32,
    pub end: f32,
    pub loop_begin: f32,
    pub loop_end: f32,
    pub wrap_time: f32,
}

/// Result of folding a pre-wrap position back into the playback window.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Resolved {
    pub secs: f32,
    /// The position reached a bound (or the wrap time) and playback must stop.
    pub stop: bool,
}

/// Fold `secs` into `win`.
///
/// `origin` is the anim time the current state started at; a loop the state
/// did not start inside is never entered. `from` is the position before this
/// step and decides whether the wrap time was crossed.
pub(crate) fn resolve_position(
    win: &Window,
    flags: &PlaybackFlags,
    origin: f32,
    from: f32,
    mut secs: f32,
    forwards: bool,
) -> Resolved {
    let mut stop = false;

    if flags.looped {
        let span = win.loop_end - win.loop_begin;
        let mut wrapped = false;

        if forwards {
            if origin > win.loop_end {
                if secs > win.end {
                    secs = win.end;
                    stop = true;
                }
            } else if secs > win.loop_end {
                let w = (secs - win.loop_begin) % span + win.loop_begin;
                if w.is_finite() {
                    secs = w;
                    wrapped = true;
                } else {
                    warn!(target: "cadence::time", span, "degenerate loop window, wrap discarded");
                    secs = from;
                }
            }
        } else if origin < win.loop_begin {
            if secs < win.begin {
                secs = win.begin;
                stop = true;
            }
        } else if secs < win.loop_begin {
            let w = win.loop_end - (win.loop_end - secs) % span;
            if w.is_finite() {
                secs = w;
                wrapped = true;
            } else {
                warn!(target: "cadence::time", span, "degenerate loop window, wrap discarded");
                secs = from;
            }
        }

        if flags.wrap {
            let wt = win.wrap_time;
            let crossed = (wrapped && ((forwards && secs >= wt) || (!forwards && secs <= wt)))
                || (forwards && from < wt && secs >= wt)
                || (!forwards && from > wt && secs <= wt);
            if crossed {
                secs = wt;
                stop = true;
            }
        }
    } else if secs < win.begin || secs > win.end {
        secs = if forwards { win.end } else { win.begin };
        stop = true;
    }

    Resolved { secs, stop }
}

/// Converter state captured at one state change.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    pub start_world_time: f64,
    pub start_anim_time: f32,
    pub flags: PlaybackFlags,
    pub begin: f32,
    pub end: f32,
    pub loop_begin: f32,
    pub loop_end: f32,
    pub speed: f32,
    pub wrap_time: f32,
    pub ease: Option<EaseCurve>,
}

impl StateSnapshot {
    pub(crate) fn window(&self) -> Window {
        Window {
            begin: self.begin,
            end: self.end,
            loop_begin: self.loop_begin,
            loop_end: self.loop_end,
            wrap_time: self.wrap_time,
        }
    }

    /// Animation time this state maps `world` to, without touching live state.
    pub fn anim_time_at(&self, world: f64) -> f32 {
        if self.flags.stopped {
            return self.start_anim_time;
        }

        let mut delta = match &self.ease {
            Some(curve) => {
                let mut d = curve.distance_between(self.start_world_time, world);
                let end = curve.end_world_time();
                if world > end && self.flags.easing_in {
                    d += (world - end) as f32 * self.speed;
                }
                d
            }
            None => (world - self.start_world_time) as f32 * self.speed,
        };
        if self.flags.backwards {
            delta = -delta;
        }

        let secs = self.start_anim_time + delta;
        resolve_position(
            &self.window(),
            &self.flags,
            self.start_anim_time,
            self.start_anim_time,
            secs,
            delta >= 0.0,
        )
        .secs
    }

    /// Whether the converter reports itself stopped while this state is current.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flags.stopped && !self.flags.forced_move
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        w.write_f64::<LittleEndian>(self.start_world_time)?;
        w.write_f32::<LittleEndian>(self.start_anim_time)?;
        w.write_u32::<LittleEndian>(self.flags.to_bits())?;
        for v in [
            self.begin,
            self.end,
            self.loop_begin,
            self.loop_end,
            self.speed,
            self.wrap_time,
        ] {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_u8(self.ease.is_some() as u8)?;
        if let Some(curve) = &self.ease {
            EaseCurve::write_opt(w, Some(curve))?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let start_world_time = r.read_f64::<LittleEndian>()?;
        let start_anim_time = r.read_f32::<LittleEndian>()?;
        let flags = PlaybackFlags::from_bits(r.read_u32::<LittleEndian>()?);
        let begin = r.read_f32::<LittleEndian>()?;
        let end = r.read_f32::<LittleEndian>()?;
        let loop_begin = r.read_f32::<LittleEndian>()?;
        let loop_end = r.read_f32::<LittleEndian>()?;
        let speed = r.read_f32::<LittleEndian>()?;
        let wrap_time = r.read_f32::<LittleEndian>()?;
        let ease = if r.read_u8()? != 0 {
            EaseCurve::read_opt(r)?
        } else {
            None
        };
        Ok(Self {
            start_world_time,
            start_anim_time,
            flags,
            begin,
            end,
            loop_begin,
            loop_end,
            speed,
            wrap_time,
            ease,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ease::EaseKind;
    use std::io::Cursor;

    fn playing(looped: bool) -> StateSnapshot {
        StateSnapshot {
            start_world_time: 0.0,
            start_anim_time: 0.0,
            flags: PlaybackFlags {
                looped,
                easing_in: true,
                ..Default::default()
            },
            begin: 0.0,
            end: 10.0,
            loop_begin: 2.0,
            loop_end: 8.0,
            speed: 1.0,
            wrap_time: 0.0,
            ease: None,
        }
    }

    #[test]
    fn clamps_without_loop() {
        let s = playing(false);
        assert_eq!(s.anim_time_at(4.0), 4.0);
        assert_eq!(s.anim_time_at(25.0), 10.0);
    }

    #[test]
    fn wraps_inside_loop() {
        let s = playing(true);
        assert_eq!(s.anim_time_at(9.0), 3.0);
    }

    #[test]
    fn stopped_state_holds_position() {
        let mut s = playing(false);
        s.flags.stopped = true;
        s.start_anim_time = 6.5;
        assert_eq!(s.anim_time_at(100.0), 6.5);
    }

    #[test]
    fn zero_width_loop_leaves_position() {
        let win = Window {
            begin: 0.0,
            end: 10.0,
            loop_begin: 5.0,
            loop_end: 5.0,
            wrap_time: 0.0,
        };
        let flags = PlaybackFlags {
            looped: true,
            ..Default::default()
        };
        let r = resolve_position(&win, &flags, 1.0, 4.5, 5.5, true);
        assert_eq!(r.secs, 4.5);
        assert!(!r.stop);
    }

    #[test]
    fn wrap_time_stops_forward_crossing() {
        let win = Window {
            begin: 0.0,
            end: 10.0,
            loop_begin: 0.0,
            loop_end: 10.0,
            wrap_time: 3.0,
        };
        let flags = PlaybackFlags {
            looped: true,
            wrap: true,
            ..Default::default()
        };
        let r = resolve_position(&win, &flags, 8.0, 9.0, 11.5, true);
        assert!(!r.stop);
        assert_eq!(r.secs, 1.5);
        let r = resolve_position(&win, &flags, 8.0, 1.5, 4.0, true);
        assert!(r.stop);
        assert_eq!(r.secs, 3.0);
    }

    #[test]
    fn snapshot_stream_keeps_ease() {
        let mut s = playing(true);
        s.ease = EaseCurve::create(EaseKind::Spline, 1.0, 1.0, 1.0, 0.0, 1.0);
        let mut buf = Vec::new();
        s.write(&mut buf).unwrap();
        assert_eq!(StateSnapshot::read(&mut Cursor::new(buf)).unwrap(), s);
    }
}
