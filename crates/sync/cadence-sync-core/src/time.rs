//! Time converter records.

use cadence_animation::{EaseSlot, PlaybackFlags, TimeConvert, TimeConvertState};

use crate::error::{SyncError, SyncResult};
use crate::record::{StateRecord, SyncValue};
use crate::synched::{ApplyContext, SynchedState};

pub const FLAGS: &str = "flags";
pub const LAST_STATE_ANIM_TIME: &str = "last_state_anim_time";
pub const LAST_STATE_CHANGE_WORLD_TIME: &str = "last_state_change_world_time";
pub const LOOP_BEGIN: &str = "loop_begin";
pub const LOOP_END: &str = "loop_end";
pub const SPEED: &str = "speed";
pub const CUR_EASE_CURVE: &str = "cur_ease_curve";
pub const CUR_EASE_BEGIN_WORLD_TIME: &str = "cur_ease_begin_world_time";

pub(crate) fn put_time_state(state: &TimeConvertState, rec: &mut StateRecord) {
    rec.set(FLAGS, SyncValue::UInt(state.flags.to_bits() as u64));
    rec.set(LAST_STATE_ANIM_TIME, SyncValue::Float(state.last_state_anim_time));
    rec.set(
        LAST_STATE_CHANGE_WORLD_TIME,
        SyncValue::Double(state.last_state_change_world_time),
    );
    rec.set(LOOP_BEGIN, SyncValue::Float(state.loop_begin));
    rec.set(LOOP_END, SyncValue::Float(state.loop_end));
    rec.set(SPEED, SyncValue::Float(state.speed));
    rec.set(CUR_EASE_CURVE, SyncValue::UInt(state.ease_slot.to_index() as u64));
    rec.set(
        CUR_EASE_BEGIN_WORLD_TIME,
        SyncValue::Double(state.ease_begin_world_time),
    );
}

pub(crate) fn time_state_from(rec: &StateRecord) -> SyncResult<TimeConvertState> {
    let bits = rec.uint(FLAGS)?;
    let bits = u32::try_from(bits)
        .map_err(|_| SyncError::out_of_range(FLAGS, format!("{bits:#x} exceeds 32 bits")))?;
    let slot = rec.uint(CUR_EASE_CURVE)?;
    let ease_slot = u8::try_from(slot)
        .ok()
        .and_then(EaseSlot::from_index)
        .ok_or_else(|| SyncError::out_of_range(CUR_EASE_CURVE, format!("no ease slot {slot}")))?;
    let loop_begin = rec.float(LOOP_BEGIN)?;
    let loop_end = rec.float(LOOP_END)?;
    if loop_begin > loop_end {
        return Err(SyncError::out_of_range(
            LOOP_BEGIN,
            format!("loop [{loop_begin}, {loop_end}] is reversed"),
        ));
    }
    Ok(TimeConvertState {
        flags: PlaybackFlags::from_bits(bits),
        last_state_anim_time: rec.float(LAST_STATE_ANIM_TIME)?,
        last_state_change_world_time: rec.double(LAST_STATE_CHANGE_WORLD_TIME)?,
        loop_begin,
        loop_end,
        speed: rec.float(SPEED)?,
        ease_slot,
        ease_begin_world_time: rec.double(CUR_EASE_BEGIN_WORLD_TIME)?,
    })
}

impl SynchedState for TimeConvert {
    fn record_name(&self) -> &'static str {
        "time_convert"
    }

    fn put_current_state_into(&self, rec: &mut StateRecord) {
        put_time_state(&self.capture_state(), rec);
    }

    fn set_current_state_from(
        &mut self,
        rec: &StateRecord,
        ctx: &mut ApplyContext<'_>,
    ) -> SyncResult<()> {
        let state = time_state_from(rec)?;
        self.restore_state(&state, ctx.replay_elapsed, ctx.now);
        // Received state is authoritative; it must not echo back out as dirty.
        self.take_dirty();
        for msg in self.take_outgoing() {
            ctx.out.dispatch(msg);
        }
        Ok(())
    }
}
