//! Responder records.

use cadence_responder::{CompletedEvents, Responder, ResponderSyncState};

use crate::error::{SyncError, SyncResult};
use crate::record::{StateRecord, SyncValue};
use crate::synched::{ApplyContext, SynchedState};

pub const CUR_STATE: &str = "cur_state";
pub const CUR_COMMAND: &str = "cur_command";
pub const NET_REQUEST: &str = "net_request";
pub const COMPLETED_EVENTS: &str = "completed_events";
pub const PLAYER_KEY: &str = "player_key";
pub const TRIGGERER_KEY: &str = "triggerer_key";

fn completed_to_words(c: CompletedEvents) -> Vec<SyncValue> {
    let bits = c.to_bits();
    vec![
        SyncValue::UInt(bits as u64),
        SyncValue::UInt((bits >> 64) as u64),
    ]
}

fn completed_from_words(words: &[SyncValue]) -> SyncResult<CompletedEvents> {
    if words.len() > 2 {
        return Err(SyncError::out_of_range(
            COMPLETED_EVENTS,
            format!("{} words, at most 2", words.len()),
        ));
    }
    let mut bits = 0u128;
    for (i, w) in words.iter().enumerate() {
        let SyncValue::UInt(w) = w else {
            return Err(SyncError::WrongType {
                field: COMPLETED_EVENTS.to_string(),
                expected: "uint",
            });
        };
        bits |= (*w as u128) << (64 * i);
    }
    Ok(CompletedEvents::from_bits(bits))
}

fn sync_state_from(rec: &StateRecord) -> SyncResult<ResponderSyncState> {
    let state = rec.int(CUR_STATE)?;
    let cur_state = u8::try_from(state)
        .map_err(|_| SyncError::out_of_range(CUR_STATE, format!("{state}")))?;
    let cmd = rec.int(CUR_COMMAND)?;
    let cur_command = match cmd {
        -1 => None,
        c => Some(
            u8::try_from(c).map_err(|_| SyncError::out_of_range(CUR_COMMAND, format!("{c}")))?,
        ),
    };
    Ok(ResponderSyncState {
        cur_state,
        cur_command,
        net_request: rec.bool(NET_REQUEST)?,
        completed: completed_from_words(rec.list(COMPLETED_EVENTS)?)?,
        player: rec.key(PLAYER_KEY)?,
        triggerer: rec.key(TRIGGERER_KEY)?,
    })
}

impl SynchedState for Responder {
    fn record_name(&self) -> &'static str {
        "responder"
    }

    fn put_current_state_into(&self, rec: &mut StateRecord) {
        let s = self.capture_sync_state();
        rec.set(CUR_STATE, SyncValue::Int(s.cur_state as i64));
        rec.set(
            CUR_COMMAND,
            SyncValue::Int(s.cur_command.map_or(-1, |c| c as i64)),
        );
        rec.set(NET_REQUEST, SyncValue::Bool(s.net_request));
        rec.set(COMPLETED_EVENTS, SyncValue::List(completed_to_words(s.completed)));
        rec.set(PLAYER_KEY, SyncValue::Key(s.player));
        rec.set(TRIGGERER_KEY, SyncValue::Key(s.triggerer));
    }

    fn set_current_state_from(
        &mut self,
        rec: &StateRecord,
        ctx: &mut ApplyContext<'_>,
    ) -> SyncResult<()> {
        let state = sync_state_from(rec)?;
        self.apply_sync_state(&state)?;
        self.restore(ctx.join_order, &mut ctx.out);
        Ok(())
    }
}
