//! Allocation ledger for installed channel nodes (feature `alloc-tracking`).
//!
//! Entries are keyed by instance id and channel index, never by address, so
//! a dump stays meaningful across clones of the manager.

use std::collections::BTreeMap;

use tracing::debug;

use cadence_message::InstanceId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub anim: String,
    pub channel: String,
}

#[derive(Clone, Debug, Default)]
pub struct AllocLedger {
    entries: BTreeMap<(InstanceId, usize), LedgerEntry>,
}

impl AllocLedger {
    pub fn record(&mut self, instance: InstanceId, channel_idx: usize, anim: &str, channel: &str) {
        self.entries.insert(
            (instance, channel_idx),
            LedgerEntry {
                anim: anim.to_string(),
                channel: channel.to_string(),
            },
        );
    }

    pub fn release_instance(&mut self, instance: InstanceId) {
        self.entries.retain(|(id, _), _| *id != instance);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, instance: InstanceId, channel_idx: usize) -> Option<&LedgerEntry> {
        self.entries.get(&(instance, channel_idx))
    }

    /// Log every outstanding entry; returns how many there were.
    pub fn dump(&self) -> usize {
        for ((id, ch), entry) in &self.entries {
            debug!(
                target: "cadence::blend",
                instance = id.0,
                channel_idx = ch,
                anim = %entry.anim,
                channel = %entry.channel,
                "outstanding channel node"
            );
        }
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_drops_only_that_instance() {
        let mut l = AllocLedger::default();
        l.record(InstanceId(0), 0, "walk", "hip");
        l.record(InstanceId(0), 1, "walk", "knee");
        l.record(InstanceId(1), 0, "wave", "hip");
        l.release_instance(InstanceId(0));
        assert_eq!(l.dump(), 1);
        assert_eq!(l.get(InstanceId(1), 0).map(|e| e.anim.as_str()), Some("wave"));
    }
}
