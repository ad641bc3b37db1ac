//! Fan-out/fan-in barrier for grouped targets.
//!
//! A command sent to the aggregator is re-addressed to every destination.
//! Completion callbacks embedded in it are redirected back to the aggregator
//! and counted; the requester receives a single merged completion once every
//! destination has reported.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::key::EntityKey;
use crate::message::Message;

#[derive(Clone, Debug)]
struct Barrier {
    /// The callback exactly as the requester built it.
    original: Message,
    remaining: usize,
    net_propagate: bool,
}

#[derive(Clone, Debug)]
pub struct MessageAggregator {
    key: EntityKey,
    locally_owned: bool,
    destinations: Vec<EntityKey>,
    barriers: HashMap<u64, Barrier>,
    next_token: u64,
}

impl MessageAggregator {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            locally_owned: true,
            destinations: Vec::new(),
            barriers: HashMap::new(),
            next_token: 0,
        }
    }

    #[inline]
    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn set_locally_owned(&mut self, owned: bool) {
        self.locally_owned = owned;
    }

    pub fn add_destination(&mut self, key: EntityKey) {
        if !self.destinations.contains(&key) {
            self.destinations.push(key);
        }
    }

    pub fn remove_destination(&mut self, key: EntityKey) {
        self.destinations.retain(|k| *k != key);
    }

    pub fn destinations(&self) -> &[EntityKey] {
        &self.destinations
    }

    /// Number of barriers still waiting for replies.
    pub fn pending(&self) -> usize {
        self.barriers.len()
    }

    /// Send a copy of `msg` to every destination. `msg` itself is left untouched.
    pub fn forward<D: Dispatcher + ?Sized>(&self, msg: &Message, out: &mut D) {
        let mut copy = msg.clone();
        copy.receivers = self.destinations.clone();
        out.dispatch(copy);
    }

    /// Forward `msg`, arming one barrier per embedded event callback.
    pub fn forward_with_callbacks<D: Dispatcher + ?Sized>(&mut self, msg: &Message, out: &mut D) {
        if self.destinations.is_empty() {
            warn!(
                target: "cadence::aggregator",
                key = %self.key,
                body = msg.body.name(),
                "forward with no destinations dropped"
            );
            return;
        }

        let mut copy = msg.clone();
        let count = self.destinations.len();
        if let Some(callbacks) = copy.callbacks_mut() {
            for cb_msg in callbacks.iter_mut() {
                if cb_msg.event_callback().is_none() {
                    continue;
                }
                self.next_token += 1;
                let token = self.next_token;
                self.barriers.insert(
                    token,
                    Barrier {
                        original: cb_msg.clone(),
                        remaining: count,
                        net_propagate: cb_msg.flags.net_propagate,
                    },
                );
                cb_msg.receivers = vec![self.key];
                cb_msg.flags.net_propagate = false;
                if let Some(cb) = cb_msg.event_callback_mut() {
                    cb.token = token;
                }
                debug!(
                    target: "cadence::aggregator",
                    key = %self.key,
                    token,
                    count,
                    "barrier armed"
                );
            }
        }
        copy.receivers = self.destinations.clone();
        out.dispatch(copy);
    }

    /// Count a completion callback addressed to this aggregator.
    ///
    /// Returns `false` when the callback matches no armed barrier; it is then dropped.
    pub fn receive<D: Dispatcher + ?Sized>(&mut self, msg: &Message, out: &mut D) -> bool {
        let Some(token) = msg.event_callback().map(|cb| cb.token) else {
            return false;
        };
        let done = match self.barriers.get_mut(&token) {
            Some(barrier) => {
                barrier.remaining = barrier.remaining.saturating_sub(1);
                barrier.remaining == 0
            }
            None => {
                warn!(
                    target: "cadence::aggregator",
                    key = %self.key,
                    token,
                    "callback with no matching barrier dropped"
                );
                return false;
            }
        };
        if done {
            if let Some(barrier) = self.barriers.remove(&token) {
                let mut merged = barrier.original;
                merged.flags.net_propagate = barrier.net_propagate && self.locally_owned;
                debug!(
                    target: "cadence::aggregator",
                    key = %self.key,
                    token,
                    "barrier complete"
                );
                out.dispatch(merged);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::BroadcastFlags;
    use crate::message::{AnimCmd, AnimCommand, CallbackEvent, EventCallback, MessageBody};

    fn reply_for(fwd: &Message) -> Message {
        let cb = &fwd.callbacks().unwrap()[0];
        cb.clone()
    }

    #[test]
    fn forward_readdresses_a_copy() {
        let mut agg = MessageAggregator::new(EntityKey(100));
        agg.add_destination(EntityKey(1));
        agg.add_destination(EntityKey(2));
        let msg = Message::new(MessageBody::Enable { enable: true }).to(EntityKey(100));
        let mut out = Vec::new();
        agg.forward(&msg, &mut out);
        assert_eq!(out[0].receivers, vec![EntityKey(1), EntityKey(2)]);
        assert_eq!(msg.receivers, vec![EntityKey(100)]);
    }

    #[test]
    fn merged_completion_restores_requester_and_propagation() {
        let mut agg = MessageAggregator::new(EntityKey(100));
        agg.add_destination(EntityKey(1));
        agg.add_destination(EntityKey(2));

        let cb = Message::callback(EntityKey(7), EventCallback::new(CallbackEvent::Stop, 3))
            .from(EntityKey(8))
            .with_flags(BroadcastFlags::propagated());
        let mut cmd = AnimCommand::new("lift").with(AnimCmd::Continue);
        cmd.callbacks.push(cb.clone());
        let msg = Message::new(MessageBody::AnimCmd(cmd));

        let mut out = Vec::new();
        agg.forward_with_callbacks(&msg, &mut out);
        let redirected = reply_for(&out[0]);
        assert_eq!(redirected.receivers, vec![EntityKey(100)]);
        assert!(!redirected.flags.net_propagate);

        let mut merged = Vec::new();
        assert!(agg.receive(&redirected, &mut merged));
        assert!(merged.is_empty());
        assert!(agg.receive(&redirected, &mut merged));
        assert_eq!(merged, vec![cb]);
        assert_eq!(agg.pending(), 0);
    }

    #[test]
    fn remote_aggregator_does_not_repropagate() {
        let mut agg = MessageAggregator::new(EntityKey(100));
        agg.set_locally_owned(false);
        agg.add_destination(EntityKey(1));
        let cb = Message::callback(EntityKey(7), EventCallback::new(CallbackEvent::Stop, 0))
            .with_flags(BroadcastFlags::propagated());
        let mut cmd = AnimCommand::new("");
        cmd.callbacks.push(cb);
        let mut out = Vec::new();
        agg.forward_with_callbacks(&Message::new(MessageBody::AnimCmd(cmd)), &mut out);
        let reply = reply_for(&out[0]);
        let mut merged = Vec::new();
        agg.receive(&reply, &mut merged);
        assert!(!merged[0].flags.net_propagate);
    }

    #[test]
    fn unmatched_callback_is_dropped() {
        let mut agg = MessageAggregator::new(EntityKey(100));
        let stray = Message::callback(
            EntityKey(100),
            EventCallback::new(CallbackEvent::Stop, 0).with_token(42),
        );
        let mut out = Vec::new();
        assert!(!agg.receive(&stray, &mut out));
        assert!(out.is_empty());
    }
}
