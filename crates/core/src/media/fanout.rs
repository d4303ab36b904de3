//! Fan-out of NAL units from the single framer to every attached client.
//!
//! Each subscriber owns a bounded queue. A subscriber only sees units
//! published after it subscribed, and dropping the [`NalSubscription`]
//! removes it on the next publish. A slow subscriber loses its oldest units
//! instead of holding back the framer or the other clients.
//!
//! The fan-out also remembers the latest SPS and PPS it forwarded, so a
//! late joiner can describe the stream before the next key frame.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::h264::{NAL_PPS, NAL_SPS, NalUnit};

const PARAMETER_SET_POLL: Duration = Duration::from_millis(20);

/// Roughly two seconds of 1080p30 all-intra output.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug)]
struct Subscriber {
    queue: Mutex<VecDeque<NalUnit>>,
    ready: Condvar,
    capacity: usize,
}

#[derive(Debug, Default)]
struct ParameterSets {
    sps: Option<NalUnit>,
    pps: Option<NalUnit>,
}

#[derive(Debug, Clone)]
pub struct NalFanout {
    subscribers: Arc<Mutex<Vec<Weak<Subscriber>>>>,
    parameter_sets: Arc<Mutex<ParameterSets>>,
    capacity: usize,
}

impl Default for NalFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl NalFanout {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            parameter_sets: Arc::new(Mutex::new(ParameterSets::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> NalSubscription {
        let subscriber = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: self.capacity,
        });
        let mut subscribers = self.subscribers.lock();
        subscribers.push(Arc::downgrade(&subscriber));
        tracing::debug!(subscribers = subscribers.len(), "stream subscriber attached");
        NalSubscription { inner: subscriber }
    }

    /// Hand a batch of units to every live subscriber.
    pub fn publish(&self, units: &[NalUnit]) {
        if units.is_empty() {
            return;
        }
        self.remember_parameter_sets(units);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| {
            let Some(subscriber) = weak.upgrade() else {
                return false;
            };
            let mut queue = subscriber.queue.lock();
            let mut dropped = 0usize;
            for unit in units {
                if queue.len() == subscriber.capacity {
                    queue.pop_front();
                    dropped += 1;
                }
                queue.push_back(unit.clone());
            }
            drop(queue);
            if dropped > 0 {
                tracing::trace!(dropped, "subscriber queue full, oldest units dropped");
            }
            subscriber.ready.notify_one();
            true
        });
    }

    fn remember_parameter_sets(&self, units: &[NalUnit]) {
        for unit in units {
            match unit.nal_type() {
                NAL_SPS => self.parameter_sets.lock().sps = Some(unit.clone()),
                NAL_PPS => self.parameter_sets.lock().pps = Some(unit.clone()),
                _ => {}
            }
        }
    }

    /// Latest SPS and PPS seen, once both are known.
    pub fn parameter_sets(&self) -> Option<(NalUnit, NalUnit)> {
        let sets = self.parameter_sets.lock();
        Some((sets.sps.clone()?, sets.pps.clone()?))
    }

    /// Wait up to `timeout` for both parameter sets to be published.
    pub fn wait_for_parameter_sets(&self, timeout: Duration) -> Option<(NalUnit, NalUnit)> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(sets) = self.parameter_sets() {
                return Some(sets);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(PARAMETER_SET_POLL);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// One client's view of the stream.
#[derive(Debug)]
pub struct NalSubscription {
    inner: Arc<Subscriber>,
}

impl NalSubscription {
    /// Take every pending unit, waiting up to `timeout` for at least one.
    /// Returns an empty vector on timeout.
    pub fn drain(&self, timeout: Duration) -> Vec<NalUnit> {
        let mut queue = self.inner.queue.lock();
        if queue.is_empty() {
            self.inner.ready.wait_for(&mut queue, timeout);
        }
        queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unit(tag: u8) -> NalUnit {
        NalUnit::new(&[0x41, tag])
    }

    #[test]
    fn subscriber_sees_only_later_units() {
        let fanout = NalFanout::new();
        fanout.publish(&[unit(1)]);
        let sub = fanout.subscribe();
        fanout.publish(&[unit(2), unit(3)]);
        let got = sub.drain(Duration::from_millis(10));
        assert_eq!(got, vec![unit(2), unit(3)]);
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let fanout = NalFanout::new();
        let a = fanout.subscribe();
        let b = fanout.subscribe();
        fanout.publish(&[unit(7)]);
        assert_eq!(a.drain(Duration::from_millis(10)), vec![unit(7)]);
        assert_eq!(b.drain(Duration::from_millis(10)), vec![unit(7)]);
    }

    #[test]
    fn drain_times_out_empty() {
        let fanout = NalFanout::new();
        let sub = fanout.subscribe();
        assert!(sub.drain(Duration::from_millis(20)).is_empty());
    }

    #[test]
    fn drain_wakes_on_publish() {
        let fanout = NalFanout::new();
        let sub = fanout.subscribe();
        let publisher = fanout.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish(&[unit(9)]);
        });
        let got = sub.drain(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(got, vec![unit(9)]);
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let fanout = NalFanout::new();
        let sub = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 1);
        drop(sub);
        assert_eq!(fanout.subscriber_count(), 0);
        fanout.publish(&[unit(1)]);
        assert!(fanout.subscribers.lock().is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let fanout = NalFanout::with_capacity(2);
        let sub = fanout.subscribe();
        fanout.publish(&[unit(1), unit(2), unit(3)]);
        assert_eq!(sub.drain(Duration::from_millis(10)), vec![unit(2), unit(3)]);
    }

    #[test]
    fn latest_parameter_sets_are_remembered() {
        let fanout = NalFanout::new();
        assert!(fanout.parameter_sets().is_none());
        fanout.publish(&[NalUnit::new(&[0x67, 0x01]), NalUnit::new(&[0x65, 0x00])]);
        assert!(fanout.parameter_sets().is_none(), "PPS still missing");

        fanout.publish(&[NalUnit::new(&[0x68, 0x02])]);
        fanout.publish(&[NalUnit::new(&[0x67, 0x03])]);
        let (sps, pps) = fanout.parameter_sets().unwrap();
        assert_eq!(sps.data(), &[0x67, 0x03]);
        assert_eq!(pps.data(), &[0x68, 0x02]);
    }

    #[test]
    fn waiting_for_parameter_sets_times_out() {
        let fanout = NalFanout::new();
        let started = Instant::now();
        assert!(fanout.wait_for_parameter_sets(Duration::from_millis(60)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
