//! Periodic wakeup scheduler and heartbeat generator.
//!
//! Both are tick-driven: the embedder's periodic timer calls
//! [`TraceRegistry::wakeup_tick`] and [`TraceRegistry::heartbeat_tick`]
//! once per tick. Start arms them when the first trace goes active; the
//! last Stop disarms them. Ticks iterate a stable snapshot of the trace
//! list, so they never contend with Create/Destroy beyond one pointer
//! read.

use core::sync::atomic::Ordering;

use crate::types::{ChannelRole, EventId, ProducerId};

use super::TraceRegistry;

impl TraceRegistry {
    /// Whether the wakeup scheduler is currently armed
    pub fn wakeup_armed(&self) -> bool {
        self.wakeup_armed.load(Ordering::Acquire)
    }

    /// Whether the heartbeat generator is currently armed
    pub fn heartbeat_armed(&self) -> bool {
        self.heartbeat_armed.load(Ordering::Acquire)
    }

    /// One wakeup scheduler tick.
    ///
    /// Forwards every pending "subbuffer ready" flag of every active trace
    /// to its transport. This is the only place delivery notifications are
    /// issued; commit itself never does blocking work.
    pub fn wakeup_tick(&self) {
        if !self.wakeup_armed() {
            return;
        }
        let traces = self.traces();
        for trace in traces.iter() {
            if !trace.is_active() {
                continue;
            }
            let transport = trace.transport();
            for channel in trace.channels() {
                channel.wakeup_readers(transport.as_ref(), trace.name());
            }
        }
    }

    /// One heartbeat generator tick.
    ///
    /// Logs a full 64-bit timestamp resynchronization event into every
    /// channel carrying truncated timestamps, for every registered
    /// producer slot, so decoders can reconstruct full time between
    /// subbuffer headers.
    pub fn heartbeat_tick(&self) {
        if !self.heartbeat_armed() {
            return;
        }
        let traces = self.traces();
        let producers = self.producers().registered();
        for trace in traces.iter() {
            if !trace.is_active() || !trace.info().heartbeat() {
                continue;
            }
            let tsc = self.clock().cycles();
            for channel in trace.channels() {
                if !channel.encoding().needs_heartbeat() {
                    continue;
                }
                for slot in 0..producers {
                    let producer = ProducerId::new(slot);
                    let outcome = if channel.role() == ChannelRole::Compact {
                        // The data bits carry the counter bits above the
                        // compact timestamp window.
                        let high = (tsc
                            >> (crate::codec::TSC_LSB_TRUNCATE + crate::codec::COMPACT_TSC_BITS))
                            as u32;
                        channel.log_compact(producer, EventId::HEARTBEAT, high)
                    } else {
                        channel.log_event(producer, EventId::HEARTBEAT, &tsc.to_le_bytes())
                    };
                    if outcome.is_err() {
                        // Heartbeats are droppable like any other event;
                        // the loss is already counted by the buffer.
                        log::trace!(
                            "trace {}: heartbeat dropped on {} producer {slot}",
                            trace.name(),
                            channel.name()
                        );
                    }
                }
            }
        }
    }
}
