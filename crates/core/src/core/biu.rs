//! Bus interface unit with mapped devices and a memory sink.
//!
//! Requests from L2 queue up bounded by credits. Each request's physical
//! address is checked against the configured `[base, size, name]` device
//! table — overlapping ranges are a fatal configuration error — and routed
//! to the matching device or to main memory, both modelled as fixed-latency
//! responders. Each response refunds one credit to L2.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::error::SimError;
use crate::config::{BiuConfig, MappedDevice};
use crate::core::memory_access::MemoryAccessInfoPtr;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::scheduler::Phase;

/// BIU statistics.
#[derive(Debug, Default)]
pub struct BiuStats {
    /// Requests serviced.
    pub reqs: u64,
    /// Requests routed to mapped devices.
    pub device_reqs: u64,
    /// Requests routed to main memory.
    pub memory_reqs: u64,
}

/// The bus interface unit.
pub struct Biu {
    req_queue: VecDeque<MemoryAccessInfoPtr>,
    req_queue_size: u32,
    latency: u64,
    devices: Vec<MappedDevice>,
    busy: bool,
    /// Counters.
    pub stats: BiuStats,
}

impl Biu {
    /// Builds the BIU; rejects malformed or overlapping device ranges.
    pub fn new(config: &BiuConfig) -> Result<Self, SimError> {
        config.validate_devices()?;
        Ok(Self {
            req_queue: VecDeque::new(),
            req_queue_size: config.biu_req_queue_size,
            latency: config.biu_latency,
            devices: config.mapped_devices.clone(),
            busy: false,
            stats: BiuStats::default(),
        })
    }

    /// A request from L2.
    pub fn receive_req(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        assert!(
            (self.req_queue.len() as u32) < self.req_queue_size,
            "BIU request queue overflows"
        );
        self.req_queue.push_back(mem);
        if !self.busy {
            let _ = sched.schedule_unique(SimEvent::BiuHandleReq, 0, Phase::Tick);
        }
    }

    /// Routes the head request to its target.
    pub fn handle_req(&mut self, sched: &mut Sched) {
        if self.req_queue.is_empty() {
            return;
        }
        self.busy = true;
        self.stats.reqs += 1;
        let addr = self.req_queue.front().expect("checked non-empty").borrow().paddr;

        let device = self
            .devices
            .iter()
            .find(|d| addr >= d.addr && addr < d.addr + d.size);
        match device {
            Some(d) => {
                self.stats.device_reqs += 1;
                debug!(addr, device = %d.name, "BIU request routed to device");
            }
            None => {
                self.stats.memory_reqs += 1;
                debug!(addr, "BIU request routed to memory");
            }
        }
        // Devices and memory alike acknowledge after the bus latency.
        let _ = sched.schedule(SimEvent::BiuTargetAck, self.latency, Phase::Tick);
    }

    /// The target acknowledged: respond to L2 and refund a credit.
    pub fn target_ack(&mut self, sched: &mut Sched) {
        let mem = self
            .req_queue
            .pop_front()
            .expect("target ack without an outstanding request");
        let _ = sched.schedule(SimEvent::BiuResp(mem), 1, Phase::Update);
        let _ = sched.schedule(SimEvent::BiuCredits(1), 0, Phase::Update);
        self.busy = false;
        if !self.req_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::BiuHandleReq, 0, Phase::Tick);
        }
    }
}
