//! Prefetcher credit flow and engine scenarios.

use pretty_assertions::assert_eq;

use rvperf_core::config::{PrefetcherConfig, PrefetcherType};
use rvperf_core::core::memory_access::MemoryAccessInfo;
use rvperf_core::core::prefetcher::Prefetcher;
use rvperf_core::sim::event::{Sched, SimEvent};

/// Drives a stand-alone prefetcher through its own event loop, returning
/// the emitted prefetch addresses.
fn drive(prefetcher: &mut Prefetcher, accesses: &[u64]) -> Vec<u64> {
    let mut sched = Sched::new();
    prefetcher.send_initial_credits(&mut sched);
    for &addr in accesses {
        prefetcher.process_incoming_req(MemoryAccessInfo::for_addr(addr), &mut sched);
    }

    let mut emitted = Vec::new();
    while let Some((_, ev)) = sched.pop() {
        match ev {
            SimEvent::PrefetcherHandleIncoming => prefetcher.handle_incoming(&mut sched),
            SimEvent::PrefetcherGenerate => prefetcher.generate_prefetch(&mut sched),
            SimEvent::PrefetchEmit(mem) => emitted.push(mem.borrow().paddr),
            _ => {}
        }
    }
    emitted
}

fn config(ty: PrefetcherType, num: u32) -> PrefetcherConfig {
    PrefetcherConfig {
        enable_prefetcher: true,
        prefetcher_type: ty,
        num_to_prefetch: num,
        cacheline_size: 64,
        stride_confidence_threshold: 1,
        ..PrefetcherConfig::default()
    }
}

/// Next-line, N=2, line=64: one access yields the two following lines.
#[test]
fn test_next_line_two_prefetches() {
    let mut prefetcher = Prefetcher::new(&config(PrefetcherType::NextLine, 2));
    let emitted = drive(&mut prefetcher, &[0x1000]);
    assert_eq!(emitted, vec![0x1040, 0x1080]);
    assert!(!prefetcher.is_prefetch_ready());
}

/// Stride, N=2, threshold=1: two observations establish the stride, the
/// third triggers two strided prefetches.
#[test]
fn test_stride_prefetch_after_confidence() {
    let mut prefetcher = Prefetcher::new(&config(PrefetcherType::Stride, 2));
    let emitted = drive(&mut prefetcher, &[0x1000, 0x1100]);
    assert!(emitted.is_empty());

    let emitted = drive(&mut prefetcher, &[0x1200]);
    assert_eq!(emitted, vec![0x1300, 0x1400]);
}

/// Emission consumes downstream credits; refunds restart it.
#[test]
fn test_credit_gated_emission() {
    let mut config = config(PrefetcherType::NextLine, 2);
    config.req_queue_size = 1;
    let mut prefetcher = Prefetcher::new(&config);
    // One downstream credit only: the second prefetch waits.
    let emitted = drive(&mut prefetcher, &[0x1000]);
    assert_eq!(emitted, vec![0x1040]);
    assert!(prefetcher.is_prefetch_ready());

    // Refund a credit; the waiting prefetch goes out.
    let mut sched = Sched::new();
    prefetcher.receive_queue_credits(1, &mut sched);
    let mut emitted = Vec::new();
    while let Some((_, ev)) = sched.pop() {
        match ev {
            SimEvent::PrefetcherGenerate => prefetcher.generate_prefetch(&mut sched),
            SimEvent::PrefetchEmit(mem) => emitted.push(mem.borrow().paddr),
            _ => {}
        }
    }
    assert_eq!(emitted, vec![0x1080]);
}

/// A flush clears the ingress queue and refunds producer credits.
#[test]
fn test_flush_refunds_ingress() {
    let mut prefetcher = Prefetcher::new(&config(PrefetcherType::NextLine, 1));
    let mut sched = Sched::new();
    prefetcher.process_incoming_req(MemoryAccessInfo::for_addr(0x1000), &mut sched);
    prefetcher.process_incoming_req(MemoryAccessInfo::for_addr(0x2000), &mut sched);

    prefetcher.handle_flush(&mut sched);
    let mut refunded = 0;
    while let Some((_, ev)) = sched.pop() {
        if let SimEvent::PrefetcherIngressCredits(n) = ev {
            refunded += n;
        }
    }
    assert_eq!(refunded, 2);
    assert!(!prefetcher.is_prefetch_ready());
}
