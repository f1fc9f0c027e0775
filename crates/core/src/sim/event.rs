//! The simulator's event and wire vocabulary.
//!
//! Cross-unit communication happens exclusively through these events: a
//! unit "sends on a port" by scheduling a wire variant with a delay, and
//! the simulator's dispatch loop delivers it to the consuming unit's
//! handler. Unit-internal events (the payload-free variants at the bottom)
//! coalesce per-cycle via `Scheduler::schedule_unique`.

use crate::core::fetch::bpu::{PredictionOutput, PredictionRequest, UpdateInput};
use crate::core::flush::FlushingCriteria;
use crate::core::inst::{InstGroup, InstPtr, TargetUnit};
use crate::core::lsu::ldst_info::LoadStoreInstInfoPtr;
use crate::core::memory_access::MemoryAccessInfoPtr;
use crate::sim::scheduler::Scheduler;

/// Scheduler specialised to the simulator's event type.
pub type Sched = Scheduler<SimEvent>;

/// Source/destination tags on L2 transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2Unit {
    Icache,
    Dcache,
    Biu,
}

/// Every wire and internal event in the machine.
#[derive(Clone)]
pub enum SimEvent {
    // ---- Fetch <-> ICache ----
    /// Fetch requests an instruction block.
    IcacheFetchReq(MemoryAccessInfoPtr),
    /// ICache answers a fetch request (HIT or MISS).
    IcacheFetchResp(MemoryAccessInfoPtr),
    /// ICache request-queue credits to Fetch.
    IcacheFetchCredits(u32),

    // ---- Fetch -> Decode -> Rename -> Dispatch ----
    /// Fetch sends an instruction group to Decode.
    DecodeInsts(InstGroup),
    /// Decode input-queue credits to Fetch.
    DecodeCredits(u32),
    /// Decode sends an instruction group to Rename.
    RenameInsts(InstGroup),
    /// Rename uop-queue credits to Decode.
    RenameCredits(u32),
    /// Rename notifies Decode that a vset cleared rename.
    VsetCleared(InstPtr),
    /// Rename sends a renamed group to Dispatch.
    DispatchInsts(InstGroup),
    /// Dispatch queue credits to Rename.
    DispatchCredits(u32),

    // ---- Dispatch -> execution units ----
    /// Dispatch routes an instruction to an ALU/FPU/BR pipe.
    ExecInst(TargetUnit, InstPtr),
    /// Execution pipe credits back to Dispatch.
    ExecCredits(TargetUnit, u32),
    /// Dispatch routes a load/store to the LSU.
    LsuInst(InstPtr),
    /// LSU issue-queue credits back to Dispatch.
    LsuCredits(u32),
    /// Dispatch appends a group to the ROB.
    RobInsts(InstGroup),
    /// ROB credits back to Dispatch.
    RobCredits(u32),

    // ---- ROB acks ----
    /// Retired group forwarded to Rename for reclaim.
    RobRetireAckRename(InstGroup),
    /// Retired store forwarded to the LSU.
    RobRetireAckLsu(InstPtr),
    /// Ground-truth branch outcome forwarded to the BPU.
    BpuUpdate(UpdateInput),
    /// Retired-branch signal to the FTQ (deallocates its head).
    FtqBranchCommit(u64),

    // ---- LSU <-> MMU ----
    /// LSU requests a translation.
    MmuLookupReq(MemoryAccessInfoPtr),
    /// MMU answers a lookup (hit or miss recorded in the access).
    MmuLookupAck(MemoryAccessInfoPtr),
    /// MMU signals a completed TLB reload (re-issue the access).
    MmuReadyReq(MemoryAccessInfoPtr),

    // ---- LSU <-> DCache ----
    /// LSU sends an access down to the DCache.
    DcacheLookupReq(MemoryAccessInfoPtr),
    /// DCache acks a lookup (HIT / MISS / RELOAD-NACK).
    DcacheLookupAck(MemoryAccessInfoPtr),
    /// DCache signals a serviced miss is ready to re-issue.
    DcacheReadyReq(MemoryAccessInfoPtr),

    // ---- caches <-> L2 ----
    /// A request entering one of the L2 input channels.
    L2Request { src: L2Unit, mem: MemoryAccessInfoPtr },
    /// L2 refill response to the ICache.
    L2RespIcache(MemoryAccessInfoPtr),
    /// L2 refill response to the DCache.
    L2RespDcache(MemoryAccessInfoPtr),
    /// L2 accepted-request credits to the ICache.
    L2CreditsIcache(u32),
    /// L2 accepted-request credits to the DCache.
    L2CreditsDcache(u32),

    // ---- L2 <-> BIU ----
    /// L2 forwards a miss to the bus interface unit.
    BiuReq(MemoryAccessInfoPtr),
    /// BIU response back to L2.
    BiuResp(MemoryAccessInfoPtr),
    /// BIU request-queue credits to L2.
    BiuCredits(u32),

    // ---- BPU / FTQ / Fetch ----
    /// Fetch asks for a prediction.
    BpuPredictionReq(PredictionRequest),
    /// BPU request credits to Fetch.
    BpuReqCredits(u32),
    /// First-tier prediction into the FTQ.
    FtqFirstPrediction(PredictionOutput),
    /// Second-tier (TAGE) prediction into the FTQ.
    FtqSecondPrediction(PredictionOutput),
    /// FTQ prediction credits to the BPU.
    FtqCreditsToBpu(u32),
    /// FTQ forwards a prediction to Fetch.
    FetchPrediction(PredictionOutput),
    /// Fetch prediction-buffer credits to the FTQ.
    FtqFetchCredits(u32),
    /// FTQ asks the BPU to restart prediction at a corrected PC.
    BpuRedirect(u64),

    // ---- Prefetcher ----
    /// Demand access observed by the prefetcher (ingress).
    PrefetcherObserve(MemoryAccessInfoPtr),
    /// Prefetcher ingress-queue credits to its producer.
    PrefetcherIngressCredits(u32),
    /// A generated prefetch heading down the L2 path.
    PrefetchEmit(MemoryAccessInfoPtr),
    /// Downstream credits refunded to the prefetcher.
    PrefetcherQueueCredits(u32),

    // ---- Flush ----
    /// A unit publishes a flush request to the manager.
    FlushRequest(FlushingCriteria),
    /// Fan-out to upper-pipeline subscribers (Flush phase).
    FlushUpper(FlushingCriteria),
    /// Fan-out to lower-pipeline subscribers (Flush phase).
    FlushLower(FlushingCriteria),

    // ---- Scoreboard wake-ups ----
    /// Scoreboard bits became ready for an LSU-held instruction.
    LsuOperandCheck(InstPtr),

    // ---- Payload-bearing unit events ----
    /// ICache answers a demand lookup after its latency.
    IcacheRespond(MemoryAccessInfoPtr),
    /// ICache replays a filled miss after its latency.
    IcacheReplay(MemoryAccessInfoPtr),
    /// LSU replay delay expired.
    LsuReplayReady(LoadStoreInstInfoPtr),
    /// LSU ready-queue append.
    LsuAppendReady(LoadStoreInstInfoPtr),
    /// MMU finished a TLB reload.
    MmuReloadDone(MemoryAccessInfoPtr),
    /// An execution pipe finished an instruction.
    ExecComplete(TargetUnit, InstPtr),
    /// The BIU's current request was acknowledged by its target.
    BiuTargetAck,

    // ---- Unique (payload-free) unit events ----
    /// Fetch: read more instructions from the trace.
    FetchInsts,
    /// Fetch: release instructions to Decode.
    FetchSend,
    /// ICache arbitration (refill > replay > demand).
    IcacheArbitrate,
    /// ICache: issue a queued miss to L2.
    IcacheMakeL2Request,
    /// Decode: process the queue.
    DecodeRun,
    /// Rename: evaluate stall conditions and schedule work.
    RenameSchedule,
    /// Rename: rename up to `num_to_rename` instructions.
    RenameRun,
    /// Dispatch: route queued instructions.
    DispatchRun,
    /// LSU: arbitrate and issue one ready access.
    LsuIssue,
    /// LSU: advance the load/store pipeline.
    LsuPipelineTick,
    /// DCache: advance the cache pipeline.
    DcachePipelineTick,
    /// DCache: try to send an MSHR request to L2.
    DcacheMshrRequest,
    /// DCache: free the refill arbitration slot.
    DcacheFreePipeline,
    /// L2: arbitrate input channels into the pipeline queue.
    L2CreateReq,
    /// L2: issue from the pipeline queue into the pipeline.
    L2IssueReq,
    /// L2: advance the cache pipeline.
    L2PipelineTick,
    /// BIU: service the head of the request queue.
    BiuHandleReq,
    /// ROB: retire up to `num_to_retire` instructions.
    RobRetire,
    /// ROB: forward-progress watchdog.
    RobForwardProgress,
    /// Flush manager: fan out the arbitrated criterion.
    FlushFanout,
    /// Prefetcher: emit one prefetch under credits.
    PrefetcherGenerate,
    /// Prefetcher: service the ingress queue.
    PrefetcherHandleIncoming,
    /// BPU: drain the prediction request buffer.
    BpuMakePrediction,
}

impl SimEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SimEvent::IcacheFetchReq(_) => "IcacheFetchReq",
            SimEvent::IcacheFetchResp(_) => "IcacheFetchResp",
            SimEvent::IcacheFetchCredits(_) => "IcacheFetchCredits",
            SimEvent::DecodeInsts(_) => "DecodeInsts",
            SimEvent::DecodeCredits(_) => "DecodeCredits",
            SimEvent::RenameInsts(_) => "RenameInsts",
            SimEvent::RenameCredits(_) => "RenameCredits",
            SimEvent::VsetCleared(_) => "VsetCleared",
            SimEvent::DispatchInsts(_) => "DispatchInsts",
            SimEvent::DispatchCredits(_) => "DispatchCredits",
            SimEvent::ExecInst(..) => "ExecInst",
            SimEvent::ExecCredits(..) => "ExecCredits",
            SimEvent::LsuInst(_) => "LsuInst",
            SimEvent::LsuCredits(_) => "LsuCredits",
            SimEvent::RobInsts(_) => "RobInsts",
            SimEvent::RobCredits(_) => "RobCredits",
            SimEvent::RobRetireAckRename(_) => "RobRetireAckRename",
            SimEvent::RobRetireAckLsu(_) => "RobRetireAckLsu",
            SimEvent::BpuUpdate(_) => "BpuUpdate",
            SimEvent::FtqBranchCommit(_) => "FtqBranchCommit",
            SimEvent::MmuLookupReq(_) => "MmuLookupReq",
            SimEvent::MmuLookupAck(_) => "MmuLookupAck",
            SimEvent::MmuReadyReq(_) => "MmuReadyReq",
            SimEvent::DcacheLookupReq(_) => "DcacheLookupReq",
            SimEvent::DcacheLookupAck(_) => "DcacheLookupAck",
            SimEvent::DcacheReadyReq(_) => "DcacheReadyReq",
            SimEvent::L2Request { .. } => "L2Request",
            SimEvent::L2RespIcache(_) => "L2RespIcache",
            SimEvent::L2RespDcache(_) => "L2RespDcache",
            SimEvent::L2CreditsIcache(_) => "L2CreditsIcache",
            SimEvent::L2CreditsDcache(_) => "L2CreditsDcache",
            SimEvent::BiuReq(_) => "BiuReq",
            SimEvent::BiuResp(_) => "BiuResp",
            SimEvent::BiuCredits(_) => "BiuCredits",
            SimEvent::BpuPredictionReq(_) => "BpuPredictionReq",
            SimEvent::BpuReqCredits(_) => "BpuReqCredits",
            SimEvent::FtqFirstPrediction(_) => "FtqFirstPrediction",
            SimEvent::FtqSecondPrediction(_) => "FtqSecondPrediction",
            SimEvent::FtqCreditsToBpu(_) => "FtqCreditsToBpu",
            SimEvent::FetchPrediction(_) => "FetchPrediction",
            SimEvent::FtqFetchCredits(_) => "FtqFetchCredits",
            SimEvent::BpuRedirect(_) => "BpuRedirect",
            SimEvent::PrefetcherObserve(_) => "PrefetcherObserve",
            SimEvent::PrefetcherIngressCredits(_) => "PrefetcherIngressCredits",
            SimEvent::PrefetchEmit(_) => "PrefetchEmit",
            SimEvent::PrefetcherQueueCredits(_) => "PrefetcherQueueCredits",
            SimEvent::FlushRequest(_) => "FlushRequest",
            SimEvent::FlushUpper(_) => "FlushUpper",
            SimEvent::FlushLower(_) => "FlushLower",
            SimEvent::LsuOperandCheck(_) => "LsuOperandCheck",
            SimEvent::IcacheRespond(_) => "IcacheRespond",
            SimEvent::IcacheReplay(_) => "IcacheReplay",
            SimEvent::LsuReplayReady(_) => "LsuReplayReady",
            SimEvent::LsuAppendReady(_) => "LsuAppendReady",
            SimEvent::MmuReloadDone(_) => "MmuReloadDone",
            SimEvent::ExecComplete(..) => "ExecComplete",
            SimEvent::BiuTargetAck => "BiuTargetAck",
            SimEvent::FetchInsts => "FetchInsts",
            SimEvent::FetchSend => "FetchSend",
            SimEvent::IcacheArbitrate => "IcacheArbitrate",
            SimEvent::IcacheMakeL2Request => "IcacheMakeL2Request",
            SimEvent::DecodeRun => "DecodeRun",
            SimEvent::RenameSchedule => "RenameSchedule",
            SimEvent::RenameRun => "RenameRun",
            SimEvent::DispatchRun => "DispatchRun",
            SimEvent::LsuIssue => "LsuIssue",
            SimEvent::LsuPipelineTick => "LsuPipelineTick",
            SimEvent::DcachePipelineTick => "DcachePipelineTick",
            SimEvent::DcacheMshrRequest => "DcacheMshrRequest",
            SimEvent::DcacheFreePipeline => "DcacheFreePipeline",
            SimEvent::L2CreateReq => "L2CreateReq",
            SimEvent::L2IssueReq => "L2IssueReq",
            SimEvent::L2PipelineTick => "L2PipelineTick",
            SimEvent::BiuHandleReq => "BiuHandleReq",
            SimEvent::RobRetire => "RobRetire",
            SimEvent::RobForwardProgress => "RobForwardProgress",
            SimEvent::FlushFanout => "FlushFanout",
            SimEvent::PrefetcherGenerate => "PrefetcherGenerate",
            SimEvent::PrefetcherHandleIncoming => "PrefetcherHandleIncoming",
            SimEvent::BpuMakePrediction => "BpuMakePrediction",
        }
    }
}
