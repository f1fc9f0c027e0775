//! Shared harness for the integration suite.

use rvperf_core::core::inst_gen::JsonInstGenerator;
use rvperf_core::{Config, Simulator};

/// Builds a simulator over an inline JSON trace.
pub fn build_sim(trace_json: &str, config: Config) -> Simulator {
    let generator = JsonInstGenerator::from_str(trace_json).expect("trace parses");
    Simulator::new(&config, Box::new(generator)).expect("simulator builds")
}

/// Runs a simulator to completion, panicking on any fatal error.
pub fn run_to_completion(sim: &mut Simulator) {
    sim.run().expect("simulation completes");
}

/// A config with the timing knobs that keep small tests brisk.
pub fn quick_config() -> Config {
    let mut config = Config::default();
    config.mmu.tlb_always_hit = true;
    config.rob.retire_heartbeat = 0;
    config
}

/// Generates a JSON trace of `n` integer adds cycling destination
/// registers x1..x31 with dependent sources.
pub fn adds_trace(n: usize) -> String {
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let rd = 1 + (i % 31);
        let rs1 = 1 + ((i + 7) % 31);
        let rs2 = 1 + ((i + 13) % 31);
        records.push(format!(
            r#"{{"mnemonic": "add", "rd": {rd}, "rs1": {rs1}, "rs2": {rs2}}}"#
        ));
    }
    format!("[{}]", records.join(","))
}
