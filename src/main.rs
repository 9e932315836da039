use anyhow::{Context, Result};
use clap::Parser;
use deadlock_sim::{EngineEvent, SimConfig, Simulator};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "deadlock-sim - replay the four classical deadlock conditions and their resolutions"
)]
struct Cli {
    /// Path to a JSON-lines event log ("{timestamp}" is expanded)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Print the session summary as JSON
    #[arg(long)]
    json: bool,
}

fn describe(event: &EngineEvent) -> String {
    let mut line = format!("{:?}", event.event);
    if let Some(process) = &event.process {
        line.push_str(&format!(" process={process}"));
    }
    if !event.resources.is_empty() {
        let resources: Vec<&str> = event.resources.iter().map(|r| r.as_str()).collect();
        line.push_str(&format!(" resources=[{}]", resources.join(",")));
    }
    if let Some(peer) = &event.peer {
        line.push_str(&format!(" peer={peer}"));
    }
    if let Some(condition) = event.condition {
        line.push_str(&format!(" ({condition:?})"));
    }
    line
}

fn replay(sim: &Simulator) {
    // Mutual exclusion, resolved by preemption
    sim.mutual_exclusion("R1", "P1");
    sim.resolve_mutual_exclusion("R1", "P2");

    // Hold and wait, resolved by giving everything back
    sim.hold_and_wait("P2", ["R1", "R2"]);
    sim.resolve_hold_and_wait("P2");

    // No preemption, resolved by forced release
    sim.acquire("R2", "P2");
    sim.resolve_no_preemption("R2", "P3");

    // Circular wait, resolved by resetting the wait state
    sim.add_wait_edge("P1", "P2");
    sim.add_wait_edge("P2", "P1");
    sim.detect_cycle();
    sim.resolve_circular_wait();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let quiet = cli.json;

    let mut config = SimConfig::new().observer(move |event| {
        if !quiet {
            println!("{}", describe(event));
        }
    });
    if let Some(path) = &cli.log {
        config = config.with_log(path);
    }
    let sim = config.build()?;

    sim.start_session();
    replay(&sim);
    let summary = sim.end_session();
    sim.flush_log()?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else {
        println!("Execution time (ms): {}", summary.elapsed_ms);
        println!("Completed operations: {}", summary.completed_count);
        println!(
            "Mean utilization time (ms): {:.3}",
            summary.mean_utilization_ms
        );
    }
    Ok(())
}
