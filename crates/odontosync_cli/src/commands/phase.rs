//! Phase command implementation.

use super::{phase_json, print_phase, Wiring};
use crate::config::FileConfig;
use odontosync_protocol::{ControlType, EntityKind};

/// Runs a single phase of one entity kind.
pub fn run(
    config: FileConfig,
    entity: EntityKind,
    kind: ControlType,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let wiring = Wiring::new(config);
    let orchestrator = wiring.orchestrator(entity)?;
    let report = orchestrator.run_phase(kind)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&phase_json(&report))?);
    } else {
        println!("{entity}:");
        print_phase(&report);
    }
    Ok(())
}
