//! Run command implementation.

use super::{entities, phase_json, print_aborted, print_phase, Wiring};
use crate::config::FileConfig;
use odontosync_protocol::EntityKind;

/// Runs every phase of one or both entity kinds.
///
/// Entity kinds run one after the other and share the token cache. Fails
/// after printing the reports if any phase aborted.
pub fn run(
    config: FileConfig,
    entity: Option<EntityKind>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let wiring = Wiring::new(config);
    let mut aborted = 0usize;
    let mut json_reports = Vec::new();

    for entity in entities(entity) {
        let orchestrator = wiring.orchestrator(entity)?;
        let report = orchestrator.run_full()?;
        aborted += report.failed_phases().count();

        if format == "json" {
            let phases: Vec<_> = report
                .phases
                .iter()
                .map(|p| match &p.outcome {
                    Ok(r) => phase_json(r),
                    Err(e) => serde_json::json!({
                        "entity": entity,
                        "phase": p.kind,
                        "error": e.to_string(),
                        "partial": p.partial,
                    }),
                })
                .collect();
            json_reports.push(serde_json::json!({
                "entity": entity,
                "phases": phases,
                "totals": report.totals(),
                "duration_ms": report.duration.as_millis() as u64,
            }));
        } else {
            println!("{entity}:");
            for phase in &report.phases {
                match &phase.outcome {
                    Ok(r) => print_phase(r),
                    Err(e) => print_aborted(phase.kind.as_str(), e, &phase.partial),
                }
            }
            let totals = report.totals();
            println!(
                "  total      attempted={} succeeded={} failed={} ({} ms)",
                totals.attempted,
                totals.succeeded,
                totals.failed,
                report.duration.as_millis()
            );
            println!();
        }
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&json_reports)?);
    }
    if aborted > 0 {
        return Err(format!("{aborted} phase(s) aborted").into());
    }
    Ok(())
}
