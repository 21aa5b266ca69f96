//! Session report formatting.

use std::fmt::Write;

use super::{Agreement, PathReport, RunOutcome, RunRecord, SessionReport};

/// Format one run as a single human-readable line.
pub fn format_run(record: &RunRecord) -> String {
    match &record.outcome {
        RunOutcome::Ok {
            counts,
            setup_ms,
            compute_ms,
            total_ms,
            matches_reference,
        } => {
            let mut line = format!(
                "run {}: black={} white={}",
                record.run, counts.black, counts.white
            );
            match setup_ms {
                Some(setup) => {
                    let _ = write!(line, ", setup {setup:.2} ms, compute {compute_ms:.2} ms");
                }
                None => {
                    let _ = write!(line, ", total {total_ms:.2} ms");
                }
            }
            match matches_reference {
                Some(true) => line.push_str(" [verified]"),
                Some(false) => line.push_str(" [MISMATCH vs reference]"),
                None => {}
            }
            line
        }
        RunOutcome::Failed { phase, error } => {
            format!("run {}: FAILED during {phase}: {error}", record.run)
        }
    }
}

fn format_path(out: &mut String, name: &str, path: Option<&PathReport>) {
    let Some(path) = path else {
        let _ = writeln!(out, "{name} path: skipped");
        return;
    };
    match (&path.backend, &path.hardware) {
        (Some(backend), Some(hardware)) => {
            let _ = writeln!(out, "{name} path [{backend}: {hardware}]");
        }
        _ => {
            let _ = writeln!(out, "{name} path [unavailable]");
        }
    }
    for record in &path.runs {
        let _ = writeln!(out, "  {}", format_run(record));
    }
}

/// Format a whole session as a human-readable summary.
pub fn format_summary(report: &SessionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "pixelbench session started {}",
        report.started_at.to_rfc3339()
    );
    let _ = writeln!(
        out,
        "image: {} ({}x{}, {} pixels)",
        report.image.source, report.image.width, report.image.height, report.image.pixels
    );
    if let Some(reference) = report.reference {
        let _ = writeln!(
            out,
            "reference: black={} white={}",
            reference.black, reference.white
        );
    }

    format_path(&mut out, super::DEVICE_PATH, report.device.as_ref());
    format_path(&mut out, super::HOST_PATH, report.host.as_ref());

    let verdict = match report.agreement {
        Agreement::Agree { counts } => format!(
            "paths agree (black={} white={})",
            counts.black, counts.white
        ),
        Agreement::Disagree { device, host } => format!(
            "PATHS DISAGREE (device black={} white={}, host black={} white={})",
            device.black, device.white, host.black, host.white
        ),
        Agreement::Incomplete => "not compared (a path has no successful run)".to_string(),
    };
    let _ = writeln!(out, "agreement: {verdict}");
    out
}

/// Pretty JSON rendering of a session.
pub fn to_json(report: &SessionReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
