use std::env;
use std::path::PathBuf;

use arbor_plan::{PlanError, ValidationReport, load_plan};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plan_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("missing plan path")?;

    let validated = match load_plan(&plan_path) {
        Ok(validated) => validated,
        Err(PlanError::Invalid(report)) => {
            eprintln!("plan validation failed");
            print_report(&report);
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    };

    if !validated.warnings.is_empty() {
        eprintln!("plan validated with warnings:");
        print_report(&ValidationReport {
            errors: Vec::new(),
            warnings: validated.warnings,
        });
    } else {
        println!("plan validated successfully ({} groups)", validated.plan.len());
    }

    Ok(())
}

fn print_report(report: &ValidationReport) {
    for issue in &report.errors {
        eprintln!("error {} {}: {}", issue.code, issue.path, issue.message);
        if let Some(hint) = &issue.hint {
            eprintln!("  hint: {hint}");
        }
    }
    for issue in &report.warnings {
        eprintln!("warning {} {}: {}", issue.code, issue.path, issue.message);
        if let Some(hint) = &issue.hint {
            eprintln!("  hint: {hint}");
        }
    }
}
