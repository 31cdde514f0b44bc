//! Check command - validate a rule document.

use std::path::Path;
use triage_core::RuleEngine;

/// Run the check command.
pub fn run(rules: &Path) -> anyhow::Result<()> {
    let engine = RuleEngine::from_path(rules)?;

    if engine.is_empty() {
        println!("{} defines no rule sets.", rules.display());
        return Ok(());
    }

    for set in engine.rule_sets() {
        print!("{}", set);
    }

    println!();
    println!(
        "{} rule sets ({} full-path), document is valid.",
        engine.rule_sets().len(),
        engine.full_path_sets().count()
    );
    Ok(())
}
