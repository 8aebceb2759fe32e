use std::path::Path;

use lodge_db::{PlannedUnit, UnitStatus};

const MIN_NAME_WIDTH: usize = 12;
const APPLIED_AT_WIDTH: usize = 19;

/// Print the status table: one row per unit, in declared order.
pub fn print_status(rows: &[UnitStatus], database: Option<&Path>) {
    let version = env!("CARGO_PKG_VERSION");
    let applied = rows.iter().filter(|r| r.applied).count();

    let version_w = rows
        .iter()
        .map(|r| r.version.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("Version".len());
    let name_w = rows
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(MIN_NAME_WIDTH);
    // "│ " + 3 columns separated by " │ " + " │"
    let width = version_w + name_w + APPLIED_AT_WIDTH + 10;

    let title = format!("lodge v{version}");
    let title_dashes = width.saturating_sub(title.chars().count() + 7);
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let rule = format!("├{}┤", "─".repeat(width - 2));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |v: &str, n: &str, a: &str| {
        format!("│ {v:<version_w$} │ {n:<name_w$} │ {a:<APPLIED_AT_WIDTH$} │")
    };
    let line = |text: &str| format!("│ {text:<inner$} │", inner = width - 4);

    let db_display = match database {
        Some(path) => path.display().to_string(),
        None => ":memory:".to_string(),
    };

    println!("{top}");
    println!("{}", line(&format!("Database  {db_display}")));
    println!(
        "{}",
        line(&format!("Applied   {applied} of {}", rows.len()))
    );
    println!("{rule}");
    println!("{}", row("Version", "Name", "Applied at"));
    println!("{rule}");
    if rows.is_empty() {
        println!("{}", line("no migrations found"));
    }
    for r in rows {
        let applied_at = match r.applied_at {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "pending".to_string(),
        };
        println!("{}", row(r.version.as_str(), &r.name, &applied_at));
    }
    println!("{bottom}");
}

/// Print the SQL a run would execute, one commented block per unit.
pub fn print_script(plan: &[PlannedUnit], dialect: &str) {
    println!("-- dialect: {dialect}");
    if plan.is_empty() {
        println!("-- nothing to apply");
        return;
    }
    for unit in plan {
        println!("-- {} {}", unit.version, unit.name);
        for statement in &unit.statements {
            println!("{statement}");
        }
        println!();
    }
}
