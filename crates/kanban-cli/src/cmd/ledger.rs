use crate::output::{print_json, print_table};
use kanban_core::ledger::Ledger;
use kanban_core::types::Prefix;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let ledger = Ledger::read(root);

    if json {
        print_json(&ledger.document()?)?;
        return Ok(());
    }
    if ledger.entries().is_empty() && ledger.unparsed().is_empty() {
        println!("No allocations recorded.");
        return Ok(());
    }
    let mut rows: Vec<Vec<String>> = ledger
        .entries()
        .iter()
        .map(|(prefix, e)| {
            vec![
                prefix.clone(),
                e.highest.to_string(),
                e.last_allocated_by.clone(),
                e.last_allocated_at.format("%Y-%m-%d %H:%M").to_string(),
                e.last_title.clone().unwrap_or_default(),
            ]
        })
        .collect();
    for prefix in ledger.unparsed().keys() {
        let highest = Prefix::parse(prefix)
            .ok()
            .and_then(|p| ledger.highest(&p))
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        rows.push(vec![
            prefix.clone(),
            highest,
            String::new(),
            "(malformed)".to_string(),
            String::new(),
        ]);
    }
    rows.sort_by(|a, b| a[0].cmp(&b[0]));
    print_table(&["PREFIX", "HIGHEST", "BY", "AT", "TITLE"], rows);
    Ok(())
}
