// Colored terminal output for term lists and term details.
//
// This module handles all terminal-specific formatting: colors and tables.
// The main.rs command handlers delegate here.

use colored::Colorize;

use crate::db::models::Term;

/// Display a list of terms as a table.
pub fn display_term_list(terms: &[Term], total: usize) {
    if terms.is_empty() {
        println!("No terms found. Add one with `muzzle add <value>`.");
        return;
    }

    println!("\n{}", format!("=== Terms ({total}) ===").bold());
    println!();

    println!(
        "  {:<36}  {:<32}  {:<24}  {}",
        "Id".dimmed(),
        "Fingerprint".dimmed(),
        "Value".dimmed(),
        "Name".dimmed(),
    );
    println!("  {}", "-".repeat(110).dimmed());

    for term in terms {
        println!(
            "  {:<36}  {:<32}  {:<24}  {}",
            term.id,
            term.fingerprint.dimmed(),
            super::truncate_chars(&term.value, 24).bold(),
            term.name.as_deref().unwrap_or("-"),
        );
    }
    println!();
}

/// Display a single term with all its fields.
pub fn display_term_detail(term: &Term) {
    println!("\n{}", format!("=== Term {} ===", term.id).bold());
    println!("  Value:       {}", term.value.bold());
    println!("  Fingerprint: {}", term.fingerprint);
    if let Some(ref name) = term.name {
        println!("  Name:        {name}");
    }
    if let Some(ref description) = term.description {
        println!("  Description: {}", super::truncate_chars(description, 140).dimmed());
    }
    println!("  Created:     {}", term.created_at);
    println!("  Updated:     {}", term.updated_at);
}

/// Display the result of filtering one piece of text.
pub fn display_filter_result(input: &str, output: &str) {
    if input == output {
        println!("{} {}", "clean".green(), output);
    } else {
        println!("{} {}", "masked".red().bold(), output);
    }
}
