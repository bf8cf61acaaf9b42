// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Terminal output helpers shared by the CLI commands

use colored::Colorize;

/// Whether colored output should be used
pub fn should_use_colors() -> bool {
    // NO_COLOR wins over everything
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::env::var_os("TERM").is_some_and(|term| term != "dumb")
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

/// Print an info item
pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
