//! Output formatting utilities

use console::{style, Style};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for task ids
pub fn task_style() -> Style {
    Style::new().bold()
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Format a count with a pluralized noun
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "task"), "1 task");
        assert_eq!(plural(3, "stage"), "3 stages");
        assert_eq!(plural(0, "task"), "0 tasks");
    }

    #[test]
    fn test_key_value_contains_parts() {
        let line = key_value("Entries", "4");
        assert!(line.contains("Entries"));
        assert!(line.ends_with('4'));
    }
}
