//! Output formatting utilities

use console::{style, Style};

use opqueue_tasks::TaskState;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
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

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Marker and style for a terminal task state
pub fn state_marker(state: &TaskState) -> (&'static str, Style) {
    match state {
        TaskState::Completed => ("✓", Style::new().green()),
        TaskState::Failed(_) => ("✗", Style::new().red()),
        TaskState::Cancelled => ("○", Style::new().yellow()),
        TaskState::Pending | TaskState::Running => ("…", Style::new().dim()),
    }
}

/// "1 task" / "3 tasks"
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "task"), "1 task");
        assert_eq!(plural(0, "task"), "0 tasks");
        assert_eq!(plural(4, "wave"), "4 waves");
    }

    #[test]
    fn test_state_marker() {
        assert_eq!(state_marker(&TaskState::Completed).0, "✓");
        assert_eq!(state_marker(&TaskState::Failed("x".into())).0, "✗");
        assert_eq!(state_marker(&TaskState::Cancelled).0, "○");
    }

    #[test]
    fn test_key_value_contains_parts() {
        let line = key_value("queue", "com.example");
        assert!(line.contains("queue"));
        assert!(line.contains("com.example"));
    }
}
