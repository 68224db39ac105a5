use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    println!("{} {}", style("✖").red(), msg);
}

pub fn warn(msg: &str) {
    println!("{} {}", style("!").yellow(), msg);
}

/// Print info message (indented)
pub fn info(msg: &str) {
    println!("  {}", msg);
}

/// Print a header/title
pub fn header(msg: &str) {
    println!();
    println!("  {}", style(msg).bold());
    println!();
}

/// Print an aligned label/value row
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<22} {}", style(label).dim(), value);
}

pub fn dim(msg: &str) -> String {
    style(msg).dim().to_string()
}

/// Create a spinner for indeterminate progress
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}");
    if let Ok(template) = template {
        pb.set_style(template);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Format a monthly cost
pub fn cost(value: f64) -> String {
    format!("${:.2}/mo", value)
}

/// Format a signed monthly cost change
pub fn cost_delta(value: f64) -> String {
    if value >= 0.0 {
        format!("+${:.2}/mo", value)
    } else {
        format!("-${:.2}/mo", -value)
    }
}
