//! Terminal output for the sync CLI.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

pub mod colors {
    use console::Color;

    pub const CYAN: Color = Color::Color256(51);
    pub const MAGENTA: Color = Color::Color256(201);
    pub const GREEN: Color = Color::Color256(82);
    pub const AMBER: Color = Color::Color256(214);
    pub const DIM: Color = Color::Color256(240);
}

pub mod symbols {
    pub const DIAMOND: &str = "\u{25C6}"; // ◆
    pub const DIAMOND_OUTLINE: &str = "\u{25C7}"; // ◇
    pub const TARGET_FILLED: &str = "\u{25C9}"; // ◉
    pub const TRIANGLE: &str = "\u{25B8}"; // ▸
    pub const CROSS: &str = "\u{2717}"; // ✗
    pub const DOT: &str = "\u{00B7}"; // ·
}

const BOX_WIDTH: usize = 55;

pub fn success(msg: &str) {
    println!("  {} {}", style(symbols::TARGET_FILLED).fg(colors::GREEN), msg);
}

/// Something an operator has to act on.
pub fn warn(msg: &str) {
    println!(
        "  {} {}",
        style(symbols::DIAMOND).fg(colors::AMBER).bold(),
        style(msg).fg(colors::AMBER)
    );
}

pub fn info(msg: &str) {
    println!("  {} {}", style(symbols::DIAMOND_OUTLINE).fg(colors::CYAN), msg);
}

pub fn dim(msg: &str) {
    println!("  {}", style(msg).fg(colors::DIM));
}

/// Stage banner, printed as each stage starts.
pub fn stage(label: &str) {
    println!("  {} {}", style(symbols::TRIANGLE).fg(colors::CYAN), style(label).bold());
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("\u{25CE}\u{25C9}\u{25CE}\u{25C9}")
        .template("  {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(150));
    pb
}

pub fn box_header(title: &str) {
    let title_padded = format!(" {} ", title);
    let dashes = BOX_WIDTH.saturating_sub(title_padded.chars().count() + 4);

    println!(
        "  {}{}{}{}",
        style("\u{256D}\u{2500}").fg(colors::CYAN),
        style(title_padded).fg(colors::CYAN).bold(),
        style("\u{2500}".repeat(dashes)).fg(colors::CYAN),
        style("\u{256E}").fg(colors::CYAN)
    );
}

pub fn box_line(content: &str) {
    println!(
        "  {} {}{}",
        style("\u{2502}").fg(colors::CYAN),
        pad(content, BOX_WIDTH - 2),
        style("\u{2502}").fg(colors::CYAN)
    );
}

pub fn box_footer() {
    println!(
        "  {}{}{}",
        style("\u{2570}").fg(colors::CYAN),
        style("\u{2500}".repeat(BOX_WIDTH - 2)).fg(colors::CYAN),
        style("\u{256F}").fg(colors::CYAN)
    );
}

/// One service row: name, routing URL and an optional trailing note.
pub fn service_line(ok: bool, name: &str, detail: &str) {
    let marker = if ok {
        style(symbols::TARGET_FILLED).fg(colors::GREEN)
    } else {
        style(symbols::CROSS).fg(colors::MAGENTA)
    };
    println!(
        "    {} {:16} {}",
        marker,
        style(name).bold(),
        style(detail).fg(colors::DIM)
    );
}

pub fn timing(label: &str, elapsed: Duration) {
    println!(
        "  {} {} in {}",
        style(symbols::DIAMOND_OUTLINE).fg(colors::CYAN),
        label,
        human_duration(elapsed)
    );
}

pub fn error_header(title: &str) {
    println!();
    println!(
        "  {} {}",
        style(symbols::DIAMOND).fg(colors::MAGENTA).bold(),
        style(title).fg(colors::MAGENTA).bold()
    );
    println!();
}

/// `850ms`, `4.2s` or `2m 05s`.
pub fn human_duration(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Right-pads to `width` characters; longer content is cut with an ellipsis.
fn pad(content: &str, width: usize) -> String {
    let len = content.chars().count();
    if len <= width {
        return format!("{}{}", content, " ".repeat(width - len));
    }
    let mut cut: String = content.chars().take(width.saturating_sub(1)).collect();
    cut.push('\u{2026}');
    cut
}
