//! Line-oriented terminal output

use std::io::Write;

use chrono::Local;
use crossterm::style::Stylize;

use relaychat_core::client::{ChatView, HELP};
use relaychat_core::error::RelayError;
use relaychat_core::protocol::{ChatFrame, FrameKind};

/// Print a prompt without a trailing newline
pub fn prompt(label: &str) {
    print!("{} ", format!("{}>", label).magenta());
    let _ = std::io::stdout().flush();
}

pub fn rule() {
    println!("------------------------------------------");
}

pub fn success(text: &str) {
    println!("{}", text.green());
}

pub fn failure(text: &str) {
    println!("{}", text.red());
}

pub fn hint(text: &str) {
    println!("{}", text.yellow());
}

/// Numbered list, one entry per line
pub fn numbered(items: &[String]) {
    for (i, item) in items.iter().enumerate() {
        println!("  {}) {}", i + 1, item);
    }
}

/// Renders chat traffic to stdout
#[derive(Debug, Default)]
pub struct TerminalView;

impl ChatView for TerminalView {
    fn frame(&self, frame: &ChatFrame) {
        let time = frame.sent_at.with_timezone(&Local).format("%H:%M");
        match frame.kind {
            FrameKind::Message => println!(
                "{} {}: {}",
                format!("[{}]", time).dark_grey(),
                frame.sender.as_str().cyan().bold(),
                frame.message
            ),
            FrameKind::Joined => {
                hint(&format!("* {} joined {}", frame.sender, frame.receiver))
            }
            FrameKind::Left => hint(&format!("* {} left {}", frame.sender, frame.receiver)),
        }
    }

    fn members(&self, group: &str, members: &[String]) {
        println!("Members of {}", group);
        numbered(members);
    }

    fn help(&self) {
        println!("{}", HELP);
    }

    fn error(&self, error: &RelayError) {
        failure(&error.to_string());
    }
}
