//! In-chat commands.
//!
//! A line whose trimmed form is one of the `!` keywords below (any case) is a
//! command. Every other non-blank line is sent to the group verbatim.

/// What a line typed while chatting means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `!exit`: leave the chat and quit
    Exit,
    /// `!leave`: leave the group and go back to group selection
    Leave,
    /// `!members`: show who is in the group
    Members,
    /// `!help`
    Help,
    /// A chat message
    Say(&'a str),
    /// Blank line
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }

        if let Some(keyword) = trimmed.strip_prefix('!') {
            match keyword.to_ascii_lowercase().as_str() {
                "exit" => return Self::Exit,
                "leave" => return Self::Leave,
                "members" => return Self::Members,
                "help" => return Self::Help,
                _ => {}
            }
        }
        Self::Say(line)
    }
}

/// Help text listing the in-chat commands
pub const HELP: &str = "\
Commands:
  !members  list the members of this group
  !leave    leave the group and return to the menu
  !exit     leave the group and quit
  !help     show this help";
