pub mod menu;
pub mod view;

pub use menu::{Prompt, Selection};
pub use view::TerminalView;
