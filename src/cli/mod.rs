pub mod ascii_preview;
pub mod input;
pub mod view;

pub use ascii_preview::AsciiRenderer;
pub use input::{KeyMapper, KeyReader};
pub use view::{RawModeGuard, TerminalView};
