// 终端输出：多行窗口与单行模式

mod manager;
mod renderer;

pub use manager::{DisplayManager, DisplayMode, FrameState, Output};
pub use renderer::{apply_offset, draw_frame, draw_line, Frame, ACTIVE_MARKER};
