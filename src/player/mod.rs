// 播放状态模型

mod media_type;
mod state;

pub use media_type::{guess_media_type, MediaType, MediaTypeThresholds};
pub use state::{PlayerState, StateEquality};
