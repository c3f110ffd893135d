// 应用装配：后端、歌词、显示与控制接口

mod core;

pub use self::core::{App, Mode};
