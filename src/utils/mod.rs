// 工具模块

pub mod lrc;
pub mod string;
pub mod yrc;

pub use lrc::LrcParser;
pub use string::{normalize_key, sanitize_string, split_artists, string_similarity};
pub use yrc::YrcParser;
