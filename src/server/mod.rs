//! 对外的控制接口：UDP 命令与 HTTP 接口

pub mod command;
pub mod control;
pub mod web;

pub use command::{ControlCommand, ParseCommandError};
pub use control::{send_command, ControlServer};
