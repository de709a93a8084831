//! 工具
pub mod image;
pub mod text;
