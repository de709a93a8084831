//! torch 包装
pub mod tensor;
