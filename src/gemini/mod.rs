//! Google Gemini generateContent 接口
//!
//! 文档: https://ai.google.dev/api/generate-content

pub mod client;
pub mod config;
pub mod image_probe;
pub mod types;

pub use client::GeminiClient;
pub use config::{AspectRatio, HttpOptions, ImageModel, Resolution, TextModel};
pub use image_probe::{ExtractedImage, FetchBytes, ImageProbe, ProbeSource};
