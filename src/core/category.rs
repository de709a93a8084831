//! 节点分类

/// 文本生成
pub const CATEGORY_TEXT_GENERATION: &str = "text/generation";
/// 图片生成
pub const CATEGORY_IMAGE_GENERATION: &str = "image/generation";
