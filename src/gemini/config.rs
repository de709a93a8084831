//! Gemini 客户端配置
//!
//! 节点输入即配置, 占位值或空值时回退到环境变量:
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY`
//! - `GEMINI_BASE_URL`

use std::time::Duration;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::Error;

/// 官方接口地址
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// 接口版本
pub const DEFAULT_API_VERSION: &str = "v1beta";
/// 图片生成耗时较长, 4K 输出可能超过一分钟
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// 节点输入的默认占位值
pub const API_KEY_PLACEHOLDER: &str = "your api key";
pub const HOST_PLACEHOLDER: &str = "enter the host";

const API_KEY_ENVS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];
const BASE_URL_ENV: &str = "GEMINI_BASE_URL";

/// HTTP 选项
#[derive(Debug, Clone, PartialEq)]
pub struct HttpOptions {
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HttpOptions {
    /// 根据节点的 host 输入创建
    pub fn from_host(host: &str) -> Self {
        Self::from_host_with(host, |key| std::env::var(key).ok())
    }

    fn from_host_with(host: &str, env: impl Fn(&str) -> Option<String>) -> Self {
        let api_version = DEFAULT_API_VERSION.to_string();

        let host = match non_placeholder(host, HOST_PLACEHOLDER) {
            Some(host) => host.to_string(),
            None => env(BASE_URL_ENV)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        Self {
            base_url: normalize_base_url(&host, &api_version),
            api_version,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 模型方法地址
    ///
    /// {base_url}/{api_version}/models/{model}:{method}
    pub fn model_endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{}/models/{}:{}",
            self.base_url, self.api_version, model, method
        )
    }
}

/// 去除末尾的 `/` 与重复的版本段
fn normalize_base_url(host: &str, api_version: &str) -> String {
    let mut url = host.trim().trim_end_matches('/').to_string();
    let version_suffix = format!("/{api_version}");
    if url.ends_with(&version_suffix) {
        url.truncate(url.len() - version_suffix.len());
    }
    url.trim_end_matches('/').to_string()
}

fn non_placeholder<'a>(value: &'a str, placeholder: &str) -> Option<&'a str> {
    let value = value.trim();
    if value.is_empty() || value == placeholder {
        return None;
    }
    Some(value)
}

/// 解析 API key
pub fn resolve_api_key(input: &str) -> Result<String, Error> {
    resolve_api_key_with(input, |key| std::env::var(key).ok())
}

fn resolve_api_key_with(
    input: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String, Error> {
    if let Some(key) = non_placeholder(input, API_KEY_PLACEHOLDER) {
        return Ok(key.to_string());
    }

    API_KEY_ENVS
        .iter()
        .filter_map(|name| env(*name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .ok_or(Error::MissingApiKey)
}

/// 文本模型
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum TextModel {
    #[default]
    #[strum(to_string = "gemini-3-pro-preview")]
    Gemini3ProPreview,
    #[strum(to_string = "gemini-2.0-flash-exp")]
    Gemini20FlashExp,
    #[strum(to_string = "gemini-1.5-pro")]
    Gemini15Pro,
}

/// 图片模型
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum ImageModel {
    #[default]
    #[strum(to_string = "gemini-3-pro-image-preview")]
    Gemini3ProImagePreview,
}

/// 宽高比
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum AspectRatio {
    #[strum(to_string = "1:1")]
    Square,
    #[strum(to_string = "2:3")]
    Portrait2x3,
    #[strum(to_string = "3:2")]
    Landscape3x2,
    #[strum(to_string = "3:4")]
    Portrait3x4,
    #[strum(to_string = "4:3")]
    Landscape4x3,
    #[strum(to_string = "4:5")]
    Portrait4x5,
    #[strum(to_string = "5:4")]
    Landscape5x4,
    #[default]
    #[strum(to_string = "9:16")]
    Portrait9x16,
    #[strum(to_string = "16:9")]
    Landscape16x9,
    #[strum(to_string = "21:9")]
    Ultrawide21x9,
}

/// 输出分辨率
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum Resolution {
    #[strum(to_string = "1K")]
    OneK,
    #[default]
    #[strum(to_string = "2K")]
    TwoK,
    #[strum(to_string = "4K")]
    FourK,
}

/// 节点下拉选项
pub fn choices<E: IntoEnumIterator + ToString>() -> Vec<String> {
    E::iter().map(|v| v.to_string()).collect()
}
