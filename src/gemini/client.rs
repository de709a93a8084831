//! Gemini REST 客户端
//!
//! 同步调用, 由节点在释放 GIL 后执行

use std::{fmt, io::Read};

use log::{debug, info};
use reqwest::{Url, blocking::Client, header::CONTENT_TYPE};

use crate::{
    error::Error,
    gemini::{
        config::HttpOptions,
        image_probe::FetchBytes,
        types::{ApiErrorBody, GenerateContentRequest, GenerateContentResponse},
    },
};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// 下载引用文件的大小上限
const MAX_FETCH_BYTES: u64 = 64 * 1024 * 1024;

pub struct GeminiClient {
    http: Client,
    api_key: String,
    options: HttpOptions,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"***")
            .field("options", &self.options)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, options: HttpOptions) -> Result<Self, Error> {
        let http = Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            options,
        })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// 是否由相同的凭据创建
    pub fn is_same(&self, api_key: &str, options: &HttpOptions) -> bool {
        self.api_key == api_key && &self.options == options
    }

    /// 与接口地址同源 (scheme, host, port 均一致)
    fn is_own_origin(&self, url: &str) -> bool {
        match (Url::parse(url), Url::parse(&self.options.base_url)) {
            (Ok(target), Ok(base)) => target.origin() == base.origin(),
            _ => false,
        }
    }

    /// models/{model}:generateContent
    pub fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, Error> {
        let url = self.options.model_endpoint(model, "generateContent");
        debug!("POST {url}");

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()?;

        let status = response.status();
        let body = response.text()?;

        // 部分代理在 200 中返回错误体
        if let Ok(api_error) = serde_json::from_str::<ApiErrorBody>(&body) {
            let mut api_error = api_error.error;
            if api_error.code == 0 {
                api_error.code = status.as_u16();
            }
            return Err(api_error.into());
        }
        if !status.is_success() {
            return Err(Error::Http(status.as_u16(), body));
        }

        let response: GenerateContentResponse = serde_json::from_str(&body)?;
        response.ensure_not_blocked()?;

        if let Some(usage) = &response.usage_metadata {
            info!(
                "token usage, prompt: {:?}, candidates: {:?}, total: {:?}",
                usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
            );
        }
        Ok(response)
    }
}

impl FetchBytes for GeminiClient {
    /// 下载响应中引用的文件
    ///
    /// 仅在请求与接口地址同源时携带 API key
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, Error> {
        debug!("GET {url}");
        let mut request = self.http.get(url);
        if self.is_own_origin(url) {
            request = request.header(API_KEY_HEADER, &self.api_key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Http(status.as_u16(), body));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            debug!("fetched content type: {content_type:?}");
        }
        let content_length = response.content_length();
        read_capped(response, content_length, MAX_FETCH_BYTES)
    }
}

/// 读取响应体, 超过上限即中止
fn read_capped(reader: impl Read, content_length: Option<u64>, limit: u64) -> Result<Vec<u8>, Error> {
    if let Some(length) = content_length {
        if length > limit {
            return Err(Error::ResponseTooLarge(limit));
        }
    }

    let mut body = Vec::new();
    reader.take(limit + 1).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(Error::ResponseTooLarge(limit));
    }
    Ok(body)
}
