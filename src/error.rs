//! 错误处理

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // 标准库错误处理
    #[error("io error, {0}")]
    Io(std::io::Error),
    #[error("option none, {0}")]
    OptionNone(String),
    #[error("strum error, {0}")]
    ParseEnumString(String),

    #[error("serde json error, {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("regex error, {0}")]
    RegexError(#[from] regex::Error),
    #[error("base64 decode error, {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("py error, {0}")]
    PyErr(#[from] pyo3::PyErr),
    #[error("py downcast error, {0}")]
    PyDowncastError(String),

    #[error("tensor error, {0}")]
    TensorErr(#[from] candle_core::Error),
    #[error("invalid tensor shape, {0}")]
    InvalidTensorShape(String),
    #[error("numpy error, {0}")]
    NotContiguousError(#[from] numpy::NotContiguousError),

    #[error("image error, {0}")]
    ImageError(#[from] image::ImageError),
    #[error("creating image buffer error")]
    ImageBuffer,
    #[error("unsupported number of channels: {0}")]
    UnsupportedNumberOfChannels(u32),

    #[error("http client error, {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("response body exceeds {0} bytes")]
    ResponseTooLarge(u64),
    #[error("http status {0}, {1}")]
    Http(u16, String),
    #[error("gemini api error {code} ({status}), {message}")]
    Api {
        code: u16,
        status: String,
        message: String,
    },
    #[error("prompt blocked, reason: {0}")]
    Blocked(String),
    #[error("api key is missing, fill in the api_key input or set GEMINI_API_KEY")]
    MissingApiKey,
    #[error("no image found in the api response")]
    NoImageInResponse,
    #[error("no text found in the api response")]
    NoTextInResponse,
    #[error("cannot extract image data from response part, available keys: {0}")]
    CannotExtractImage(String),

    #[error("invalid parameter, {0}")]
    InvalidParameter(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<strum::ParseError> for Error {
    fn from(e: strum::ParseError) -> Self {
        Error::ParseEnumString(e.to_string())
    }
}
