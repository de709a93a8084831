//! 响应图片提取
//!
//! 官方接口与各类代理返回的 part 结构并不稳定, 按以下顺序逐一尝试:
//! 1. 内联字段: `inlineData` / `inline_data`, 以及代理常用的字节字段
//! 2. 引用字段: `fileData.fileUri`、`url` 等, data URL 直接解码, http(s) 地址下载
//! 3. 文本字段: markdown 图片或裸 data URL
//!
//! 取得字节后先在内存中解码, 无法识别时按 mimeType 提示的扩展名经由临时文件回读。

use std::{fmt, sync::LazyLock};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use image::{DynamicImage, ImageFormat};
use log::{info, warn};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::{
    core::utils::{image::decode_image, text::preview},
    error::Error,
};

/// 内联数据字段, 值为 {mimeType, data}
const INLINE_FIELDS: [&str; 2] = ["inlineData", "inline_data"];

/// 直接携带图片字节的字段, 值为 base64 字符串或字节数组
const BYTE_FIELDS: [&str; 8] = [
    "data",
    "_data",
    "image_data",
    "imageBytes",
    "image_bytes",
    "bytesBase64Encoded",
    "b64_json",
    "bytes",
];

/// 文件引用字段
const FILE_FIELDS: [(&str, &str); 2] = [("fileData", "fileUri"), ("file_data", "file_uri")];

/// 地址字段, 值为字符串或 {url}
const URL_FIELDS: [&str; 3] = ["url", "image_url", "imageUrl"];

static DATA_URL_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"data:(image/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/=_-]+)")
});

static MARKDOWN_IMAGE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\((https?://[^)\s]+)\)"));

/// 远程引用下载
pub trait FetchBytes {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, Error>;
}

/// 成功提取图片的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSource {
    InlineData(&'static str),
    ByteField(&'static str),
    FileUri,
    Url(&'static str),
    TextDataUrl,
    TextMarkdownUrl,
}

impl fmt::Display for ProbeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeSource::InlineData(field) => write!(f, "inline field `{field}`"),
            ProbeSource::ByteField(field) => write!(f, "byte field `{field}`"),
            ProbeSource::FileUri => write!(f, "file uri"),
            ProbeSource::Url(field) => write!(f, "url field `{field}`"),
            ProbeSource::TextDataUrl => write!(f, "data url in text"),
            ProbeSource::TextMarkdownUrl => write!(f, "markdown image in text"),
        }
    }
}

pub struct ExtractedImage {
    pub image: DynamicImage,
    pub source: ProbeSource,
}

impl fmt::Debug for ExtractedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedImage")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("source", &self.source)
            .finish()
    }
}

/// 图片探测器
#[derive(Default)]
pub struct ImageProbe<'a> {
    fetcher: Option<&'a dyn FetchBytes>,
}

impl<'a> ImageProbe<'a> {
    pub fn new() -> Self {
        Self { fetcher: None }
    }

    /// 允许下载 http(s) 引用
    pub fn with_fetcher(mut self, fetcher: &'a dyn FetchBytes) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 从全部 parts 中提取图片, 多张时保留最后一张
    ///
    /// 非文本 part 都没有图片时, 再尝试文本中的图片引用
    pub fn extract_last_image(&self, parts: &[Value]) -> Result<ExtractedImage, Error> {
        let mut last_image = None;
        let mut text_parts = Vec::new();
        let mut image_parts = 0;

        for (i, part) in parts.iter().enumerate() {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                info!("response part {i}: text ({} chars)", text.chars().count());
                text_parts.push(text);
                continue;
            }

            match self.probe(part) {
                Ok(extracted) => {
                    image_parts += 1;
                    info!(
                        "response part {i}: image {}x{} from {}",
                        extracted.image.width(),
                        extracted.image.height(),
                        extracted.source
                    );
                    last_image = Some(extracted);
                }
                Err(e) => warn!("response part {i}: failed to process image, {e}"),
            }
        }

        info!(
            "response summary: {} text parts, {} image parts",
            text_parts.len(),
            image_parts
        );
        for (i, text) in text_parts.iter().enumerate() {
            info!("  text {}: {}", i + 1, preview(text, 100));
        }

        if last_image.is_none() {
            last_image = text_parts
                .iter()
                .filter_map(|text| self.probe_text(text))
                .last();
        }

        last_image.ok_or(Error::NoImageInResponse)
    }

    /// 探测单个 part
    pub fn probe(&self, part: &Value) -> Result<ExtractedImage, Error> {
        let strategies: [fn(&Self, &Value) -> Option<ExtractedImage>; 4] = [
            Self::probe_inline,
            Self::probe_byte_fields,
            Self::probe_references,
            |probe: &Self, part: &Value| {
                part.get("text")
                    .and_then(Value::as_str)
                    .and_then(|text| probe.probe_text(text))
            },
        ];

        if let Some(extracted) = strategies.iter().find_map(|strategy| strategy(self, part)) {
            return Ok(extracted);
        }

        let keys = part
            .as_object()
            .map(|obj| obj.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_else(|| format!("<{}>", json_kind(part)));
        warn!("available keys: [{keys}]");
        Err(Error::CannotExtractImage(keys))
    }

    fn probe_inline(&self, part: &Value) -> Option<ExtractedImage> {
        INLINE_FIELDS.iter().find_map(|&field| {
            let blob = part.get(field)?;
            let bytes = blob
                .get("data")
                .or_else(|| blob.get("bytes"))
                .and_then(|data| attempt(field, value_to_bytes(data)))?;
            attempt(field, decode_image(&bytes, mime_hint(blob))).map(|image| ExtractedImage {
                image,
                source: ProbeSource::InlineData(field),
            })
        })
    }

    fn probe_byte_fields(&self, part: &Value) -> Option<ExtractedImage> {
        BYTE_FIELDS.iter().find_map(|&field| {
            let value = part.get(field)?;
            let bytes = attempt(field, value_to_bytes(value))?;
            let hint = value
                .as_str()
                .and_then(data_url_hint)
                .or_else(|| mime_hint(part));
            attempt(field, decode_image(&bytes, hint)).map(|image| ExtractedImage {
                image,
                source: ProbeSource::ByteField(field),
            })
        })
    }

    fn probe_references(&self, part: &Value) -> Option<ExtractedImage> {
        let file_uri = FILE_FIELDS.iter().find_map(|&(field, key)| {
            let file_data = part.get(field)?;
            file_data
                .get(key)?
                .as_str()
                .map(|uri| (uri, ProbeSource::FileUri, mime_hint(file_data)))
        });

        let url = || {
            URL_FIELDS.iter().find_map(|&field| {
                let value = part.get(field)?;
                value
                    .as_str()
                    .or_else(|| value.get("url").and_then(Value::as_str))
                    .map(|url| (url, ProbeSource::Url(field), mime_hint(part)))
            })
        };

        let (reference, source, hint) = file_uri.or_else(url)?;
        let bytes = attempt("reference", self.resolve_reference(reference))?;
        let hint = data_url_hint(reference).or(hint);
        attempt("reference", decode_image(&bytes, hint))
            .map(|image| ExtractedImage { image, source })
    }

    fn probe_text(&self, text: &str) -> Option<ExtractedImage> {
        if let Some(caps) = attempt("text", regex_captures(&DATA_URL_RE, text)).flatten() {
            let hint = caps
                .get(1)
                .and_then(|m| ImageFormat::from_mime_type(m.as_str()));
            let extracted = caps
                .get(2)
                .and_then(|m| attempt("text", decode_base64(m.as_str())))
                .and_then(|bytes| attempt("text", decode_image(&bytes, hint)))
                .map(|image| ExtractedImage {
                    image,
                    source: ProbeSource::TextDataUrl,
                });
            if extracted.is_some() {
                return extracted;
            }
        }

        let caps = attempt("text", regex_captures(&MARKDOWN_IMAGE_RE, text)).flatten()?;
        let url = caps.get(1)?.as_str();
        let bytes = attempt("text", self.resolve_reference(url))?;
        attempt("text", decode_image(&bytes, None)).map(|image| ExtractedImage {
            image,
            source: ProbeSource::TextMarkdownUrl,
        })
    }

    /// 解析引用地址
    ///
    /// - data URL: 直接解码
    /// - http(s): 通过 fetcher 下载
    ///
    /// 其他协议与本地路径一律拒绝
    fn resolve_reference(&self, reference: &str) -> Result<Vec<u8>, Error> {
        if reference.starts_with("data:") {
            return decode_data_url(reference);
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            let fetcher = self.fetcher.ok_or_else(|| {
                Error::OptionNone(format!("no fetcher available for {reference}"))
            })?;
            return fetcher.fetch_bytes(reference);
        }

        Err(Error::InvalidParameter(format!(
            "unsupported reference: {}",
            preview(reference, 60)
        )))
    }
}

/// 记录失败的尝试并继续下一个策略
fn attempt<T>(field: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("`{field}` conversion failed: {e}");
            None
        }
    }
}

fn regex_captures<'t>(
    re: &LazyLock<Result<Regex, regex::Error>>,
    text: &'t str,
) -> Result<Option<Captures<'t>>, Error> {
    let re = re.as_ref().map_err(|e| Error::RegexError(e.clone()))?;
    Ok(re.captures(text))
}

/// part 或 blob 上的 mimeType 对应的图片格式
fn mime_hint(value: &Value) -> Option<ImageFormat> {
    value
        .get("mimeType")
        .or_else(|| value.get("mime_type"))
        .and_then(Value::as_str)
        .and_then(ImageFormat::from_mime_type)
}

/// data:image/png;base64,... 中的图片格式
fn data_url_hint(url: &str) -> Option<ImageFormat> {
    let mime = url.strip_prefix("data:")?.split([';', ',']).next()?;
    ImageFormat::from_mime_type(mime)
}

/// 字段值转为字节
///
/// 支持 base64 字符串、data URL 以及字节数组
fn value_to_bytes(value: &Value) -> Result<Vec<u8>, Error> {
    match value {
        Value::String(s) if s.starts_with("data:") => decode_data_url(s),
        Value::String(s) => decode_base64(s),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| Error::InvalidParameter(format!("not a byte: {item}")))
            })
            .collect(),
        other => Err(Error::InvalidParameter(format!(
            "unexpected {} value",
            json_kind(other)
        ))),
    }
}

/// data:[<mime>][;base64],<data>
fn decode_data_url(url: &str) -> Result<Vec<u8>, Error> {
    let (header, data) = url
        .split_once(',')
        .ok_or_else(|| Error::InvalidParameter("malformed data url".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(Error::InvalidParameter(format!(
            "unsupported data url encoding: {header}"
        )));
    }
    decode_base64(data)
}

/// 兼容标准与 URL 安全字符集, 以及有无填充
pub fn decode_base64(data: &str) -> Result<Vec<u8>, Error> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();

    let mut last_error = None;
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        match engine.decode(&cleaned) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => Ok(Vec::new()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io::Write};

    use image::{Rgb, RgbImage};
    use serde_json::json;

    use super::*;
    use crate::core::utils::image::encode_png;

    fn png_bytes(color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(4, 2, Rgb(color));
        encode_png(&image).expect("encode png")
    }

    fn first_pixel(extracted: &ExtractedImage) -> [u8; 3] {
        extracted.image.to_rgb8().get_pixel(0, 0).0
    }

    struct StubFetcher {
        bytes: Vec<u8>,
        requested: RefCell<Vec<String>>,
    }

    impl FetchBytes for StubFetcher {
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, Error> {
            self.requested.borrow_mut().push(url.to_string());
            Ok(self.bytes.clone())
        }
    }

    #[test]
    fn test_probe_inline_data() -> anyhow::Result<()> {
        let part = json!({
            "inlineData": {"mimeType": "image/png", "data": STANDARD.encode(png_bytes([9, 8, 7]))}
        });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::InlineData("inlineData"));
        assert_eq!(first_pixel(&extracted), [9, 8, 7]);
        assert_eq!(extracted.image.width(), 4);
        Ok(())
    }

    #[test]
    fn test_probe_snake_case_url_safe_base64() -> anyhow::Result<()> {
        let part = json!({
            "inline_data": {"mime_type": "image/png", "data": URL_SAFE_NO_PAD.encode(png_bytes([1, 2, 3]))}
        });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::InlineData("inline_data"));
        Ok(())
    }

    #[test]
    fn test_probe_falls_through_broken_inline() -> anyhow::Result<()> {
        let part = json!({
            "inlineData": {"mimeType": "image/png", "data": "%%%not base64%%%"},
            "b64_json": STANDARD.encode(png_bytes([5, 5, 5]))
        });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::ByteField("b64_json"));
        Ok(())
    }

    #[test]
    fn test_probe_byte_array_field() -> anyhow::Result<()> {
        let part = json!({ "image_bytes": png_bytes([200, 100, 0]) });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::ByteField("image_bytes"));
        assert_eq!(first_pixel(&extracted), [200, 100, 0]);
        Ok(())
    }

    #[test]
    fn test_probe_file_uri_uses_fetcher() -> anyhow::Result<()> {
        let fetcher = StubFetcher {
            bytes: png_bytes([0, 255, 0]),
            requested: RefCell::new(Vec::new()),
        };
        let part = json!({
            "fileData": {"mimeType": "image/png", "fileUri": "https://files.example.com/abc"}
        });

        let extracted = ImageProbe::new().with_fetcher(&fetcher).probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::FileUri);
        assert_eq!(
            fetcher.requested.borrow().as_slice(),
            ["https://files.example.com/abc".to_string()]
        );

        assert!(ImageProbe::new().probe(&part).is_err());
        Ok(())
    }

    #[test]
    fn test_probe_image_url_object_with_data_url() -> anyhow::Result<()> {
        let data_url = format!(
            "data:image/png;base64,{}",
            STANDARD.encode(png_bytes([1, 1, 1]))
        );
        let part = json!({ "type": "image_url", "image_url": {"url": data_url} });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::Url("image_url"));
        Ok(())
    }

    #[test]
    fn test_probe_rejects_local_references() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&png_bytes([3, 3, 3]))?;
        let path = file.path().display().to_string();

        let probe = ImageProbe::new();
        for reference in [format!("file://{path}"), path, "/dev/zero".to_string()] {
            assert!(matches!(
                probe.resolve_reference(&reference),
                Err(Error::InvalidParameter(_))
            ));
            let part = json!({ "file_data": {"file_uri": reference} });
            assert!(matches!(
                probe.probe(&part),
                Err(Error::CannotExtractImage(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_probe_uses_mime_type_hint() -> anyhow::Result<()> {
        let bitmap = RgbImage::from_pixel(3, 2, Rgb([40, 50, 60]));
        let mut tga = std::io::Cursor::new(Vec::new());
        bitmap.write_to(&mut tga, ImageFormat::Tga)?;
        let data = STANDARD.encode(tga.into_inner());

        let part = json!({ "inlineData": {"mimeType": "image/x-tga", "data": data} });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(first_pixel(&extracted), [40, 50, 60]);

        let part = json!({ "inlineData": {"data": data} });
        assert!(ImageProbe::new().probe(&part).is_err());

        let part = json!({ "url": format!("data:image/x-tga;base64,{data}") });
        let extracted = ImageProbe::new().probe(&part)?;
        assert_eq!(extracted.source, ProbeSource::Url("url"));
        Ok(())
    }

    #[test]
    fn test_regex_captures_reports_invalid_pattern() -> anyhow::Result<()> {
        static INVALID_RE: LazyLock<Result<Regex, regex::Error>> =
            LazyLock::new(|| Regex::new("(unclosed"));
        assert!(matches!(
            regex_captures(&INVALID_RE, "text"),
            Err(Error::RegexError(_))
        ));

        let caps = regex_captures(&DATA_URL_RE, "see data:image/webp;base64,QUJD")?;
        let caps = caps.ok_or_else(|| anyhow::anyhow!("no match"))?;
        assert_eq!(caps.get(1).map(|m| m.as_str()), Some("image/webp"));
        assert_eq!(caps.get(2).map(|m| m.as_str()), Some("QUJD"));
        Ok(())
    }

    #[test]
    fn test_data_url_hint() {
        assert_eq!(data_url_hint("data:image/png;base64,AAAA"), Some(ImageFormat::Png));
        assert_eq!(data_url_hint("data:image/jpeg,AAAA"), Some(ImageFormat::Jpeg));
        assert_eq!(data_url_hint("data:text/plain;base64,AAAA"), None);
        assert_eq!(data_url_hint("https://example.com/a.png"), None);
    }

    #[test]
    fn test_probe_reports_available_keys() {
        let part = json!({ "executableCode": {"code": "print(1)"}, "thought": false });
        match ImageProbe::new().probe(&part) {
            Err(Error::CannotExtractImage(keys)) => {
                assert!(keys.contains("executableCode"));
                assert!(keys.contains("thought"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_extract_last_image_wins() -> anyhow::Result<()> {
        let parts = vec![
            json!({"text": "Here you go"}),
            json!({"inlineData": {"mimeType": "image/png", "data": STANDARD.encode(png_bytes([10, 0, 0]))}}),
            json!({"inlineData": {"mimeType": "image/png", "data": "broken"}}),
            json!({"inlineData": {"mimeType": "image/png", "data": STANDARD.encode(png_bytes([20, 0, 0]))}}),
        ];
        let extracted = ImageProbe::new().extract_last_image(&parts)?;
        assert_eq!(first_pixel(&extracted), [20, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_extract_from_markdown_text() -> anyhow::Result<()> {
        let text = format!(
            "Sure!\n\n![image](data:image/png;base64,{})",
            STANDARD.encode(png_bytes([7, 7, 7]))
        );
        let parts = vec![json!({ "text": text })];
        let extracted = ImageProbe::new().extract_last_image(&parts)?;
        assert_eq!(extracted.source, ProbeSource::TextDataUrl);

        let fetcher = StubFetcher {
            bytes: png_bytes([8, 8, 8]),
            requested: RefCell::new(Vec::new()),
        };
        let parts = vec![json!({ "text": "![out](https://cdn.example.com/out.png)" })];
        let extracted = ImageProbe::new()
            .with_fetcher(&fetcher)
            .extract_last_image(&parts)?;
        assert_eq!(extracted.source, ProbeSource::TextMarkdownUrl);
        assert_eq!(first_pixel(&extracted), [8, 8, 8]);
        Ok(())
    }

    #[test]
    fn test_extract_without_image() {
        let parts = vec![json!({"text": "I cannot draw that."})];
        assert!(matches!(
            ImageProbe::new().extract_last_image(&parts),
            Err(Error::NoImageInResponse)
        ));
        assert!(matches!(
            ImageProbe::new().extract_last_image(&[]),
            Err(Error::NoImageInResponse)
        ));
    }

    #[test]
    fn test_decode_base64_variants() -> anyhow::Result<()> {
        let raw = vec![0xfbu8, 0xff, 0xbf, 0x01];
        assert_eq!(decode_base64(&STANDARD.encode(&raw))?, raw);
        assert_eq!(decode_base64(&URL_SAFE.encode(&raw))?, raw);
        assert_eq!(decode_base64(&STANDARD_NO_PAD.encode(&raw))?, raw);

        let wrapped = STANDARD.encode(&raw).chars().fold(String::new(), |mut acc, c| {
            acc.push(c);
            acc.push('\n');
            acc
        });
        assert_eq!(decode_base64(&wrapped)?, raw);
        assert!(decode_base64("***").is_err());
        Ok(())
    }
}
