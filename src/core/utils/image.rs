//! image 与 tensor 相互转换
//!
//! - 张量: [B, H, W, C], f32, 取值 [0, 1]
//! - 位图: RGB, u8, 取值 [0, 255]
use std::{
    io::{Cursor, Write},
    path::Path,
};

use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage};
use log::{info, warn};

use crate::error::Error;

/// 将张量转换为 RGB 位图
///
/// tensor: BHWC/HWC, 批次输入时只取第一张
pub fn tensor_to_bitmap(tensor: &Tensor) -> Result<RgbImage, Error> {
    let tensor = match tensor.rank() {
        4 => tensor.get(0)?,
        3 => tensor.clone(),
        _ => {
            return Err(Error::InvalidTensorShape(format!(
                "expected [batch, height, width, channels], got {:?}",
                tensor.dims()
            )));
        }
    };
    let (height, width, channels) = tensor.dims3()?;

    // 缩放 + clip + 截断为 u8
    let tensor = (tensor.to_dtype(DType::F32)? * 255.0)?
        .clamp(0.0, 255.0)?
        .to_dtype(DType::U8)?;
    let buffer = tensor.contiguous()?.flatten_all()?.to_vec1::<u8>()?;

    let (width, height) = (width as u32, height as u32);
    let image = match channels {
        1 => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, buffer).ok_or(Error::ImageBuffer)?,
        ),
        3 => DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, buffer).ok_or(Error::ImageBuffer)?,
        ),
        4 => DynamicImage::ImageRgba8(
            RgbaImage::from_raw(width, height, buffer).ok_or(Error::ImageBuffer)?,
        ),
        _ => return Err(Error::UnsupportedNumberOfChannels(channels as u32)),
    };

    Ok(image.into_rgb8())
}

/// 将图像转换为张量
///
/// output: [1, H, W, 3]
pub fn bitmap_to_tensor(image: &DynamicImage, device: &Device) -> Result<Tensor, Error> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let data: Vec<f32> = rgb.into_raw().into_iter().map(|v| v as f32 / 255.0).collect();
    let tensor = Tensor::from_vec(data, (1, height as usize, width as usize, 3), device)?;

    Ok(tensor)
}

/// 位图编码为 PNG
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, Error> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// 解码图片
///
/// 先按文件头在内存中识别格式; 识别失败且给出格式提示 (通常来自 mimeType) 时,
/// 以对应扩展名写入临时文件, 由扩展名决定解码器。TGA 等格式没有文件头特征。
pub fn decode_image(bytes: &[u8], hint: Option<ImageFormat>) -> Result<DynamicImage, Error> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(Error::from)
        .and_then(|reader| reader.decode().map_err(Error::from));

    let e = match decoded {
        Ok(image) => return Ok(image),
        Err(e) => e,
    };

    let Some(extension) = hint.and_then(|format| format.extensions_str().first()) else {
        return Err(e);
    };
    warn!("in-memory image decode failed, retrying through a .{extension} temp file: {e}");
    decode_via_temp_file(bytes, &format!(".{extension}"))
}

/// 写入临时文件后重新打开
///
/// 格式优先按文件头识别, 其次按扩展名; 像素在返回前全部加载
pub fn decode_via_temp_file(bytes: &[u8], suffix: &str) -> Result<DynamicImage, Error> {
    decode_via_temp_file_in(bytes, suffix, &std::env::temp_dir())
}

fn decode_via_temp_file_in(bytes: &[u8], suffix: &str, dir: &Path) -> Result<DynamicImage, Error> {
    let mut temp_file = tempfile::Builder::new()
        .prefix("comfyui_gemini_")
        .suffix(suffix)
        .tempfile_in(dir)?;
    temp_file.write_all(bytes)?;
    temp_file.flush()?;

    // 出错时 NamedTempFile 在 drop 时删除
    let image = ImageReader::open(temp_file.path())?
        .with_guessed_format()?
        .decode()?;

    let path = temp_file.path().to_path_buf();
    if let Err(e) = temp_file.close() {
        warn!("failed to remove temp file {}: {e}", path.display());
    }

    info!("image decoded through temp file, {}x{}", image.width(), image.height());
    Ok(image)
}
