//! Gemini Image Generator
//!
//! 文生图 / 图生图, 暂时只支持单张参考图
//! 依赖:
//! - python: torch

use candle_core::Device;
use log::{error, info};
use pyo3::{
    Bound, Py, PyAny, PyErr, PyResult, Python,
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
};

use crate::{
    core::{
        category::CATEGORY_IMAGE_GENERATION,
        utils::image::{bitmap_to_tensor, tensor_to_bitmap},
    },
    error::Error,
    gemini::{
        AspectRatio, ExtractedImage, GeminiClient, HttpOptions, ImageModel, ImageProbe,
        Resolution,
        config::{API_KEY_PLACEHOLDER, HOST_PLACEHOLDER, choices, resolve_api_key},
        types::{GenerateContentRequest, GenerationConfig, ImageConfig, Part},
    },
    wrapper::{
        comfyui::{
            PromptServer,
            types::{NODE_IMAGE, NODE_STRING},
        },
        torch::tensor::TensorWrapper,
    },
};

/// 响应模态
const RESPONSE_MODALITIES: [&str; 2] = ["TEXT", "IMAGE"];

/// Gemini Image Generator
#[pyclass(subclass)]
pub struct GeminiImageGenerator {
    device: Device,
}

impl PromptServer for GeminiImageGenerator {}

#[pymethods]
impl GeminiImageGenerator {
    #[new]
    fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }

    #[classattr]
    #[pyo3(name = "INPUT_IS_LIST")]
    fn input_is_list() -> bool {
        false
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str,) {
        (NODE_IMAGE,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("image",)
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_IS_LIST")]
    fn output_is_list() -> (bool,) {
        (false,)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_IMAGE_GENERATION;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Generate an image with Google Gemini. A reference image turns the request into an edit."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "execute";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::attach(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item(
                    "api_key",
                    (NODE_STRING, {
                        let params = PyDict::new(py);
                        params.set_item("multiline", false)?;
                        params.set_item("default", API_KEY_PLACEHOLDER)?;
                        params
                    }),
                )?;
                required.set_item(
                    "host",
                    (NODE_STRING, {
                        let params = PyDict::new(py);
                        params.set_item("multiline", false)?;
                        params.set_item("default", HOST_PLACEHOLDER)?;
                        params.set_item("tooltip", "Api base url, e.g. a proxy host")?;
                        params
                    }),
                )?;
                required.set_item(
                    "prompt",
                    (NODE_STRING, {
                        let params = PyDict::new(py);
                        params.set_item("multiline", true)?;
                        params.set_item("default", "Generate an image")?;
                        params
                    }),
                )?;
                required.set_item(
                    "aspect_ratio",
                    (choices::<AspectRatio>(), {
                        let params = PyDict::new(py);
                        params.set_item("default", AspectRatio::default().to_string())?;
                        params
                    }),
                )?;
                required.set_item(
                    "resolution",
                    (choices::<Resolution>(), {
                        let params = PyDict::new(py);
                        params.set_item("default", Resolution::default().to_string())?;
                        params
                    }),
                )?;
                required
            })?;

            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item("reference_image", (NODE_IMAGE,))?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(
        name = "execute",
        signature = (api_key, host, prompt, aspect_ratio, resolution, reference_image=None)
    )]
    fn execute<'py>(
        &self,
        py: Python<'py>,
        api_key: String,
        host: String,
        prompt: String,
        aspect_ratio: String,
        resolution: String,
        reference_image: Option<Bound<'py, PyAny>>,
    ) -> PyResult<(Bound<'py, PyAny>,)> {
        let result = self.generate_image(
            py,
            &api_key,
            &host,
            &prompt,
            &aspect_ratio,
            &resolution,
            reference_image,
        );

        match result {
            Ok(image) => Ok((image,)),
            Err(e) => {
                error!("[Gemini] GeminiImageGenerator error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "GeminiImageGenerator".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                }
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

impl GeminiImageGenerator {
    /// 生成图片
    #[allow(clippy::too_many_arguments)]
    fn generate_image<'py>(
        &self,
        py: Python<'py>,
        api_key: &str,
        host: &str,
        prompt: &str,
        aspect_ratio: &str,
        resolution: &str,
        reference_image: Option<Bound<'py, PyAny>>,
    ) -> Result<Bound<'py, PyAny>, Error> {
        let aspect_ratio: AspectRatio = aspect_ratio.parse()?;
        let resolution: Resolution = resolution.parse()?;
        let client = GeminiClient::new(resolve_api_key(api_key)?, HttpOptions::from_host(host))?;

        let mut parts = vec![Part::text(prompt)];
        match reference_image {
            Some(reference_image) => {
                let tensor =
                    TensorWrapper::<f32>::new(&reference_image, &self.device)?.into_tensor();
                let bitmap = tensor_to_bitmap(&tensor)?;
                info!(
                    "[Gemini] reference image added, size: {}x{}",
                    bitmap.width(),
                    bitmap.height()
                );
                parts.push(Part::png(&bitmap)?);
            }
            None => info!("[Gemini] no reference image provided"),
        }

        let request = build_request(parts, aspect_ratio, resolution);
        info!("[Gemini] request:");
        info!("  - prompt length: {} chars", prompt.chars().count());
        info!(
            "  - contents: {} (1 = text only, 2 = text + image)",
            request.part_count()
        );
        info!("  - aspect ratio: {aspect_ratio}");
        info!("  - resolution: {resolution}");

        let model = ImageModel::default().to_string();
        let extracted = py.detach(|| -> Result<ExtractedImage, Error> {
            let response = client.generate_content(&model, &request)?;
            info!("[Gemini] response received");
            ImageProbe::new()
                .with_fetcher(&client)
                .extract_last_image(response.parts())
        })?;

        let tensor = bitmap_to_tensor(&extracted.image, &self.device)?;
        info!("[Gemini] output tensor shape: {:?}", tensor.dims());

        let py_tensor = TensorWrapper::<f32>::from(tensor).to_py_tensor(py)?;
        Ok(py_tensor)
    }
}

/// 构建图片生成请求
fn build_request(
    parts: Vec<Part>,
    aspect_ratio: AspectRatio,
    resolution: Resolution,
) -> GenerateContentRequest {
    GenerateContentRequest::user(parts).with_generation_config(GenerationConfig {
        response_modalities: Some(RESPONSE_MODALITIES.iter().map(|v| v.to_string()).collect()),
        image_config: Some(ImageConfig {
            aspect_ratio: aspect_ratio.to_string(),
            image_size: resolution.to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_build_request() -> anyhow::Result<()> {
        let request = build_request(
            vec![Part::text("a cat")],
            AspectRatio::Landscape16x9,
            Resolution::FourK,
        );
        assert_eq!(request.part_count(), 1);

        let body = serde_json::to_value(&request)?;
        assert_eq!(
            body["generationConfig"],
            json!({
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {"aspectRatio": "16:9", "imageSize": "4K"}
            })
        );
        Ok(())
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        assert!("7:3".parse::<AspectRatio>().is_err());
        assert!("3K".parse::<Resolution>().is_err());
    }

    #[test]
    #[ignore]
    fn test_missing_api_key_raises() {
        Python::initialize();
        Python::attach(|py| {
            let node = GeminiImageGenerator::new();
            let result = node.execute(
                py,
                String::new(),
                String::new(),
                "a cat".to_string(),
                "1:1".to_string(),
                "1K".to_string(),
                None,
            );
            assert!(result.is_err());
        });
    }
}
