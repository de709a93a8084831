//! Gemini LLM
//!
//! 文本生成, 可附带一张参考图片
//! 依赖:
//! - python: torch

use candle_core::Device;
use log::{error, info};
use pyo3::{
    Bound, Py, PyAny, PyResult, Python, pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
};

use crate::{
    core::{
        category::CATEGORY_TEXT_GENERATION,
        utils::{image::tensor_to_bitmap, text::preview},
    },
    error::Error,
    gemini::{
        GeminiClient, HttpOptions, TextModel,
        config::{API_KEY_PLACEHOLDER, HOST_PLACEHOLDER, choices, resolve_api_key},
        types::{GenerateContentRequest, Part},
    },
    wrapper::{
        comfyui::{
            PromptServer,
            types::{NODE_IMAGE, NODE_STRING},
        },
        torch::tensor::TensorWrapper,
    },
};

/// Gemini LLM
///
/// 客户端在节点实例上缓存, api_key 或 host 变化时重建
#[pyclass(subclass)]
pub struct GeminiLlm {
    device: Device,
    client: Option<GeminiClient>,
}

impl PromptServer for GeminiLlm {}

#[pymethods]
impl GeminiLlm {
    #[new]
    fn new() -> Self {
        Self {
            device: Device::Cpu,
            client: None,
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
        (NODE_STRING,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("text",)
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_IS_LIST")]
    fn output_is_list() -> (bool,) {
        (false,)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_TEXT_GENERATION;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Generate text with Google Gemini. An optional image is sent along with the prompt."
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
                    "model",
                    (choices::<TextModel>(), {
                        let params = PyDict::new(py);
                        params.set_item("default", TextModel::default().to_string())?;
                        params
                    }),
                )?;
                required.set_item(
                    "prompt",
                    (NODE_STRING, {
                        let params = PyDict::new(py);
                        params.set_item("multiline", true)?;
                        params.set_item("default", "Tell me about this")?;
                        params
                    }),
                )?;
                required
            })?;

            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item("image", (NODE_IMAGE,))?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[pyo3(name = "execute", signature = (api_key, host, model, prompt, image=None))]
    fn execute<'py>(
        &mut self,
        py: Python<'py>,
        api_key: String,
        host: String,
        model: String,
        prompt: String,
        image: Option<Bound<'py, PyAny>>,
    ) -> PyResult<(String,)> {
        let result = self.generate_text(py, &api_key, &host, &model, &prompt, image);

        match result {
            Ok(text) => Ok((text,)),
            Err(e) => {
                error!("GeminiLlm error, {e}");
                if let Err(send_err) = self.send_error(py, "GeminiLlm".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                }
                // 文本节点将错误信息作为输出, 不中断工作流
                Ok((format!("Error generating text: {e}"),))
            }
        }
    }
}

impl GeminiLlm {
    /// 生成文本
    fn generate_text<'py>(
        &mut self,
        py: Python<'py>,
        api_key: &str,
        host: &str,
        model: &str,
        prompt: &str,
        image: Option<Bound<'py, PyAny>>,
    ) -> Result<String, Error> {
        let model: TextModel = model.parse()?;
        self.init_client(api_key, host)?;

        let mut parts = Vec::with_capacity(2);
        if let Some(image) = image {
            let tensor = TensorWrapper::<f32>::new(&image, &self.device)?.into_tensor();
            let bitmap = tensor_to_bitmap(&tensor)?;
            info!(
                "image added to request, size: {}x{}",
                bitmap.width(),
                bitmap.height()
            );
            parts.push(Part::png(&bitmap)?);
        }
        parts.push(Part::text(prompt));

        info!("model: {model}");
        info!("prompt: {}", preview(prompt, 100));

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::OptionNone("gemini client is not initialized".to_string()))?;
        let request = GenerateContentRequest::user(parts);
        let model_name = model.to_string();

        let response = py.detach(|| client.generate_content(&model_name, &request))?;
        let text = response.text().ok_or_else(|| {
            info!("finish reason: {:?}", response.finish_reason());
            Error::NoTextInResponse
        })?;

        info!("generated text length: {} chars", text.chars().count());
        Ok(text)
    }

    /// 创建或复用客户端
    fn init_client(&mut self, api_key: &str, host: &str) -> Result<(), Error> {
        let api_key = resolve_api_key(api_key)?;
        let options = HttpOptions::from_host(host);

        if let Some(client) = &self.client {
            if client.is_same(&api_key, &options) {
                return Ok(());
            }
        }

        info!("connecting to {} ...", options.base_url);
        self.client = Some(GeminiClient::new(api_key, options)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_cached_until_credentials_change() -> anyhow::Result<()> {
        let mut node = GeminiLlm::new();

        node.init_client("key-a", "https://proxy.example.com")?;
        let first = node.client.as_ref().map(|c| c.options().clone());
        assert_eq!(
            first.as_ref().map(|o| o.base_url.as_str()),
            Some("https://proxy.example.com")
        );

        node.init_client("key-a", "https://proxy.example.com/")?;
        assert!(
            node.client
                .as_ref()
                .is_some_and(|c| c.is_same("key-a", &HttpOptions::from_host("https://proxy.example.com")))
        );

        node.init_client("key-b", "https://other.example.com")?;
        assert!(
            node.client
                .as_ref()
                .is_some_and(|c| c.is_same("key-b", &HttpOptions::from_host("https://other.example.com")))
        );
        Ok(())
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        assert!("gpt-4".parse::<TextModel>().is_err());
        assert_eq!(
            "gemini-2.0-flash-exp".parse::<TextModel>().ok(),
            Some(TextModel::Gemini20FlashExp)
        );
    }

    #[test]
    #[ignore]
    fn test_error_is_returned_as_text() -> anyhow::Result<()> {
        Python::initialize();
        Python::attach(|py| -> anyhow::Result<()> {
            let mut node = GeminiLlm::new();
            let (text,) = node.execute(
                py,
                "key".to_string(),
                "http://127.0.0.1:9".to_string(),
                "not-a-model".to_string(),
                "hello".to_string(),
                None,
            )?;
            assert!(text.starts_with("Error generating text:"));
            Ok(())
        })
    }
}
