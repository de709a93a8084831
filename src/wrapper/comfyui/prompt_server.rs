//! Prompt Server

use pyo3::{
    PyResult, PyTypeInfo, Python,
    types::{PyAnyMethods, PyDict, PyDictMethods, PyModule},
};

/// 前端消息事件名称
const EVENT_NAME: &str = "comfyui_gemini";

/// comfyui PromptServer wrapper
pub trait PromptServer: PyTypeInfo {
    /// 发送错误信息到ComfyUI
    ///
    /// 节点执行出现异常时通知前端
    fn send_error(&self, py: Python, error_type: String, message: String) -> PyResult<()> {
        let server = PyModule::import(py, "server")?
            .getattr("PromptServer")?
            .getattr("instance")?;

        let error_data = PyDict::new(py);
        error_data.set_item("type", &error_type)?;
        error_data.set_item("node", self.get_class_name(py)?)?;
        error_data.set_item("message", message)?;

        server.getattr("send_sync")?.call1((EVENT_NAME, error_data))?;

        Ok(())
    }

    /// Class 名称
    fn get_class_name(&self, py: Python) -> PyResult<String> {
        Self::type_object(py)
            .getattr("__name__")?
            .extract::<String>()
    }
}
