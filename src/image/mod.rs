//! 图片

use pyo3::{
    Bound, PyResult, Python,
    types::{PyModule, PyModuleMethods},
};

use crate::core::node::NodeRegister;

mod gemini_image_generator;
pub use gemini_image_generator::GeminiImageGenerator;

/// 图片模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "image")?;
    submodule.add_class::<GeminiImageGenerator>()?;
    Ok(submodule)
}

/// Image node register
pub fn node_register(py: Python<'_>) -> PyResult<Vec<NodeRegister<'_>>> {
    let nodes: Vec<NodeRegister> = vec![NodeRegister(
        "GeminiImageGenerator",
        py.get_type::<GeminiImageGenerator>(),
        "Gemini Image Generator",
    )];
    Ok(nodes)
}
