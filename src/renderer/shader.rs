use gfx_hal::{prelude::*, pso, Backend};
use log::{debug, error};
use std::fmt;
use std::io::{Cursor, Read};
use std::mem::ManuallyDrop;
use std::ptr;
use thiserror::Error;

pub const ENTRY_NAME: &str = "main";

/// Passes the 2D position through; y is negated so clip space keeps +y up.
pub const VERTEX_SHADER_SOURCE: &str = r#"
#version 450

layout(location = 0) in vec2 a_position;

void main() {
    gl_Position = vec4(a_position.x, -a_position.y, 0.0, 1.0);
}
"#;

pub const FRAGMENT_SHADER_SOURCE: &str = r#"
#version 450

layout(push_constant) uniform Color {
    vec4 u_color;
} color;

layout(location = 0) out vec4 frag_color;

void main() {
    frag_color = color.u_color;
}
"#;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage} shader compilation failed: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("{stage} shader module creation failed: {message}")]
    Module { stage: ShaderStage, message: String },
    #[error("program linking failed: {0}")]
    Link(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn shader_type(self) -> glsl_to_spirv::ShaderType {
        match self {
            ShaderStage::Vertex => glsl_to_spirv::ShaderType::Vertex,
            ShaderStage::Fragment => glsl_to_spirv::ShaderType::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Compiles GLSL source text into SPIR-V words.
///
/// The compiler diagnostic is logged before the error is returned.
pub fn compile_spirv(stage: ShaderStage, source: &str) -> Result<Vec<u32>, ShaderError> {
    let compile_error = |log: String| {
        error!("{} shader failed to compile:\n{}", stage, log);
        ShaderError::Compile { stage, log }
    };

    let mut file = glsl_to_spirv::compile(source, stage.shader_type()).map_err(compile_error)?;
    let mut bytes = vec![];
    file.read_to_end(&mut bytes)
        .map_err(|e| compile_error(e.to_string()))?;
    let words = pso::read_spirv(Cursor::new(&bytes[..])).map_err(|e| compile_error(e.to_string()))?;

    debug!("compiled {} shader into {} SPIR-V words", stage, words.len());
    Ok(words)
}

/// A compiled shader module, released when dropped.
pub struct Shader<'a, B: Backend> {
    device: &'a B::Device,
    pub stage: ShaderStage,
    pub module: ManuallyDrop<B::ShaderModule>,
}

impl<'a, B: Backend> Shader<'a, B> {
    pub fn new(device: &'a B::Device, stage: ShaderStage, source: &str) -> Result<Self, ShaderError> {
        let spirv = compile_spirv(stage, source)?;
        let module = unsafe { device.create_shader_module(&spirv) }.map_err(|e| {
            let message = format!("{:?}", e);
            error!("{} shader module rejected by the device: {}", stage, message);
            ShaderError::Module { stage, message }
        })?;

        Ok(Shader {
            device,
            stage,
            module: ManuallyDrop::new(module),
        })
    }
}

impl<'a, B: Backend> Drop for Shader<'a, B> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_shader_module(ManuallyDrop::into_inner(ptr::read(&self.module)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn fixed_sources_compile() {
        let vs = compile_spirv(ShaderStage::Vertex, VERTEX_SHADER_SOURCE).unwrap();
        let fs = compile_spirv(ShaderStage::Fragment, FRAGMENT_SHADER_SOURCE).unwrap();
        assert_eq!(vs[0], SPIRV_MAGIC);
        assert_eq!(fs[0], SPIRV_MAGIC);
    }

    #[test]
    fn broken_source_reports_diagnostic() {
        let source = "#version 450\nvoid main() { gl_Position = vec4(oops); }\n";
        match compile_spirv(ShaderStage::Vertex, source) {
            Err(ShaderError::Compile { stage, log }) => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(!log.is_empty());
            }
            other => panic!("expected a compile error, got {:?}", other.map(|w| w.len())),
        }
    }

    #[test]
    fn stage_names() {
        assert_eq!(ShaderStage::Vertex.to_string(), "vertex");
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }
}
