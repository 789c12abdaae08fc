use std::io::Cursor;
use std::sync::Arc;
use ash::vk;
use crate::renderer::error::{InitFailure, InitStage, RenderError, Result, VkResultExt};

/// Compiled SPIR-V for the two graphics stages, as opaque bytes
#[derive(Debug, Clone, Copy)]
pub struct ShaderCode<'a> {
    pub vertex: &'a [u8],
    pub fragment: &'a [u8],
}

pub struct GraphicsShader {
    pub vert_mod: vk::ShaderModule,
    pub frag_mod: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl GraphicsShader {
    pub fn new(code: ShaderCode<'_>, device: Arc<ash::Device>) -> Result<Self> {
        let vert_words = read_spirv(code.vertex)?;
        let frag_words = read_spirv(code.fragment)?;

        let vert_mod = create_shader_module(&vert_words, &device)?;
        let frag_mod = match create_shader_module(&frag_words, &device) {
            Ok(module) => module,
            Err(e) => {
                unsafe {
                    device.destroy_shader_module(vert_mod, None);
                }
                return Err(e);
            }
        };

        Ok(Self { vert_mod, frag_mod, device })
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert_mod, None);
            self.device.destroy_shader_module(self.frag_mod, None);
        }
    }
}

/// Checks the SPIR-V magic number and word alignment, fixing endianness
pub fn read_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RenderError::init(InitStage::Pipeline, InitFailure::InvalidShader(e)))
}

fn create_shader_module(code: &[u32], device: &ash::Device) -> Result<vk::ShaderModule> {
    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(code);

    unsafe {
        device.create_shader_module(&shader_module_info, None)
    }.init_stage(InitStage::Pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn accepts_word_aligned_spirv() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        assert_eq!(read_spirv(bytes).unwrap(), words);
    }

    #[test]
    fn rejects_truncated_code() {
        let words = [SPIRV_MAGIC, 0x0001_0000];
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        let err = read_spirv(&bytes[..7]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Initialization {
                stage: InitStage::Pipeline,
                reason: InitFailure::InvalidShader(_),
            }
        ));
    }

    #[test]
    fn rejects_code_without_magic_number() {
        let bytes = b"#version 450\nvoid main() {}\n\0\0\0\0";
        assert_eq!(bytes.len() % 4, 0);
        assert!(read_spirv(bytes).is_err());
    }

    #[test]
    fn rejects_empty_code() {
        assert!(read_spirv(&[]).is_err());
    }
}
