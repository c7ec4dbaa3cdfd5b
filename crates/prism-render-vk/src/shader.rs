// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V modules loaded from `assets/shaders/<name>.<stage>.spv`.
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use prism_render::RenderError;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::vk_err;

pub const SHADER_DIR: &str = "assets/shaders";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vert" => Some(ShaderStage::Vertex),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

pub fn shader_path(root: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    root.join(format!("{name}.{}.spv", stage.extension()))
}

/// Parses `"ui.vert"` into `("ui", Vertex)`.
pub fn parse_shader_key(key: &str) -> Option<(&str, ShaderStage)> {
    let (name, ext) = key.rsplit_once('.')?;
    if name.is_empty() {
        return None;
    }
    Some((name, ShaderStage::from_extension(ext)?))
}

/// Loads and owns shader modules, destroyed with the library.
pub struct ShaderLibrary {
    ctx: Arc<DeviceContext>,
    root: PathBuf,
    modules: HashMap<(String, ShaderStage), vk::ShaderModule>,
}

impl ShaderLibrary {
    pub fn new(ctx: &Arc<DeviceContext>, root: impl Into<PathBuf>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            root: root.into(),
            modules: HashMap::new(),
        }
    }

    /// Loads each `<name>.<stage>` key; any unreadable file is fatal.
    pub fn load_required(&mut self, keys: &[String]) -> Result<(), RenderError> {
        for key in keys {
            let (name, stage) = parse_shader_key(key).ok_or_else(|| RenderError::ShaderUnreadable {
                path: PathBuf::from(key),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "expected <name>.<vert|frag|comp>",
                ),
            })?;
            self.load(name, stage)?;
        }
        if !keys.is_empty() {
            info!("vk: loaded {} shader module(s) from {}", keys.len(), self.root.display());
        }
        Ok(())
    }

    pub fn load(&mut self, name: &str, stage: ShaderStage) -> Result<vk::ShaderModule, RenderError> {
        if let Some(&m) = self.modules.get(&(name.to_owned(), stage)) {
            return Ok(m);
        }
        let path = shader_path(&self.root, name, stage);
        let code = File::open(&path)
            .and_then(|mut f| read_spv(&mut f))
            .map_err(|source| RenderError::ShaderUnreadable {
                path: path.clone(),
                source,
            })?;
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: code.len() * 4,
            p_code: code.as_ptr(),
            ..Default::default()
        };
        let module = unsafe { self.ctx.device.create_shader_module(&ci, None) }
            .map_err(|e| vk_err("create_shader_module", e))?;
        debug!("vk: shader {} ({} words)", path.display(), code.len());
        self.modules.insert((name.to_owned(), stage), module);
        Ok(module)
    }

    pub fn get(&self, name: &str, stage: ShaderStage) -> Option<vk::ShaderModule> {
        self.modules.get(&(name.to_owned(), stage)).copied()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Drop for ShaderLibrary {
    fn drop(&mut self) {
        for (_, m) in self.modules.drain() {
            unsafe { self.ctx.device.destroy_shader_module(m, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_follows_naming_convention() {
        let p = shader_path(Path::new(SHADER_DIR), "ui", ShaderStage::Fragment);
        assert_eq!(p, Path::new("assets/shaders/ui.frag.spv"));
    }

    #[test]
    fn keys_parse_name_and_stage() {
        assert_eq!(parse_shader_key("ui.vert"), Some(("ui", ShaderStage::Vertex)));
        assert_eq!(parse_shader_key("post.fx.comp"), Some(("post.fx", ShaderStage::Compute)));
        assert_eq!(parse_shader_key("ui.geom"), None);
        assert_eq!(parse_shader_key(".frag"), None);
        assert_eq!(parse_shader_key("ui"), None);
    }

    #[test]
    fn stage_extension_round_trips() {
        for s in [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute] {
            assert_eq!(ShaderStage::from_extension(s.extension()), Some(s));
        }
    }
}
