use hashbrown::HashMap;

use crate::backend::{AttributeSlot, ShaderProgram, UniformSlot, UniformValue};

/// Program with a declared set of attribute and uniform names.
///
/// Uniform writes are recorded so tests can inspect what a draw set.
#[derive(Debug, Default, Clone)]
pub struct HostProgram {
    attributes: Vec<String>,
    uniforms: Vec<String>,
    values: HashMap<UniformSlot, UniformValue>,
    own_textures: u32,
    texture_binds: u32,
}

impl HostProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare attribute inputs. Slots follow declaration order.
    pub fn with_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare uniforms. Slots follow declaration order.
    pub fn with_uniforms<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uniforms.extend(names.into_iter().map(Into::into));
        self
    }

    /// Number of texture units the program binds for itself.
    pub fn with_own_textures(mut self, count: u32) -> Self {
        self.own_textures = count;
        self
    }

    /// Last value set for a uniform.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        let slot = self.find_uniform(name)?;
        self.values.get(&slot).copied()
    }

    /// How many times the program bound its own textures.
    pub fn texture_binds(&self) -> u32 {
        self.texture_binds
    }

    /// Forget recorded uniform values.
    pub fn clear_uniforms(&mut self) {
        self.values.clear();
    }
}

impl ShaderProgram for HostProgram {
    fn find_attribute(&self, name: &str) -> Option<AttributeSlot> {
        self.attributes
            .iter()
            .position(|n| n == name)
            .map(|i| AttributeSlot(i as u32))
    }

    fn find_uniform(&self, name: &str) -> Option<UniformSlot> {
        self.uniforms
            .iter()
            .position(|n| n == name)
            .map(|i| UniformSlot(i as u32))
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        self.values.insert(slot, value);
    }

    fn bind_textures(&mut self) -> u32 {
        self.texture_binds += 1;
        self.own_textures
    }
}
