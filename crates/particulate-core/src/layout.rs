//! Interleaved per-vertex attribute layout.
//!
//! A particle vertex is made of static attributes, supplied by the producer and
//! interleaved into one device buffer, and varying attributes, which are
//! computed on the device and live in their own tightly packed buffers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage format of a single vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeFormat {
    /// One 32-bit float.
    Float,
    /// Two 32-bit floats.
    Float2,
    /// Three 32-bit floats.
    Float3,
    /// Four 32-bit floats.
    Float4,
    /// Four unsigned bytes, normalized to `[0, 1]` when read by a shader.
    UNorm8x4,
    /// One 32-bit signed integer.
    Int,
}

impl AttributeFormat {
    /// Size of one value in bytes.
    #[inline]
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::Float | Self::UNorm8x4 | Self::Int => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }

    /// Number of components in one value.
    #[inline]
    pub const fn components(self) -> u32 {
        match self {
            Self::Float | Self::Int => 1,
            Self::Float2 => 2,
            Self::Float3 => 3,
            Self::Float4 | Self::UNorm8x4 => 4,
        }
    }

    /// Whether integer components are normalized when read.
    #[inline]
    pub const fn normalized(self) -> bool {
        matches!(self, Self::UNorm8x4)
    }
}

/// One named per-vertex stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Shader-side attribute name (e.g. `a_position`).
    pub name: String,
    /// Component layout of one value.
    pub format: AttributeFormat,
}

impl AttributeSpec {
    /// Create a new attribute spec.
    pub fn new(name: impl Into<String>, format: AttributeFormat) -> Self {
        Self {
            name: name.into(),
            format,
        }
    }

    /// Size of one value in bytes.
    #[inline]
    pub const fn byte_size(&self) -> u32 {
        self.format.byte_size()
    }
}

/// A computed stream has the same shape as a static one.
pub type VaryingSpec = AttributeSpec;

/// Static and varying attributes of a particle vertex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeLayout {
    attributes: Vec<AttributeSpec>,
    offsets: Vec<u32>,
    varyings: Vec<VaryingSpec>,
    stride: u32,
}

impl AttributeLayout {
    /// Build a layout, computing interleaved offsets in declaration order.
    ///
    /// Names must be non-empty and unique across static and varying streams,
    /// since programs look attributes up by name.
    pub fn new(attributes: Vec<AttributeSpec>, varyings: Vec<VaryingSpec>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for spec in attributes.iter().chain(varyings.iter()) {
            if spec.name.is_empty() {
                return Err(Error::InvalidLayout("attribute with empty name".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::InvalidLayout(format!(
                    "duplicate attribute name `{}`",
                    spec.name
                )));
            }
        }

        let mut offsets = Vec::with_capacity(attributes.len());
        let mut stride = 0;
        for spec in &attributes {
            offsets.push(stride);
            stride += spec.byte_size();
        }

        Ok(Self {
            attributes,
            offsets,
            varyings,
            stride,
        })
    }

    /// Layout with static attributes only.
    pub fn with_attributes(attributes: Vec<AttributeSpec>) -> Result<Self> {
        Self::new(attributes, Vec::new())
    }

    /// Bytes per vertex in the interleaved static buffer.
    #[inline]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Static attributes in declaration order.
    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    /// Computed attributes in declaration order.
    pub fn varyings(&self) -> &[VaryingSpec] {
        &self.varyings
    }

    /// Byte offset of static attribute `index` within a vertex.
    pub fn offset(&self, index: usize) -> Option<u32> {
        self.offsets.get(index).copied()
    }

    /// Static attributes paired with their offsets.
    pub fn attributes_with_offsets(&self) -> impl Iterator<Item = (&AttributeSpec, u32)> {
        self.attributes.iter().zip(self.offsets.iter().copied())
    }

    /// Whether any attribute is computed on the device.
    #[inline]
    pub fn has_varyings(&self) -> bool {
        !self.varyings.is_empty()
    }
}
