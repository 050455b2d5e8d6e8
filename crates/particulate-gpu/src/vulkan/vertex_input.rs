use ash::vk;
use particulate_core::{AttributeFormat, AttributeLayout};

/// Vulkan format of an attribute.
pub const fn vertex_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float => vk::Format::R32_SFLOAT,
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        AttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        AttributeFormat::UNorm8x4 => vk::Format::R8G8B8A8_UNORM,
        AttributeFormat::Int => vk::Format::R32_SINT,
    }
}

/// Vertex input state for a particle pipeline.
///
/// Every stream gets its own binding so chunks can rebind offsets per draw.
/// Static attributes come first, then varyings. When `instanced` is set the
/// particle streams advance per instance and two per-vertex template streams
/// (`a_offset`, `a_texCoord`) follow.
pub fn vertex_input_descriptions(
    layout: &AttributeLayout,
    instanced: bool,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let rate = if instanced {
        vk::VertexInputRate::INSTANCE
    } else {
        vk::VertexInputRate::VERTEX
    };

    let mut bindings = Vec::new();
    let mut attributes = Vec::new();
    let mut push = |format: AttributeFormat, stride: u32, rate: vk::VertexInputRate| {
        let index = bindings.len() as u32;
        bindings.push(
            vk::VertexInputBindingDescription::default()
                .binding(index)
                .stride(stride)
                .input_rate(rate),
        );
        attributes.push(
            vk::VertexInputAttributeDescription::default()
                .location(index)
                .binding(index)
                .format(vertex_format(format))
                .offset(0),
        );
    };

    for spec in layout.attributes() {
        push(spec.format, layout.stride(), rate);
    }
    for spec in layout.varyings() {
        push(spec.format, spec.byte_size(), rate);
    }
    if instanced {
        push(AttributeFormat::Float2, 16, vk::VertexInputRate::VERTEX);
        push(AttributeFormat::Float2, 16, vk::VertexInputRate::VERTEX);
    }

    (bindings, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use particulate_core::AttributeSpec;

    #[test]
    fn instanced_layout_adds_template_streams() {
        let layout = AttributeLayout::new(
            vec![
                AttributeSpec::new("a_position", AttributeFormat::Float3),
                AttributeSpec::new("a_color", AttributeFormat::UNorm8x4),
            ],
            vec![AttributeSpec::new("a_velocity", AttributeFormat::Float3)],
        )
        .unwrap();

        let (bindings, attributes) = vertex_input_descriptions(&layout, true);
        assert_eq!(bindings.len(), 5);
        assert_eq!(attributes.len(), 5);
        assert_eq!(bindings[0].stride, 16);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(bindings[2].stride, 12);
        assert_eq!(bindings[3].input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(attributes[1].format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn point_layout_is_per_vertex() {
        let layout = AttributeLayout::with_attributes(vec![AttributeSpec::new(
            "a_position",
            AttributeFormat::Float3,
        )])
        .unwrap();
        let (bindings, _) = vertex_input_descriptions(&layout, false);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);
    }
}
