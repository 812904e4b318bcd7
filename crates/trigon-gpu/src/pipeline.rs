//! Render pass and graphics pipeline for the triangle.
//!
//! Viewport and scissor are dynamic state, so an extent change only needs new
//! framebuffers. A color format change needs a new pipeline.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::{GpuError, Result};

/// Render pass, layout and pipeline drawing the triangle into one color attachment.
#[derive(Debug)]
pub struct TrianglePipeline {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub color_format: vk::Format,
}

/// Objects created so far, released in reverse if a later step fails.
#[derive(Default)]
struct Partial {
    render_pass: Option<vk::RenderPass>,
    vertex: Option<vk::ShaderModule>,
    fragment: Option<vk::ShaderModule>,
    layout: Option<vk::PipelineLayout>,
}

impl Partial {
    unsafe fn release_modules<B: GpuBackend>(&mut self, backend: &B) {
        unsafe {
            if let Some(module) = self.fragment.take() {
                backend.destroy_shader_module(module);
            }
            if let Some(module) = self.vertex.take() {
                backend.destroy_shader_module(module);
            }
        }
    }

    unsafe fn release<B: GpuBackend>(mut self, backend: &B) {
        unsafe {
            if let Some(layout) = self.layout.take() {
                backend.destroy_pipeline_layout(layout);
            }
            self.release_modules(backend);
            if let Some(render_pass) = self.render_pass.take() {
                backend.destroy_render_pass(render_pass);
            }
        }
    }
}

impl TrianglePipeline {
    /// Build the render pass and pipeline for `color_format`.
    ///
    /// `viewport_extent` seeds the viewport state; the values actually used are set per
    /// frame. Shader modules are destroyed once the pipeline exists.
    ///
    /// # Safety
    /// The backend must be valid and the code must be valid SPIR-V words.
    pub unsafe fn build<B: GpuBackend>(
        backend: &B,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        color_format: vk::Format,
        viewport_extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut partial = Partial::default();
        match unsafe {
            Self::build_inner(
                backend,
                &mut partial,
                vertex_spirv,
                fragment_spirv,
                color_format,
                viewport_extent,
            )
        } {
            Ok(pipeline) => Ok(pipeline),
            Err(e) => {
                unsafe { partial.release(backend) };
                Err(e)
            }
        }
    }

    unsafe fn build_inner<B: GpuBackend>(
        backend: &B,
        partial: &mut Partial,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        color_format: vk::Format,
        viewport_extent: vk::Extent2D,
    ) -> Result<Self> {
        let render_pass = unsafe { create_render_pass(backend, color_format) }?;
        partial.render_pass = Some(render_pass);

        let vert_module = unsafe { backend.create_shader_module(vertex_spirv) }
            .map_err(|e| GpuError::ShaderCompile(format!("Vertex: {e}")))?;
        partial.vertex = Some(vert_module);

        let frag_module = unsafe { backend.create_shader_module(fragment_spirv) }
            .map_err(|e| GpuError::ShaderCompile(format!("Fragment: {e}")))?;
        partial.fragment = Some(frag_module);

        // No descriptors or push constants
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { backend.create_pipeline_layout(&layout_info) }
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;
        partial.layout = Some(layout);

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        // Vertices come from the shader
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [viewport(viewport_extent)];
        let scissors = [scissor(viewport_extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = unsafe { backend.create_graphics_pipeline(&pipeline_info) }
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

        // Clean up shader modules
        unsafe { partial.release_modules(backend) };

        tracing::debug!(format = ?color_format, "Triangle pipeline built");

        Ok(Self {
            render_pass,
            layout,
            pipeline,
            color_format,
        })
    }

    /// Destroy the pipeline, its layout and its render pass.
    ///
    /// # Safety
    /// No framebuffer built on the render pass may remain and the pipeline must not be in use.
    pub unsafe fn destroy<B: GpuBackend>(&self, backend: &B) {
        unsafe {
            backend.destroy_pipeline(self.pipeline);
            backend.destroy_pipeline_layout(self.layout);
            backend.destroy_render_pass(self.render_pass);
        }
    }
}

/// Single color attachment, cleared on load and left ready for presentation.
unsafe fn create_render_pass<B: GpuBackend>(
    backend: &B,
    color_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    let color_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];

    // The layout transition waits for the acquire semaphore's stage
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { backend.create_render_pass(&create_info) }
        .map_err(|e| GpuError::PipelineCreation(format!("Render pass: {e}")))
}

/// Full-target viewport for `extent`.
pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Full-target scissor for `extent`.
pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}
