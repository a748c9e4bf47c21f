//! Pipeline-descriptor header emission
//!
//! Emits a generated Rust source file a statically-linked renderer
//! compiles in via `include!`. It reproduces every user struct as a
//! `#[repr(C)]` aggregate (so stride and field offsets match the GPU
//! buffer layout the attribute descriptors describe) and one
//! `PipelineDesc` constant per pipeline. Raster, depth and blend state
//! are fixed defaults for now rather than derived from the source
//! language.

use std::fmt::Write;

use crate::ast::*;
use crate::bail_emit;
use crate::error::Result;
use crate::interface::{texture_bindings, uniform_bindings, vertex_attributes, vertex_buffers};
use log::debug;

/// Descriptor type definitions shared by every generated header. The
/// renderer consumes these generated definitions directly, so the
/// header is self-contained.
const PREAMBLE: &str = r#"#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthTest {
    Always,
    Less,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttributeDesc {
    pub attribute: u32,
    pub offset: usize,
    pub buffer: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferDesc {
    pub buffer: u32,
    pub stride: usize,
    pub instanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineDesc {
    pub cull_mode: CullMode,
    pub winding: Winding,
    pub depth_test: DepthTest,
    pub depth_write: bool,
    pub blend_src: BlendFactor,
    pub blend_dst: BlendFactor,
    pub uniform_bindings: &'static [u32],
    pub texture_bindings: &'static [u32],
    pub vertex_attributes: &'static [VertexAttributeDesc],
    pub vertex_buffers: &'static [VertexBufferDesc],
}
"#;

pub fn emit_header(module: &Module) -> Result<String> {
    debug!(
        "header: emitting descriptors for {} pipeline(s)",
        module.pipelines().len()
    );
    let mut out = String::new();
    out.push_str("// Generated pipeline descriptors. Do not edit.\n\n");
    if let Some(namespace) = &module.namespace {
        let _ = writeln!(out, "pub mod {} {{", namespace.replace("::", "_"));
    }
    out.push_str(PREAMBLE);
    out.push('\n');
    for ty in module.struct_types() {
        emit_struct(module, ty, &mut out)?;
        out.push('\n');
    }
    for pipeline in module.pipelines() {
        emit_pipeline_desc(module, pipeline, &mut out)?;
        out.push('\n');
    }
    if module.namespace.is_some() {
        out.push_str("}\n");
    }
    Ok(out)
}

fn emit_struct(module: &Module, ty: &Type, out: &mut String) -> Result<()> {
    out.push_str("#[repr(C)]\n#[derive(Debug, Clone, Copy, PartialEq)]\n");
    let _ = writeln!(out, "pub struct {} {{", ty.name);
    for prop in &ty.properties {
        let _ = writeln!(out, "    pub {}: {},", prop.name, host_type(module, prop.ty)?);
    }
    out.push_str("}\n");
    Ok(())
}

fn host_type(module: &Module, id: TypeId) -> Result<String> {
    let ty = module.ty(id);
    if !ty.builtin {
        return Ok(ty.name.clone());
    }
    Ok(match ty.name.as_str() {
        "float" => "f32".to_string(),
        "vec2" => "[f32; 2]".to_string(),
        "vec3" => "[f32; 3]".to_string(),
        "vec4" => "[f32; 4]".to_string(),
        "mat4" => "[[f32; 4]; 4]".to_string(),
        other => bail_emit!("type '{}' has no host-side representation", other),
    })
}

fn emit_pipeline_desc(module: &Module, pipeline: &PipelineDeclaration, out: &mut String) -> Result<()> {
    let uniforms = uniform_bindings(module, pipeline)?;
    let textures = texture_bindings(module, pipeline)?;
    let attributes = vertex_attributes(module, pipeline)?;
    let buffers = vertex_buffers(module, pipeline)?;

    let _ = writeln!(
        out,
        "pub const {}: PipelineDesc = PipelineDesc {{",
        pipeline.name.to_uppercase()
    );
    out.push_str("    cull_mode: CullMode::Back,\n");
    out.push_str("    winding: Winding::CounterClockwise,\n");
    out.push_str("    depth_test: DepthTest::Always,\n");
    out.push_str("    depth_write: false,\n");
    out.push_str("    blend_src: BlendFactor::SrcAlpha,\n");
    out.push_str("    blend_dst: BlendFactor::OneMinusSrcAlpha,\n");
    let _ = writeln!(out, "    uniform_bindings: &{:?},", uniforms);
    let _ = writeln!(out, "    texture_bindings: &{:?},", textures);
    out.push_str("    vertex_attributes: &[\n");
    for attr in &attributes {
        let _ = writeln!(
            out,
            "        VertexAttributeDesc {{ attribute: {}, offset: core::mem::offset_of!({}, {}), buffer: {} }},",
            attr.attribute, attr.type_name, attr.property, attr.buffer
        );
    }
    out.push_str("    ],\n");
    out.push_str("    vertex_buffers: &[\n");
    for buffer in &buffers {
        let _ = writeln!(
            out,
            "        VertexBufferDesc {{ buffer: {}, stride: core::mem::size_of::<{}>(), instanced: {} }},",
            buffer.buffer, buffer.type_name, buffer.instanced
        );
    }
    out.push_str("    ],\n");
    out.push_str("};\n");
    Ok(())
}
