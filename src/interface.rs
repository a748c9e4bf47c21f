//! Interface analysis
//!
//! Pure, repeatable functions over declarations: struct flattening into
//! interface slots, binding-id deduplication across the coupled shader
//! stages, and the vertex attribute/buffer descriptor lists a pipeline
//! exposes to the binding layers. Every emitter builds on these; none of
//! them mutates the module.

use crate::ast::*;
use crate::bail_semantic;
use crate::error::{CompilerError, Result};

/// One slot-bearing leaf of a flattened struct. `name` joins nested
/// property names with `_` (interface-variable spelling), `path` with `.`
/// (field-access spelling).
#[derive(Debug, Clone, PartialEq)]
pub struct FlatProperty {
    pub name: String,
    pub path: String,
    pub ty: TypeId,
    pub index: i32,
}

/// Flattens a struct into its interface slots: a recursive walk in
/// declaration order, keeping only properties with an assigned slot.
pub fn flatten(module: &Module, ty: TypeId) -> Vec<FlatProperty> {
    let mut out = Vec::new();
    walk(module, ty, "", "", &mut out);
    out.retain(|p| p.index >= 0);
    out
}

fn walk(module: &Module, ty: TypeId, name_prefix: &str, path_prefix: &str, out: &mut Vec<FlatProperty>) {
    for prop in &module.ty(ty).properties {
        let name = if name_prefix.is_empty() {
            prop.name.clone()
        } else {
            format!("{}_{}", name_prefix, prop.name)
        };
        let path = if path_prefix.is_empty() {
            prop.name.clone()
        } else {
            format!("{}.{}", path_prefix, prop.name)
        };
        if module.is_struct(prop.ty) {
            walk(module, prop.ty, &name, &path, out);
        } else {
            out.push(FlatProperty {
                name,
                path,
                ty: prop.ty,
                index: prop.index,
            });
        }
    }
}

fn resolve_vertex<'a>(module: &'a Module, pipeline: &PipelineDeclaration) -> Result<&'a VertexDeclaration> {
    module.vertex_function(&pipeline.vertex_function).ok_or_else(|| {
        CompilerError::SemanticError(format!(
            "pipeline '{}' references unknown vertex function '{}'",
            pipeline.name, pipeline.vertex_function
        ))
    })
}

fn resolve_fragment<'a>(
    module: &'a Module,
    pipeline: &PipelineDeclaration,
) -> Result<&'a FragmentDeclaration> {
    module.fragment_function(&pipeline.fragment_function).ok_or_else(|| {
        CompilerError::SemanticError(format!(
            "pipeline '{}' references unknown fragment function '{}'",
            pipeline.name, pipeline.fragment_function
        ))
    })
}

/// Deduplicated union of the uniform binding ids used by both stages,
/// sorted ascending so emitted output order is deterministic.
pub fn uniform_bindings(module: &Module, pipeline: &PipelineDeclaration) -> Result<Vec<i32>> {
    let vert = resolve_vertex(module, pipeline)?;
    let frag = resolve_fragment(module, pipeline)?;
    let mut ids: Vec<i32> = vert
        .inputs
        .iter()
        .filter(|i| i.input_type == VertexInputType::Uniform)
        .map(|i| i.index)
        .chain(
            frag.inputs
                .iter()
                .filter(|i| i.input_type == FragmentInputType::Uniform)
                .map(|i| i.index),
        )
        .collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Deduplicated, ascending texture binding ids of the fragment stage.
pub fn texture_bindings(module: &Module, pipeline: &PipelineDeclaration) -> Result<Vec<i32>> {
    let frag = resolve_fragment(module, pipeline)?;
    let mut ids: Vec<i32> = frag
        .inputs
        .iter()
        .filter(|i| i.input_type == FragmentInputType::Texture)
        .map(|i| i.index)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub type_name: String,
    /// Field path inside the source struct, `.`-joined for nesting.
    pub property: String,
    pub attribute: i32,
    pub buffer: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBuffer {
    pub type_name: String,
    pub buffer: i32,
    pub instanced: bool,
}

/// One descriptor per slot-bearing property of every vertex/instanced
/// input, deduplicated and sorted by attribute index.
pub fn vertex_attributes(module: &Module, pipeline: &PipelineDeclaration) -> Result<Vec<VertexAttribute>> {
    let vert = resolve_vertex(module, pipeline)?;
    let mut out = Vec::new();
    for input in &vert.inputs {
        if !matches!(
            input.input_type,
            VertexInputType::Vertex | VertexInputType::Instanced
        ) {
            continue;
        }
        for flat in flatten(module, input.ty) {
            let desc = VertexAttribute {
                type_name: module.ty(input.ty).name.clone(),
                property: flat.path,
                attribute: flat.index,
                buffer: input.index,
            };
            if !out.contains(&desc) {
                out.push(desc);
            }
        }
    }
    out.sort_by_key(|a| (a.attribute, a.buffer));
    Ok(out)
}

/// One descriptor per distinct (type, buffer index) pair among the
/// vertex/instanced inputs, sorted by buffer index.
pub fn vertex_buffers(module: &Module, pipeline: &PipelineDeclaration) -> Result<Vec<VertexBuffer>> {
    let vert = resolve_vertex(module, pipeline)?;
    let mut out: Vec<VertexBuffer> = Vec::new();
    for input in &vert.inputs {
        let instanced = match input.input_type {
            VertexInputType::Vertex => false,
            VertexInputType::Instanced => true,
            VertexInputType::Uniform => continue,
        };
        let desc = VertexBuffer {
            type_name: module.ty(input.ty).name.clone(),
            buffer: input.index,
            instanced,
        };
        if !out.contains(&desc) {
            out.push(desc);
        }
    }
    out.sort_by_key(|b| b.buffer);
    Ok(out)
}

/// Metal indexes uniform buffers after the vertex buffers in the same
/// argument table: the physical index is one past the highest vertex
/// buffer index, plus the uniform's ordinal among the vertex function's
/// uniform inputs in declaration order. A binding only the fragment stage
/// declares follows after all vertex uniforms, in fragment declaration
/// order.
pub fn metal_uniform_binding(
    module: &Module,
    pipeline: &PipelineDeclaration,
    logical: i32,
) -> Result<i32> {
    let vert = resolve_vertex(module, pipeline)?;
    let base = vert
        .inputs
        .iter()
        .filter(|i| {
            matches!(
                i.input_type,
                VertexInputType::Vertex | VertexInputType::Instanced
            )
        })
        .map(|i| i.index)
        .max()
        .unwrap_or(-1)
        + 1;

    let vert_uniforms: Vec<i32> = vert
        .inputs
        .iter()
        .filter(|i| i.input_type == VertexInputType::Uniform)
        .map(|i| i.index)
        .collect();
    if let Some(ordinal) = vert_uniforms.iter().position(|&id| id == logical) {
        return Ok(base + ordinal as i32);
    }

    let frag = resolve_fragment(module, pipeline)?;
    let mut ordinal = vert_uniforms.len() as i32;
    let mut seen: Vec<i32> = Vec::new();
    for input in &frag.inputs {
        if input.input_type != FragmentInputType::Uniform {
            continue;
        }
        if vert_uniforms.contains(&input.index) || seen.contains(&input.index) {
            continue;
        }
        if input.index == logical {
            return Ok(base + ordinal);
        }
        seen.push(input.index);
        ordinal += 1;
    }
    bail_semantic!(
        "uniform binding {} is not declared by pipeline '{}'",
        logical,
        pipeline.name
    )
}
