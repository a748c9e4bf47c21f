//! Metal Shading Language emission
//!
//! Emits one self-contained `.metal` translation unit per pipeline,
//! containing every struct the pipeline touches plus its vertex and
//! fragment entry points. Unlike the GLSL path, struct-typed inputs stay
//! structs: stage inputs arrive through `[[stage_in]]` and interface
//! slots become member attributes (`[[attribute(n)]]`, `[[position]]`,
//! `[[user(locN)]]`, `[[color(n)]]`). Uniform buffers are renumbered into
//! Metal's shared buffer table after the vertex buffers.

use std::collections::HashMap;

use crate::ast::*;
use crate::bail_emit;
use crate::emit_common::{format_float, is_passthrough_fn};
use crate::error::Result;
use crate::interface::{flatten, metal_uniform_binding};
use log::debug;

/// How a struct participates in the pipeline's stage interfaces, which
/// decides the member attributes its definition carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructRole {
    Plain,
    VertexInput,
    VertexOutput,
    Varying,
    FragmentOutput,
}

pub fn emit_pipeline(module: &Module, pipeline: &PipelineDeclaration) -> Result<String> {
    debug!("metal: emitting pipeline '{}'", pipeline.name);
    let vert = module.vertex_function(&pipeline.vertex_function).ok_or_else(|| {
        crate::error::CompilerError::SemanticError(format!(
            "pipeline '{}' references unknown vertex function '{}'",
            pipeline.name, pipeline.vertex_function
        ))
    })?;
    let frag = module.fragment_function(&pipeline.fragment_function).ok_or_else(|| {
        crate::error::CompilerError::SemanticError(format!(
            "pipeline '{}' references unknown fragment function '{}'",
            pipeline.name, pipeline.fragment_function
        ))
    })?;

    let mut e = Emitter::new(module, collect_roles(module, vert, frag));
    e.line("#include <metal_stdlib>");
    e.line("using namespace metal;");
    e.blank();
    e.structs()?;
    e.vertex_function(pipeline, vert)?;
    e.blank();
    e.fragment_function(pipeline, frag)?;
    Ok(e.out)
}

/// Varying first so VertexOutput wins when the fragment consumes the
/// vertex return struct directly (its position member then carries
/// `[[position]]` on both sides, which Metal accepts).
fn collect_roles(
    module: &Module,
    vert: &VertexDeclaration,
    frag: &FragmentDeclaration,
) -> HashMap<TypeId, StructRole> {
    let mut roles = HashMap::new();
    for input in &frag.inputs {
        if input.input_type == FragmentInputType::Varying {
            mark_recursive(module, &mut roles, input.ty, StructRole::Varying);
        }
    }
    mark_recursive(module, &mut roles, frag.return_type, StructRole::FragmentOutput);
    mark_recursive(module, &mut roles, vert.return_type, StructRole::VertexOutput);
    for input in &vert.inputs {
        if matches!(
            input.input_type,
            VertexInputType::Vertex | VertexInputType::Instanced
        ) {
            mark_recursive(module, &mut roles, input.ty, StructRole::VertexInput);
        }
    }
    roles
}

fn mark_recursive(
    module: &Module,
    roles: &mut HashMap<TypeId, StructRole>,
    ty: TypeId,
    role: StructRole,
) {
    if !module.is_struct(ty) {
        return;
    }
    roles.insert(ty, role);
    for prop in &module.ty(ty).properties {
        mark_recursive(module, roles, prop.ty, role);
    }
}

struct Emitter<'a> {
    module: &'a Module,
    roles: HashMap<TypeId, StructRole>,
    out: String,
    indent: usize,
}

impl<'a> Emitter<'a> {
    fn new(module: &'a Module, roles: HashMap<TypeId, StructRole>) -> Self {
        Emitter {
            module,
            roles,
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn type_name(&self, id: TypeId) -> String {
        let t = self.module.ty(id);
        if t.builtin {
            t.metal_name().to_string()
        } else {
            format!("_{}", t.name)
        }
    }

    fn member_attribute(&self, role: StructRole, index: i32) -> String {
        if index < 0 {
            return String::new();
        }
        match role {
            StructRole::Plain => String::new(),
            StructRole::VertexInput => format!(" [[attribute({})]]", index),
            StructRole::VertexOutput => {
                if index == 0 {
                    " [[position]]".to_string()
                } else {
                    format!(" [[user(loc{})]]", index - 1)
                }
            }
            StructRole::Varying => format!(" [[user(loc{})]]", index),
            StructRole::FragmentOutput => format!(" [[color({})]]", index),
        }
    }

    fn structs(&mut self) -> Result<()> {
        let ids: Vec<TypeId> = self
            .module
            .struct_types()
            .filter_map(|t| self.module.lookup_type(&t.name))
            .collect();
        for id in ids {
            let role = *self.roles.get(&id).unwrap_or(&StructRole::Plain);
            let name = self.type_name(id);
            let members: Vec<String> = self
                .module
                .ty(id)
                .properties
                .iter()
                .map(|p| {
                    format!(
                        "{} {}{};",
                        self.type_name(p.ty),
                        p.name,
                        self.member_attribute(role, p.index)
                    )
                })
                .collect();
            self.line(&format!("struct {} {{", name));
            self.indent += 1;
            for member in members {
                self.line(&member);
            }
            self.indent -= 1;
            self.line("};");
        }
        self.blank();
        Ok(())
    }

    fn vertex_function(&mut self, pipeline: &PipelineDeclaration, decl: &VertexDeclaration) -> Result<()> {
        let return_type = self.type_name(decl.return_type);
        let mut params = Vec::new();
        let stage_inputs: Vec<&VertexInput> = decl
            .inputs
            .iter()
            .filter(|i| {
                matches!(
                    i.input_type,
                    VertexInputType::Vertex | VertexInputType::Instanced
                )
            })
            .collect();
        // With a single stage input the struct itself is the stage_in
        // type. Several inputs are merged into one synthesized struct,
        // since Metal allows only one [[stage_in]] parameter.
        let merged = stage_inputs.len() > 1;
        if merged {
            self.stage_in_struct(decl, &stage_inputs)?;
            params.push(format!("{}_in _stage_in [[stage_in]]", mangle(&decl.name)));
        } else if let Some(input) = stage_inputs.first() {
            params.push(format!(
                "{} _{} [[stage_in]]",
                self.type_name(input.ty),
                input.name
            ));
        }
        for input in &decl.inputs {
            if input.input_type == VertexInputType::Uniform {
                let binding = metal_uniform_binding(self.module, pipeline, input.index)?;
                params.push(format!(
                    "constant {}& _{} [[buffer({})]]",
                    self.type_name(input.ty),
                    input.name,
                    binding
                ));
            }
        }
        self.line(&format!(
            "vertex {} {}({}) {{",
            return_type,
            decl.name,
            params.join(", ")
        ));
        self.indent += 1;
        if merged {
            for input in &stage_inputs {
                self.rebuild_merged_input(input)?;
            }
        }
        for statement in &decl.body {
            self.statement(statement)?;
        }
        self.indent -= 1;
        self.line("}");
        Ok(())
    }

    fn fragment_function(
        &mut self,
        pipeline: &PipelineDeclaration,
        decl: &FragmentDeclaration,
    ) -> Result<()> {
        let return_type = self.type_name(decl.return_type);
        let mut params = Vec::new();
        let mut has_texture = false;
        for input in &decl.inputs {
            match input.input_type {
                FragmentInputType::Varying => {
                    params.push(format!(
                        "{} _{} [[stage_in]]",
                        self.type_name(input.ty),
                        input.name
                    ));
                }
                FragmentInputType::Uniform => {
                    let binding = metal_uniform_binding(self.module, pipeline, input.index)?;
                    params.push(format!(
                        "constant {}& _{} [[buffer({})]]",
                        self.type_name(input.ty),
                        input.name,
                        binding
                    ));
                }
                FragmentInputType::Texture => {
                    has_texture = true;
                    params.push(format!(
                        "{} _{} [[texture({})]]",
                        self.type_name(input.ty),
                        input.name,
                        input.index
                    ));
                }
            }
        }
        self.line(&format!(
            "fragment {} {}({}) {{",
            return_type,
            decl.name,
            params.join(", ")
        ));
        self.indent += 1;
        if has_texture {
            self.line("constexpr sampler _smp(mag_filter::linear, min_filter::linear);");
        }
        for statement in &decl.body {
            self.statement(statement)?;
        }
        self.indent -= 1;
        self.line("}");
        Ok(())
    }

    /// Merged stage_in struct for a vertex function with more than one
    /// vertex/instanced input. Members are named `a{attr}_{name}` so two
    /// inputs sharing property names cannot collide.
    fn stage_in_struct(&mut self, decl: &VertexDeclaration, inputs: &[&VertexInput]) -> Result<()> {
        let members: Vec<String> = inputs
            .iter()
            .flat_map(|input| {
                flatten(self.module, input.ty).into_iter().map(|flat| {
                    format!(
                        "{} a{}_{} [[attribute({})]];",
                        self.type_name(flat.ty),
                        flat.index,
                        flat.name,
                        flat.index
                    )
                })
            })
            .collect();
        self.line(&format!("struct {}_in {{", mangle(&decl.name)));
        self.indent += 1;
        for member in members {
            self.line(&member);
        }
        self.indent -= 1;
        self.line("};");
        Ok(())
    }

    fn rebuild_merged_input(&mut self, input: &VertexInput) -> Result<()> {
        let ty_name = self.type_name(input.ty);
        self.line(&format!("{} _{};", ty_name, input.name));
        for flat in flatten(self.module, input.ty) {
            self.line(&format!(
                "_{}.{} = _stage_in.a{}_{};",
                input.name, flat.path, flat.index, flat.name
            ));
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::VariableDecl { name, ty } => {
                let ty_name = self.type_name(*ty);
                self.line(&format!("{} _{};", ty_name, name));
            }
            Statement::Assignment { target, value, op } => {
                let target = self.expression(target)?;
                let value = self.expression(value)?;
                let op = match op {
                    AssignOp::Assign => "=",
                    AssignOp::Add => "+=",
                    AssignOp::Sub => "-=",
                    AssignOp::Mul => "*=",
                    AssignOp::Div => "/=",
                };
                self.line(&format!("{} {} {};", target, op, value));
            }
            Statement::Expression(expr) => {
                let expr = self.expression(expr)?;
                self.line(&format!("{};", expr));
            }
            // Position leaves the stage as the [[position]]-tagged member,
            // so a return needs no scattering here.
            Statement::Return(expr) => {
                let value = self.expression(expr)?;
                self.line(&format!("return {};", value));
            }
        }
        Ok(())
    }

    fn expression(&self, expr: &Expression) -> Result<String> {
        match expr {
            Expression::BinOp { op, lhs, rhs } => {
                let op = match op {
                    BinOpKind::Add => "+",
                    BinOpKind::Sub => "-",
                    BinOpKind::Mul => "*",
                    BinOpKind::Div => "/",
                };
                Ok(format!(
                    "{} {} {}",
                    self.expression(lhs)?,
                    op,
                    self.expression(rhs)?
                ))
            }
            Expression::UnOp { op, rhs } => {
                let op = match op {
                    UnOpKind::Pos => "+",
                    UnOpKind::Neg => "-",
                };
                Ok(format!("{}{}", op, self.expression(rhs)?))
            }
            Expression::Parenthesis(inner) => Ok(format!("({})", self.expression(inner)?)),
            Expression::FloatLiteral(v) => Ok(format_float(*v)),
            Expression::IntegerLiteral(v) => Ok(v.to_string()),
            Expression::Identifier(name) => Ok(format!("_{}", name)),
            Expression::PropertyAccess { base, name } => {
                Ok(format!("{}.{}", self.expression(base)?, name))
            }
            Expression::Call { callee, args } => {
                let mut rendered = Vec::new();
                for arg in args {
                    rendered.push(self.expression(arg)?);
                }
                self.call(callee, &rendered)
            }
        }
    }

    fn call(&self, callee: &str, args: &[String]) -> Result<String> {
        if callee == "sample" {
            if args.len() != 2 {
                bail_emit!("sample() takes a texture and a coordinate, got {} arguments", args.len());
            }
            return Ok(format!("{}.sample(_smp, {})", args[0], args[1]));
        }
        if let Some(id) = self.module.lookup_type(callee) {
            let t = self.module.ty(id);
            if t.builtin {
                return Ok(format!("{}({})", t.metal_name(), args.join(", ")));
            }
            // Aggregate initialization for user structs.
            return Ok(format!("{}{{{}}}", self.type_name(id), args.join(", ")));
        }
        if is_passthrough_fn(callee) {
            return Ok(format!("{}({})", callee, args.join(", ")));
        }
        bail_emit!("unknown function '{}'", callee)
    }
}

fn mangle(name: &str) -> String {
    format!("_{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Module {
        let tokens = tokenize(input).expect("Failed to tokenize");
        Parser::new(tokens).parse().expect("Failed to parse")
    }

    const TEXTURED_SOURCE: &str = r#"
        struct Vertex { vec4 position; vec2 uv; }
        struct Globals { mat4 mvp; }
        struct VSOut { vec4 position; vec2 uv; }
        struct FragOut { vec4 color; }
        vertex vs(vertex(0) Vertex v, uniform(0) Globals g) -> VSOut {
            VSOut o;
            o.position = g.mvp * v.position;
            o.uv = v.uv;
            return o;
        }
        fragment fs(VSOut fin, texture(0) texture2d tex) -> FragOut {
            FragOut o;
            o.color = sample(tex, fin.uv);
            return o;
        }
        pipeline textured { vertex = vs; fragment = fs; }
    "#;

    #[test]
    fn test_struct_member_attributes_by_role() {
        let module = parse(TEXTURED_SOURCE);
        let pipeline = module.pipeline("textured").unwrap();
        let metal = emit_pipeline(&module, pipeline).unwrap();
        assert!(metal.contains("float4 position [[attribute(0)]];"));
        assert!(metal.contains("float2 uv [[attribute(1)]];"));
        // VSOut doubles as the fragment stage input; VertexOutput wins.
        assert!(metal.contains("float4 position [[position]];"));
        assert!(metal.contains("float2 uv [[user(loc0)]];"));
        assert!(metal.contains("float4 color [[color(0)]];"));
        // Globals is a plain uniform struct.
        assert!(metal.contains("float4x4 mvp;"));
    }

    #[test]
    fn test_uniforms_renumbered_after_vertex_buffers() {
        let module = parse(TEXTURED_SOURCE);
        let pipeline = module.pipeline("textured").unwrap();
        let metal = emit_pipeline(&module, pipeline).unwrap();
        // One vertex buffer at index 0, so uniform binding 0 lands at 1.
        assert!(metal.contains("constant _Globals& _g [[buffer(1)]]"));
    }

    #[test]
    fn test_entry_points_and_stage_in() {
        let module = parse(TEXTURED_SOURCE);
        let pipeline = module.pipeline("textured").unwrap();
        let metal = emit_pipeline(&module, pipeline).unwrap();
        assert!(metal.starts_with("#include <metal_stdlib>\nusing namespace metal;\n"));
        assert!(metal.contains("vertex _VSOut textured_vert(_Vertex _v [[stage_in]], "));
        assert!(metal.contains("fragment _FragOut textured_frag(_VSOut _fin [[stage_in]], "));
        assert!(metal.contains("texture2d<float> _tex [[texture(0)]]"));
        assert!(metal.contains("constexpr sampler _smp(mag_filter::linear, min_filter::linear);"));
        assert!(metal.contains("_o.color = _tex.sample(_smp, _fin.uv);"));
        assert!(metal.contains("return _o;"));
    }

    #[test]
    fn test_multiple_stage_inputs_are_merged() {
        let source = r#"
            struct Vertex { vec4 position; }
            struct Instance { vec4 offset; }
            struct VSOut { vec4 position; }
            struct FragOut { vec4 color; }
            vertex vs(vertex(0) Vertex v, instanced(1) Instance inst) -> VSOut {
                VSOut o;
                o.position = v.position + inst.offset;
                return o;
            }
            fragment fs() -> FragOut {
                FragOut o;
                o.color = vec4(1.0, 1.0, 1.0, 1.0);
                return o;
            }
            pipeline quads { vertex = vs; fragment = fs; }
        "#;
        let module = parse(source);
        let pipeline = module.pipeline("quads").unwrap();
        let metal = emit_pipeline(&module, pipeline).unwrap();
        assert!(metal.contains("struct _quads_vert_in {"));
        assert!(metal.contains("float4 a0_position [[attribute(0)]];"));
        assert!(metal.contains("float4 a1_offset [[attribute(1)]];"));
        assert!(metal.contains("_quads_vert_in _stage_in [[stage_in]]"));
        assert!(metal.contains("_v.position = _stage_in.a0_position;"));
        assert!(metal.contains("_inst.offset = _stage_in.a1_offset;"));
        assert!(metal.contains("float4(1.0, 1.0, 1.0, 1.0)"));
    }

    #[test]
    fn test_emission_is_idempotent() {
        let module = parse(TEXTURED_SOURCE);
        let pipeline = module.pipeline("textured").unwrap();
        let first = emit_pipeline(&module, pipeline).unwrap();
        let second = emit_pipeline(&module, pipeline).unwrap();
        assert_eq!(first, second);
    }
}
