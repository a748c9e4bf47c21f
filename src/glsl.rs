//! GLSL emission
//!
//! Turns a parsed module plus one vertex or fragment declaration into
//! GLSL source text. Struct-typed inputs are decomposed into individually
//! named interface variables (`i{N}_…`, `v{N}_…`, `o{N}_…`) and rebuilt
//! as locals inside `main()`; local and struct identifiers are mangled
//! with a leading underscore so they cannot collide with GLSL reserved
//! words. The compact and pretty variants differ only in whitespace.

use std::fmt::Write;

use crate::ast::*;
use crate::bail_emit;
use crate::emit_common::{format_float, is_passthrough_fn};
use crate::error::Result;
use crate::interface::flatten;
use log::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct GlslOptions {
    pub pretty: bool,
}

pub fn emit_vertex(module: &Module, decl: &VertexDeclaration, options: GlslOptions) -> Result<String> {
    debug!("glsl: emitting vertex function '{}'", decl.name);
    let mut e = Emitter::new(module, options);
    e.prelude();
    for input in &decl.inputs {
        if input.input_type == VertexInputType::Uniform {
            e.uniform_block(input)?;
        }
    }
    for input in &decl.inputs {
        if matches!(
            input.input_type,
            VertexInputType::Vertex | VertexInputType::Instanced
        ) {
            for flat in flatten(module, input.ty) {
                let ty = e.type_name(flat.ty);
                e.line(&format!(
                    "layout(location = {}) in {} i{}_{};",
                    flat.index, ty, flat.index, flat.name
                ));
            }
        }
    }
    // Slot 0 of the return struct is clip-space position and leaves the
    // stage through gl_Position; only the remaining slots become varyings.
    for flat in flatten(module, decl.return_type) {
        if flat.index > 0 {
            let ty = e.type_name(flat.ty);
            e.line(&format!(
                "layout(location = {}) out {} v{}_{};",
                flat.index - 1,
                ty,
                flat.index - 1,
                flat.name
            ));
        }
    }
    e.blank();
    e.line("void main() {");
    e.indent += 1;
    for input in &decl.inputs {
        if matches!(
            input.input_type,
            VertexInputType::Vertex | VertexInputType::Instanced
        ) {
            e.reconstruct_input(input.ty, &input.name)?;
        }
    }
    for statement in &decl.body {
        e.statement(statement, Stage::Vertex, decl.return_type)?;
    }
    e.indent -= 1;
    e.line("}");
    Ok(e.out)
}

pub fn emit_fragment(
    module: &Module,
    decl: &FragmentDeclaration,
    options: GlslOptions,
) -> Result<String> {
    debug!("glsl: emitting fragment function '{}'", decl.name);
    let mut e = Emitter::new(module, options);
    e.prelude();
    for input in &decl.inputs {
        match input.input_type {
            FragmentInputType::Uniform => e.fragment_uniform_block(input)?,
            FragmentInputType::Texture => {
                let ty = e.type_name(input.ty);
                e.line(&format!(
                    "layout(binding = {}) uniform {} _{};",
                    input.index, ty, input.name
                ));
            }
            FragmentInputType::Varying => {
                // A varying struct that doubles as a vertex return struct
                // carries the clip-space position in slot 0; the vertex
                // side routed it through gl_Position, so mirror that here:
                // skip slot 0 and shift locations down by one.
                let position_bearing = carries_position(module, input.ty);
                for flat in flatten(module, input.ty) {
                    if position_bearing && flat.index == 0 {
                        continue;
                    }
                    let location = if position_bearing {
                        flat.index - 1
                    } else {
                        flat.index
                    };
                    let ty = e.type_name(flat.ty);
                    e.line(&format!(
                        "layout(location = {}) in {} v{}_{};",
                        location, ty, location, flat.name
                    ));
                }
            }
        }
    }
    for flat in flatten(module, decl.return_type) {
        let ty = e.type_name(flat.ty);
        e.line(&format!(
            "layout(location = {}) out {} o{}_{};",
            flat.index, ty, flat.index, flat.name
        ));
    }
    e.blank();
    e.line("void main() {");
    e.indent += 1;
    for input in &decl.inputs {
        if input.input_type == FragmentInputType::Varying {
            e.reconstruct_varying(input.ty, &input.name)?;
        }
    }
    for statement in &decl.body {
        e.statement(statement, Stage::Fragment, decl.return_type)?;
    }
    e.indent -= 1;
    e.line("}");
    Ok(e.out)
}

/// Whether a struct's slot 0 is a clip-space position, which is the case
/// exactly when some vertex function returns it. Slots on such a struct
/// were assigned at the vertex declaration, so a fragment consuming it
/// must shift its varying locations the same way the vertex stage did.
fn carries_position(module: &Module, ty: TypeId) -> bool {
    module.vertex_functions().iter().any(|f| f.return_type == ty)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Vertex,
    Fragment,
}

struct Emitter<'a> {
    module: &'a Module,
    out: String,
    pretty: bool,
    indent: usize,
    /// Counter for the synthetic locals a `return` lowers through.
    returns: usize,
}

impl<'a> Emitter<'a> {
    fn new(module: &'a Module, options: GlslOptions) -> Self {
        Emitter {
            module,
            out: String::new(),
            pretty: options.pretty,
            indent: 0,
            returns: 0,
        }
    }

    fn line(&mut self, text: &str) {
        if self.pretty {
            for _ in 0..self.indent {
                self.out.push_str("    ");
            }
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        if self.pretty {
            self.out.push('\n');
        }
    }

    /// Version header followed by every non-builtin struct definition, in
    /// module registration order.
    fn prelude(&mut self) {
        self.line("#version 450");
        self.blank();
        let structs: Vec<(String, Vec<(String, String)>)> = self
            .module
            .struct_types()
            .map(|t| {
                let members = t
                    .properties
                    .iter()
                    .map(|p| (self.type_name(p.ty), p.name.clone()))
                    .collect();
                (format!("_{}", t.name), members)
            })
            .collect();
        for (name, members) in structs {
            self.line(&format!("struct {} {{", name));
            self.indent += 1;
            for (ty, member) in members {
                self.line(&format!("{} {};", ty, member));
            }
            self.indent -= 1;
            self.line("};");
        }
        self.blank();
    }

    fn type_name(&self, id: TypeId) -> String {
        let t = self.module.ty(id);
        if t.builtin {
            t.glsl_name().to_string()
        } else {
            format!("_{}", t.name)
        }
    }

    /// `layout(binding = N) uniform _name_block { members } _name;` — the
    /// block lists every property of the uniform struct, slotted or not.
    fn uniform_block_common(&mut self, binding: i32, ty: TypeId, name: &str) {
        self.line(&format!(
            "layout(binding = {}) uniform _{}_block {{",
            binding, name
        ));
        self.indent += 1;
        let members: Vec<(String, String)> = self
            .module
            .ty(ty)
            .properties
            .iter()
            .map(|p| (self.type_name(p.ty), p.name.clone()))
            .collect();
        for (member_ty, member) in members {
            self.line(&format!("{} {};", member_ty, member));
        }
        self.indent -= 1;
        self.line(&format!("}} _{};", name));
    }

    fn uniform_block(&mut self, input: &VertexInput) -> Result<()> {
        self.uniform_block_common(input.index, input.ty, &input.name);
        Ok(())
    }

    fn fragment_uniform_block(&mut self, input: &FragmentInput) -> Result<()> {
        self.uniform_block_common(input.index, input.ty, &input.name);
        Ok(())
    }

    /// Declares the struct-typed input as a local and fills it back in
    /// from its flattened interface variables.
    fn reconstruct_input(&mut self, ty: TypeId, name: &str) -> Result<()> {
        let ty_name = self.type_name(ty);
        self.line(&format!("{} _{};", ty_name, name));
        for flat in flatten(self.module, ty) {
            self.line(&format!(
                "_{}.{} = i{}_{};",
                name, flat.path, flat.index, flat.name
            ));
        }
        Ok(())
    }

    /// Like [`reconstruct_input`](Self::reconstruct_input), but for the
    /// fragment stage's varying struct. When the struct carries the
    /// clip-space position in slot 0 there is no varying for it; the
    /// field is filled from gl_FragCoord and the rest read the shifted
    /// locations the vertex stage wrote.
    fn reconstruct_varying(&mut self, ty: TypeId, name: &str) -> Result<()> {
        let position_bearing = carries_position(self.module, ty);
        let ty_name = self.type_name(ty);
        self.line(&format!("{} _{};", ty_name, name));
        for flat in flatten(self.module, ty) {
            if position_bearing && flat.index == 0 {
                self.line(&format!("_{}.{} = gl_FragCoord;", name, flat.path));
                continue;
            }
            let location = if position_bearing {
                flat.index - 1
            } else {
                flat.index
            };
            self.line(&format!(
                "_{}.{} = v{}_{};",
                name, flat.path, location, flat.name
            ));
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement, stage: Stage, return_type: TypeId) -> Result<()> {
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
            Statement::Return(expr) => self.lower_return(expr, stage, return_type)?,
        }
        Ok(())
    }

    /// A `return` stores the value into a synthetic local, then scatters it
    /// into the stage's outputs. In a vertex function the slot-0 property
    /// additionally drives gl_Position.
    fn lower_return(&mut self, expr: &Expression, stage: Stage, return_type: TypeId) -> Result<()> {
        let value = self.expression(expr)?;
        let local = format!("_ret{}", self.returns);
        self.returns += 1;
        let ty_name = self.type_name(return_type);
        self.line(&format!("{} {} = {};", ty_name, local, value));
        let flat = flatten(self.module, return_type);
        match stage {
            Stage::Vertex => {
                let position = flat.iter().find(|p| p.index == 0).ok_or_else(|| {
                    crate::error::CompilerError::EmitError(format!(
                        "vertex return struct '{}' has no slot-0 position property",
                        self.module.ty(return_type).name
                    ))
                })?;
                self.line(&format!("gl_Position = {}.{};", local, position.path));
                for p in &flat {
                    if p.index > 0 {
                        self.line(&format!("v{}_{} = {}.{};", p.index - 1, p.name, local, p.path));
                    }
                }
            }
            Stage::Fragment => {
                for p in &flat {
                    self.line(&format!("o{}_{} = {}.{};", p.index, p.name, local, p.path));
                }
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
            return Ok(format!("texture({}, {})", args[0], args[1]));
        }
        if let Some(id) = self.module.lookup_type(callee) {
            // Constructor call; user struct constructors use the mangled name.
            let mut s = self.type_name(id);
            let _ = write!(s, "({})", args.join(", "));
            return Ok(s);
        }
        if is_passthrough_fn(callee) {
            return Ok(format!("{}({})", callee, args.join(", ")));
        }
        bail_emit!("unknown function '{}'", callee)
    }
}
