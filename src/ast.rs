use std::collections::HashMap;

/// Handle into the [`Module`]'s type arena. Declarations reference types
/// through this id rather than owning them; the arena lives as long as the
/// module does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub name: String,
    pub builtin: bool,
    glsl_name: Option<String>,
    metal_name: Option<String>,
    /// Empty for builtin types; declaration order is significant.
    pub properties: Vec<StructProperty>,
}

impl Type {
    pub fn builtin(name: &str, glsl_name: &str, metal_name: &str) -> Self {
        Type {
            name: name.to_string(),
            builtin: true,
            glsl_name: if glsl_name == name { None } else { Some(glsl_name.to_string()) },
            metal_name: if metal_name == name { None } else { Some(metal_name.to_string()) },
            properties: Vec::new(),
        }
    }

    pub fn structure(name: String, properties: Vec<StructProperty>) -> Self {
        Type {
            name,
            builtin: false,
            glsl_name: None,
            metal_name: None,
            properties,
        }
    }

    /// Display name in GLSL output; defaults to `name`.
    pub fn glsl_name(&self) -> &str {
        self.glsl_name.as_deref().unwrap_or(&self.name)
    }

    /// Display name in Metal output; defaults to `name`.
    pub fn metal_name(&self) -> &str {
        self.metal_name.as_deref().unwrap_or(&self.name)
    }
}

/// `index == -1` means the property carries no interface slot (it is data
/// internal to a struct, e.g. a uniform member), and flattening skips it.
#[derive(Debug, Clone, PartialEq)]
pub struct StructProperty {
    pub name: String,
    pub ty: TypeId,
    pub index: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputType {
    Vertex,
    Instanced,
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentInputType {
    Varying,
    Uniform,
    Texture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexInput {
    pub name: String,
    pub ty: TypeId,
    pub input_type: VertexInputType,
    /// Buffer index for Vertex/Instanced inputs, binding id for Uniform.
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentInput {
    pub name: String,
    pub ty: TypeId,
    pub input_type: FragmentInputType,
    /// Binding id for Uniform/Texture inputs; unused for varyings.
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexDeclaration {
    pub name: String,
    pub return_type: TypeId,
    pub inputs: Vec<VertexInput>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDeclaration {
    pub name: String,
    pub return_type: TypeId,
    pub inputs: Vec<FragmentInput>,
    pub body: Vec<Statement>,
}

/// Couples one vertex and one fragment function. Constructing a pipeline
/// renames its functions to `{name}_vert` / `{name}_frag`; that rename
/// happens in the parser, exactly once per function.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDeclaration {
    pub name: String,
    pub vertex_function: String,
    pub fragment_function: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assignment {
        target: Expression,
        value: Expression,
        op: AssignOp,
    },
    Expression(Expression),
    Return(Expression),
    VariableDecl {
        name: String,
        ty: TypeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpKind {
    Pos,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    BinOp {
        op: BinOpKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    UnOp {
        op: UnOpKind,
        rhs: Box<Expression>,
    },
    Call {
        callee: String,
        args: Vec<Expression>,
    },
    FloatLiteral(f64),
    IntegerLiteral(i64),
    Identifier(String),
    Parenthesis(Box<Expression>),
    PropertyAccess {
        base: Box<Expression>,
        name: String,
    },
}

/// The whole compilation unit: a type arena plus the vertex, fragment and
/// pipeline declarations, each keyed by name with last-write-wins
/// semantics. Built by the parser, read-only for every emitter.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub namespace: Option<String>,
    types: Vec<Type>,
    type_index: HashMap<String, TypeId>,
    vertex_functions: Vec<VertexDeclaration>,
    vertex_index: HashMap<String, usize>,
    fragment_functions: Vec<FragmentDeclaration>,
    fragment_index: HashMap<String, usize>,
    pipelines: Vec<PipelineDeclaration>,
    pipeline_index: HashMap<String, usize>,
}

impl Module {
    /// A fresh module with the builtin types registered, before any user
    /// token is consumed.
    pub fn new() -> Self {
        let mut module = Module::default();
        module.register_type(Type::builtin("float", "float", "float"));
        module.register_type(Type::builtin("vec2", "vec2", "float2"));
        module.register_type(Type::builtin("vec3", "vec3", "float3"));
        module.register_type(Type::builtin("vec4", "vec4", "float4"));
        module.register_type(Type::builtin("mat4", "mat4", "float4x4"));
        module.register_type(Type::builtin("texture2d", "sampler2D", "texture2d<float>"));
        module
    }

    /// Registers a type under its name. Re-registering a name replaces the
    /// previous definition in place, so existing handles stay valid.
    pub fn register_type(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.type_index.get(&ty.name) {
            self.types[id.0 as usize] = ty;
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.type_index.insert(ty.name.clone(), id);
        self.types.push(ty);
        id
    }

    pub fn lookup_type(&self, name: &str) -> Option<TypeId> {
        self.type_index.get(name).copied()
    }

    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        !self.ty(id).builtin
    }

    /// Non-builtin struct types in registration order.
    pub fn struct_types(&self) -> impl Iterator<Item = &Type> {
        self.types.iter().filter(|t| !t.builtin)
    }

    pub fn add_vertex_function(&mut self, decl: VertexDeclaration) {
        if let Some(&i) = self.vertex_index.get(&decl.name) {
            self.vertex_functions[i] = decl;
            return;
        }
        self.vertex_index.insert(decl.name.clone(), self.vertex_functions.len());
        self.vertex_functions.push(decl);
    }

    pub fn add_fragment_function(&mut self, decl: FragmentDeclaration) {
        if let Some(&i) = self.fragment_index.get(&decl.name) {
            self.fragment_functions[i] = decl;
            return;
        }
        self.fragment_index.insert(decl.name.clone(), self.fragment_functions.len());
        self.fragment_functions.push(decl);
    }

    pub fn add_pipeline(&mut self, decl: PipelineDeclaration) {
        if let Some(&i) = self.pipeline_index.get(&decl.name) {
            self.pipelines[i] = decl;
            return;
        }
        self.pipeline_index.insert(decl.name.clone(), self.pipelines.len());
        self.pipelines.push(decl);
    }

    pub fn vertex_function(&self, name: &str) -> Option<&VertexDeclaration> {
        self.vertex_index.get(name).map(|&i| &self.vertex_functions[i])
    }

    pub fn fragment_function(&self, name: &str) -> Option<&FragmentDeclaration> {
        self.fragment_index.get(name).map(|&i| &self.fragment_functions[i])
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDeclaration> {
        self.pipeline_index.get(name).map(|&i| &self.pipelines[i])
    }

    pub fn vertex_functions(&self) -> &[VertexDeclaration] {
        &self.vertex_functions
    }

    pub fn fragment_functions(&self) -> &[FragmentDeclaration] {
        &self.fragment_functions
    }

    pub fn pipelines(&self) -> &[PipelineDeclaration] {
        &self.pipelines
    }

    /// Renames a vertex function, moving its name-index entry. The old name
    /// becomes unknown afterwards, which is what makes a second pipeline
    /// claiming the same function fail its lookup.
    pub(crate) fn rename_vertex_function(&mut self, old: &str, new: String) -> bool {
        match self.vertex_index.remove(old) {
            Some(i) => {
                self.vertex_functions[i].name = new.clone();
                self.vertex_index.insert(new, i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn rename_fragment_function(&mut self, old: &str, new: String) -> bool {
        match self.fragment_index.remove(old) {
            Some(i) => {
                self.fragment_functions[i].name = new.clone();
                self.fragment_index.insert(new, i);
                true
            }
            None => false,
        }
    }

    /// Assigns sequential interface-slot indices to a struct's properties,
    /// recursing into struct-typed properties so that only leaves carry
    /// slots. Idempotent: a struct whose properties already carry slots is
    /// skipped, and `next` only advances past them.
    pub(crate) fn assign_slots(&mut self, ty: TypeId, mut next: i32) -> i32 {
        if self.types[ty.0 as usize]
            .properties
            .iter()
            .any(|p| p.index >= 0)
        {
            let max = self.types[ty.0 as usize]
                .properties
                .iter()
                .map(|p| p.index)
                .max()
                .unwrap_or(-1);
            return next.max(max + 1);
        }
        for i in 0..self.types[ty.0 as usize].properties.len() {
            let prop_ty = self.types[ty.0 as usize].properties[i].ty;
            if self.is_struct(prop_ty) {
                next = self.assign_slots(prop_ty, next);
            } else {
                self.types[ty.0 as usize].properties[i].index = next;
                next += 1;
            }
        }
        next
    }
}
