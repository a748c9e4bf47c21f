pub mod archive;
pub mod ast;
pub mod emit_common;
pub mod error;
pub mod glsl;
pub mod header;
pub mod interface;
pub mod lexer;
pub mod metal;
pub mod parser;


use archive::{Archive, ShaderPayload};
use ast::Module;
use error::{CompilerError, Result};
use glsl::GlslOptions;

pub struct Compiler;

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler
    }

    /// Lex and parse source text into an immutable module.
    pub fn parse(&self, source: &str) -> Result<Module> {
        let tokens = lexer::tokenize(source)?;
        parser::Parser::new(tokens).parse()
    }

    /// GLSL vertex/fragment source pair for one pipeline.
    pub fn compile_glsl(
        &self,
        module: &Module,
        pipeline_name: &str,
        options: GlslOptions,
    ) -> Result<(String, String)> {
        let pipeline = lookup_pipeline(module, pipeline_name)?;
        let vert = module.vertex_function(&pipeline.vertex_function).ok_or_else(|| {
            CompilerError::SemanticError(format!(
                "pipeline '{}' references unknown vertex function '{}'",
                pipeline.name, pipeline.vertex_function
            ))
        })?;
        let frag = module.fragment_function(&pipeline.fragment_function).ok_or_else(|| {
            CompilerError::SemanticError(format!(
                "pipeline '{}' references unknown fragment function '{}'",
                pipeline.name, pipeline.fragment_function
            ))
        })?;
        Ok((
            glsl::emit_vertex(module, vert, options)?,
            glsl::emit_fragment(module, frag, options)?,
        ))
    }

    /// Metal translation unit for one pipeline.
    pub fn compile_metal(&self, module: &Module, pipeline_name: &str) -> Result<String> {
        let pipeline = lookup_pipeline(module, pipeline_name)?;
        metal::emit_pipeline(module, pipeline)
    }

    /// Generated Rust descriptor header covering the whole module.
    pub fn compile_header(&self, module: &Module) -> Result<String> {
        header::emit_header(module)
    }

    /// Archive bundling compact GLSL for every pipeline in the module.
    pub fn compile_archive(&self, module: &Module) -> Result<Archive> {
        let mut archive = Archive::new();
        for pipeline in module.pipelines() {
            let (vertex, fragment) =
                self.compile_glsl(module, &pipeline.name, GlslOptions { pretty: false })?;
            archive.insert(&pipeline.name, ShaderPayload::Glsl { vertex, fragment });
        }
        Ok(archive)
    }
}

fn lookup_pipeline<'a>(module: &'a Module, name: &str) -> Result<&'a ast::PipelineDeclaration> {
    module.pipeline(name).ok_or_else(|| {
        CompilerError::SemanticError(format!("unknown pipeline '{}'", name))
    })
}
