use crate::ast::*;
use crate::error::{CompilerError, Result};
use crate::lexer::Token;
use crate::{bail_parse, bail_semantic};
use log::trace;

/// Recursive-descent parser over the token vector. Owns the module under
/// construction; `parse` consumes the parser and hands the finished,
/// thereafter-immutable module back.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    module: Module,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            current: 0,
            // Builtin types are registered before any user token is read.
            module: Module::new(),
        }
    }

    pub fn parse(mut self) -> Result<Module> {
        if self.check(&Token::Namespace) {
            self.parse_namespace()?;
        }
        while !self.is_at_end() {
            trace!("parse: next top-level token = {:?}", self.peek());
            match self.peek() {
                Some(Token::Struct) => self.parse_struct()?,
                Some(Token::Vertex) => self.parse_vertex()?,
                Some(Token::Fragment) => self.parse_fragment()?,
                Some(Token::Pipeline) => self.parse_pipeline()?,
                other => {
                    bail_parse!(
                        "expected 'struct', 'vertex', 'fragment' or 'pipeline', got {:?}",
                        other
                    )
                }
            }
        }
        Ok(self.module)
    }

    fn parse_namespace(&mut self) -> Result<()> {
        self.expect(Token::Namespace)?;
        let mut path = self.expect_identifier()?;
        while self.check(&Token::ColonColon) {
            self.advance();
            path.push_str("::");
            path.push_str(&self.expect_identifier()?);
        }
        self.expect(Token::Semicolon)?;
        self.module.namespace = Some(path);
        Ok(())
    }

    fn parse_struct(&mut self) -> Result<()> {
        self.expect(Token::Struct)?;
        let name = self.expect_identifier()?;
        trace!("parse_struct: {}", name);
        self.expect(Token::LeftBrace)?;
        let mut properties = Vec::new();
        while !self.check(&Token::RightBrace) {
            if self.is_at_end() {
                bail_parse!("unterminated struct '{}'", name);
            }
            let ty = self.expect_type()?;
            let prop_name = self.expect_identifier()?;
            self.expect(Token::Semicolon)?;
            properties.push(StructProperty {
                name: prop_name,
                ty,
                index: -1,
            });
        }
        self.expect(Token::RightBrace)?;
        self.module.register_type(Type::structure(name, properties));
        Ok(())
    }

    fn parse_vertex(&mut self) -> Result<()> {
        self.expect(Token::Vertex)?;
        let name = self.expect_identifier()?;
        trace!("parse_vertex: {}", name);
        self.expect(Token::LeftParen)?;
        let mut inputs = Vec::new();
        if !self.check(&Token::RightParen) {
            loop {
                inputs.push(self.parse_vertex_param()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RightParen)?;
        self.expect(Token::Arrow)?;
        let return_type = self.expect_struct_type("vertex return type")?;
        self.expect(Token::LeftBrace)?;
        let body = self.parse_block(&name)?;

        // Bind interface slots: a running attribute counter across the
        // vertex/instanced inputs, then slots 0..n on the return struct
        // (slot 0 is clip-space position by convention).
        let mut attribute = 0;
        for input in &inputs {
            match input.input_type {
                VertexInputType::Vertex | VertexInputType::Instanced => {
                    if !self.module.is_struct(input.ty) {
                        bail_semantic!(
                            "vertex input '{}' of '{}' must have a struct type",
                            input.name,
                            name
                        );
                    }
                    attribute = self.module.assign_slots(input.ty, attribute);
                }
                VertexInputType::Uniform => {
                    if !self.module.is_struct(input.ty) {
                        bail_semantic!(
                            "uniform input '{}' of '{}' must have a struct type",
                            input.name,
                            name
                        );
                    }
                }
            }
        }
        self.module.assign_slots(return_type, 0);

        self.module.add_vertex_function(VertexDeclaration {
            name,
            return_type,
            inputs,
            body,
        });
        Ok(())
    }

    fn parse_vertex_param(&mut self) -> Result<VertexInput> {
        let input_type = match self.advance() {
            Some(Token::Vertex) => VertexInputType::Vertex,
            Some(Token::Instanced) => VertexInputType::Instanced,
            Some(Token::Uniform) => VertexInputType::Uniform,
            other => {
                bail_parse!(
                    "expected 'vertex', 'instanced' or 'uniform' parameter tag, got {:?}",
                    other
                )
            }
        };
        self.expect(Token::LeftParen)?;
        let index = self.expect_index()?;
        self.expect(Token::RightParen)?;
        let ty = self.expect_type()?;
        let name = self.expect_identifier()?;
        Ok(VertexInput {
            name,
            ty,
            input_type,
            index,
        })
    }

    fn parse_fragment(&mut self) -> Result<()> {
        self.expect(Token::Fragment)?;
        let name = self.expect_identifier()?;
        trace!("parse_fragment: {}", name);
        self.expect(Token::LeftParen)?;
        let mut inputs = Vec::new();
        if !self.check(&Token::RightParen) {
            loop {
                inputs.push(self.parse_fragment_param()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RightParen)?;
        self.expect(Token::Arrow)?;
        let return_type = self.expect_struct_type("fragment return type")?;
        self.expect(Token::LeftBrace)?;
        let body = self.parse_block(&name)?;

        for input in &inputs {
            match input.input_type {
                FragmentInputType::Varying => {
                    if !self.module.is_struct(input.ty) {
                        bail_semantic!(
                            "varying input '{}' of '{}' must have a struct type",
                            input.name,
                            name
                        );
                    }
                    self.module.assign_slots(input.ty, 0);
                }
                FragmentInputType::Uniform => {
                    if !self.module.is_struct(input.ty) {
                        bail_semantic!(
                            "uniform input '{}' of '{}' must have a struct type",
                            input.name,
                            name
                        );
                    }
                }
                FragmentInputType::Texture => {
                    if self.module.ty(input.ty).name != "texture2d" {
                        bail_semantic!(
                            "texture input '{}' of '{}' must have type texture2d, got {}",
                            input.name,
                            name,
                            self.module.ty(input.ty).name
                        );
                    }
                }
            }
        }
        self.module.assign_slots(return_type, 0);

        self.module.add_fragment_function(FragmentDeclaration {
            name,
            return_type,
            inputs,
            body,
        });
        Ok(())
    }

    fn parse_fragment_param(&mut self) -> Result<FragmentInput> {
        let input_type = match self.peek() {
            Some(Token::Uniform) => Some(FragmentInputType::Uniform),
            Some(Token::Texture) => Some(FragmentInputType::Texture),
            _ => None,
        };
        match input_type {
            Some(input_type) => {
                self.advance();
                self.expect(Token::LeftParen)?;
                let index = self.expect_index()?;
                self.expect(Token::RightParen)?;
                let ty = self.expect_type()?;
                let name = self.expect_identifier()?;
                Ok(FragmentInput {
                    name,
                    ty,
                    input_type,
                    index,
                })
            }
            None => {
                // Untagged struct-typed parameter: the varying block coming
                // from the vertex stage.
                let ty = self.expect_type()?;
                let name = self.expect_identifier()?;
                Ok(FragmentInput {
                    name,
                    ty,
                    input_type: FragmentInputType::Varying,
                    index: 0,
                })
            }
        }
    }

    fn parse_pipeline(&mut self) -> Result<()> {
        self.expect(Token::Pipeline)?;
        let name = self.expect_identifier()?;
        trace!("parse_pipeline: {}", name);
        self.expect(Token::LeftBrace)?;
        self.expect(Token::Vertex)?;
        self.expect(Token::Assign)?;
        let vertex_name = self.expect_identifier()?;
        self.expect(Token::Semicolon)?;
        self.expect(Token::Fragment)?;
        self.expect(Token::Assign)?;
        let fragment_name = self.expect_identifier()?;
        self.expect(Token::Semicolon)?;
        self.expect(Token::RightBrace)?;

        // The one place a declaration's identity changes after creation:
        // the pipeline claims its functions under `{name}_vert` /
        // `{name}_frag`. The rename removes the old key, so a second
        // pipeline naming the same function fails the lookup below.
        let vert = format!("{}_vert", name);
        let frag = format!("{}_frag", name);
        if !self.module.rename_vertex_function(&vertex_name, vert.clone()) {
            bail_semantic!(
                "pipeline '{}' references unknown or already-bound vertex function '{}'",
                name,
                vertex_name
            );
        }
        if !self.module.rename_fragment_function(&fragment_name, frag.clone()) {
            bail_semantic!(
                "pipeline '{}' references unknown or already-bound fragment function '{}'",
                name,
                fragment_name
            );
        }
        self.module.add_pipeline(PipelineDeclaration {
            name,
            vertex_function: vert,
            fragment_function: frag,
        });
        Ok(())
    }

    fn parse_block(&mut self, function: &str) -> Result<Vec<Statement>> {
        let mut body = Vec::new();
        while !self.check(&Token::RightBrace) {
            if self.is_at_end() {
                bail_parse!("unterminated body of function '{}'", function);
            }
            body.push(self.parse_statement()?);
        }
        self.expect(Token::RightBrace)?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.check(&Token::Return) {
            self.advance();
            let expr = self.parse_expression()?;
            self.expect(Token::Semicolon)?;
            return Ok(Statement::Return(expr));
        }

        // `TYPE NAME ;` is a variable declaration when TYPE names a known
        // type; anything else starting with an identifier is an expression.
        if let (Some(Token::Identifier(first)), Some(Token::Identifier(_))) =
            (self.peek(), self.peek_ahead(1))
        {
            if let Some(ty) = self.module.lookup_type(first) {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(Token::Semicolon)?;
                return Ok(Statement::VariableDecl { name, ty });
            }
        }

        let target = self.parse_expression()?;
        let op = match self.peek() {
            Some(Token::Assign) => Some(AssignOp::Assign),
            Some(Token::PlusEq) => Some(AssignOp::Add),
            Some(Token::MinusEq) => Some(AssignOp::Sub),
            Some(Token::StarEq) => Some(AssignOp::Mul),
            Some(Token::SlashEq) => Some(AssignOp::Div),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let value = self.parse_expression()?;
            self.expect(Token::Semicolon)?;
            return Ok(Statement::Assignment { target, value, op });
        }
        self.expect(Token::Semicolon)?;
        Ok(Statement::Expression(target))
    }

    pub(crate) fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_additive()
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOpKind::Add,
                Some(Token::Minus) => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expression::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOpKind::Mul,
                Some(Token::Slash) => BinOpKind::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expression::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let op = match self.peek() {
            Some(Token::Plus) => Some(UnOpKind::Pos),
            Some(Token::Minus) => Some(UnOpKind::Neg),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                Ok(Expression::UnOp {
                    op,
                    rhs: Box::new(self.parse_unary()?),
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut expr = self.parse_primary()?;
        while self.check(&Token::Dot) {
            self.advance();
            let name = self.expect_identifier()?;
            expr = Expression::PropertyAccess {
                base: Box::new(expr),
                name,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        match self.peek().cloned() {
            Some(Token::FloatLiteral(v)) => {
                self.advance();
                Ok(Expression::FloatLiteral(v))
            }
            Some(Token::IntLiteral(v)) => {
                self.advance();
                Ok(Expression::IntegerLiteral(v as i64))
            }
            Some(Token::Identifier(name)) => {
                self.advance();
                if self.check(&Token::LeftParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Token::RightParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.check(&Token::Comma) {
                                break;
                            }
                            self.advance();
                        }
                    }
                    self.expect(Token::RightParen)?;
                    Ok(Expression::Call { callee: name, args })
                } else {
                    Ok(Expression::Identifier(name))
                }
            }
            Some(Token::LeftParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(Expression::Parenthesis(Box::new(inner)))
            }
            other => bail_parse!("expected an expression, got {:?}", other),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.current + n)
    }

    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.current += 1;
            self.tokens.get(self.current - 1)
        } else {
            None
        }
    }

    fn check(&self, token: &Token) -> bool {
        if let Some(t) = self.peek() {
            std::mem::discriminant(t) == std::mem::discriminant(token)
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.check(&token) {
            self.advance();
            Ok(())
        } else {
            Err(CompilerError::ParseError(format!(
                "Expected {:?}, got {:?}",
                token,
                self.peek()
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Identifier(name)) => Ok(name.clone()),
            other => Err(CompilerError::ParseError(format!(
                "Expected identifier, got {:?}",
                other
            ))),
        }
    }

    fn expect_integer(&mut self) -> Result<u64> {
        match self.advance() {
            Some(Token::IntLiteral(v)) => Ok(*v),
            other => Err(CompilerError::ParseError(format!(
                "Expected integer literal, got {:?}",
                other
            ))),
        }
    }

    /// Buffer/binding indices are kept as `i32` (negative means unslotted),
    /// so a declared index has to fit.
    fn expect_index(&mut self) -> Result<i32> {
        let value = self.expect_integer()?;
        i32::try_from(value).map_err(|_| {
            CompilerError::ParseError(format!("binding index {} is out of range", value))
        })
    }

    fn expect_type(&mut self) -> Result<TypeId> {
        let name = self.expect_identifier()?;
        self.module
            .lookup_type(&name)
            .ok_or_else(|| CompilerError::SemanticError(format!("unknown type '{}'", name)))
    }

    fn expect_struct_type(&mut self, what: &str) -> Result<TypeId> {
        let ty = self.expect_type()?;
        if !self.module.is_struct(ty) {
            return Err(CompilerError::SemanticError(format!(
                "{} must be a struct, got builtin '{}'",
                what,
                self.module.ty(ty).name
            )));
        }
        Ok(ty)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    /// Parses the input and runs a check over the resulting module,
    /// printing the module on failure for debugging.
    fn expect_parse<F>(input: &str, check_fn: F)
    where
        F: FnOnce(&Module) -> std::result::Result<(), String>,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let tokens = tokenize(input).expect("Failed to tokenize input");
        let parser = Parser::new(tokens.clone());
        let module = match parser.parse() {
            Ok(module) => module,
            Err(e) => {
                println!("Parse failed with error: {:?}", e);
                println!("Tokens were: {:#?}", tokens);
                panic!("Failed to parse input: {:?}", e);
            }
        };
        if let Err(msg) = check_fn(&module) {
            println!("Check failed: {}", msg);
            println!("Parsed module: {:#?}", module);
            panic!("Test assertion failed: {}", msg);
        }
    }

    fn expect_parse_error<F>(input: &str, error_check: F)
    where
        F: FnOnce(&CompilerError) -> std::result::Result<(), String>,
    {
        let tokens = tokenize(input).expect("Failed to tokenize input");
        let parser = Parser::new(tokens);
        match parser.parse() {
            Ok(module) => {
                println!("Parsed module: {:#?}", module);
                panic!("Expected parse to fail, but it succeeded");
            }
            Err(ref error) => {
                if let Err(msg) = error_check(error) {
                    println!("Actual error: {:?}", error);
                    panic!("Error assertion failed: {}", msg);
                }
            }
        }
    }

    #[test]
    fn test_parse_namespace() {
        expect_parse("namespace demo::shaders;", |module| {
            if module.namespace.as_deref() != Some("demo::shaders") {
                return Err(format!("unexpected namespace {:?}", module.namespace));
            }
            Ok(())
        });
    }

    #[test]
    fn test_parse_struct_preserves_property_order() {
        expect_parse("struct Vertex { vec4 position; vec4 color; vec2 uv; }", |module| {
            let id = module.lookup_type("Vertex").ok_or("Vertex not registered")?;
            let names: Vec<&str> = module
                .ty(id)
                .properties
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            if names != ["position", "color", "uv"] {
                return Err(format!("wrong property order: {:?}", names));
            }
            if module.ty(id).properties.iter().any(|p| p.index != -1) {
                return Err("struct not bound by any declaration must keep index -1".to_string());
            }
            Ok(())
        });
    }

    #[test]
    fn test_parse_struct_with_unknown_type_fails() {
        expect_parse_error("struct V { quaternion q; }", |err| match err {
            CompilerError::SemanticError(msg) if msg.contains("quaternion") => Ok(()),
            other => Err(format!("expected semantic error, got {:?}", other)),
        });
    }

    #[test]
    fn test_parse_vertex_declaration() {
        let input = r#"
            struct Vertex { vec4 position; vec4 color; }
            struct VSOut { vec4 position; vec4 color; }
            vertex vs_main(vertex(0) Vertex v) -> VSOut {
                VSOut o;
                o.position = v.position;
                o.color = v.color;
                return o;
            }
        "#;
        expect_parse(input, |module| {
            let decl = module.vertex_function("vs_main").ok_or("missing vs_main")?;
            if decl.inputs.len() != 1 {
                return Err(format!("expected 1 input, got {}", decl.inputs.len()));
            }
            let input = &decl.inputs[0];
            if input.input_type != VertexInputType::Vertex || input.index != 0 {
                return Err(format!("wrong input classification: {:?}", input));
            }
            if decl.body.len() != 4 {
                return Err(format!("expected 4 statements, got {}", decl.body.len()));
            }
            match &decl.body[0] {
                Statement::VariableDecl { name, .. } if name == "o" => {}
                other => return Err(format!("expected variable decl, got {:?}", other)),
            }
            match &decl.body[3] {
                Statement::Return(Expression::Identifier(name)) if name == "o" => {}
                other => return Err(format!("expected return, got {:?}", other)),
            }
            Ok(())
        });
    }

    #[test]
    fn test_vertex_input_slots_are_assigned() {
        let input = r#"
            struct Vertex { vec4 position; vec4 color; }
            struct Instance { vec4 offset; }
            struct VSOut { vec4 position; vec4 color; }
            vertex vs_main(vertex(0) Vertex v, instanced(1) Instance inst) -> VSOut {
                return v;
            }
        "#;
        expect_parse(input, |module| {
            let vertex = module.lookup_type("Vertex").ok_or("no Vertex")?;
            let inst = module.lookup_type("Instance").ok_or("no Instance")?;
            let indices: Vec<i32> = module.ty(vertex).properties.iter().map(|p| p.index).collect();
            if indices != [0, 1] {
                return Err(format!("Vertex slots: {:?}", indices));
            }
            // The attribute counter keeps running across buffers.
            if module.ty(inst).properties[0].index != 2 {
                return Err(format!(
                    "Instance slot: {}",
                    module.ty(inst).properties[0].index
                ));
            }
            let out = module.lookup_type("VSOut").ok_or("no VSOut")?;
            let out_indices: Vec<i32> = module.ty(out).properties.iter().map(|p| p.index).collect();
            if out_indices != [0, 1] {
                return Err(format!("VSOut slots: {:?}", out_indices));
            }
            Ok(())
        });
    }

    #[test]
    fn test_parse_fragment_with_all_input_kinds() {
        let input = r#"
            struct FragIn { vec4 color; vec2 uv; }
            struct Material { vec4 tint; }
            struct FragOut { vec4 color; }
            fragment fs_main(FragIn fin, uniform(1) Material mat, texture(0) texture2d tex) -> FragOut {
                FragOut o;
                o.color = sample(tex, fin.uv) * mat.tint;
                return o;
            }
        "#;
        expect_parse(input, |module| {
            let decl = module.fragment_function("fs_main").ok_or("missing fs_main")?;
            let kinds: Vec<FragmentInputType> =
                decl.inputs.iter().map(|i| i.input_type).collect();
            if kinds
                != [
                    FragmentInputType::Varying,
                    FragmentInputType::Uniform,
                    FragmentInputType::Texture,
                ]
            {
                return Err(format!("wrong input kinds: {:?}", kinds));
            }
            if decl.inputs[1].index != 1 || decl.inputs[2].index != 0 {
                return Err("wrong binding indices".to_string());
            }
            // Uniform struct members stay unslotted.
            let mat = module.lookup_type("Material").ok_or("no Material")?;
            if module.ty(mat).properties[0].index != -1 {
                return Err("uniform struct property must keep index -1".to_string());
            }
            // Varying struct gets slots 0..n.
            let fin = module.lookup_type("FragIn").ok_or("no FragIn")?;
            let indices: Vec<i32> = module.ty(fin).properties.iter().map(|p| p.index).collect();
            if indices != [0, 1] {
                return Err(format!("FragIn slots: {:?}", indices));
            }
            Ok(())
        });
    }

    #[test]
    fn test_texture_input_requires_texture_type() {
        let input = r#"
            struct FragOut { vec4 color; }
            fragment fs(texture(0) vec4 tex) -> FragOut { return tex; }
        "#;
        expect_parse_error(input, |err| match err {
            CompilerError::SemanticError(msg) if msg.contains("texture2d") => Ok(()),
            other => Err(format!("expected semantic error, got {:?}", other)),
        });
    }

    #[test]
    fn test_binding_index_must_fit_i32() {
        // 2^32 would truncate to buffer 0 if the index were cast blindly.
        let input = r#"
            struct V { vec4 position; }
            struct O { vec4 position; }
            vertex vs(vertex(4294967296) V v) -> O { return v; }
        "#;
        expect_parse_error(input, |err| match err {
            CompilerError::ParseError(msg) if msg.contains("out of range") => Ok(()),
            other => Err(format!("expected parse error, got {:?}", other)),
        });

        let input = r#"
            struct M { vec4 tint; }
            struct FragOut { vec4 color; }
            fragment fs(uniform(2147483648) M m) -> FragOut {
                FragOut o;
                o.color = m.tint;
                return o;
            }
        "#;
        expect_parse_error(input, |err| match err {
            CompilerError::ParseError(msg) if msg.contains("out of range") => Ok(()),
            other => Err(format!("expected parse error, got {:?}", other)),
        });
    }

    #[test]
    fn test_parse_pipeline_renames_functions() {
        let input = r#"
            struct V { vec4 position; }
            struct O { vec4 position; }
            struct F { vec4 color; }
            vertex vs(vertex(0) V v) -> O { return v; }
            fragment fs() -> F {
                F o;
                o.color = vec4(1.0, 0.0, 0.0, 1.0);
                return o;
            }
            pipeline tri { vertex = vs; fragment = fs; }
        "#;
        expect_parse(input, |module| {
            let pipeline = module.pipeline("tri").ok_or("missing pipeline")?;
            if pipeline.vertex_function != "tri_vert" || pipeline.fragment_function != "tri_frag" {
                return Err(format!("functions not renamed: {:?}", pipeline));
            }
            if module.vertex_function("vs").is_some() {
                return Err("old vertex name still registered".to_string());
            }
            if module.vertex_function("tri_vert").is_none() {
                return Err("renamed vertex function missing".to_string());
            }
            Ok(())
        });
    }

    #[test]
    fn test_function_cannot_join_two_pipelines() {
        let input = r#"
            struct V { vec4 position; }
            struct O { vec4 position; }
            struct F { vec4 color; }
            vertex vs(vertex(0) V v) -> O { return v; }
            fragment fs() -> F { F o; return o; }
            pipeline a { vertex = vs; fragment = fs; }
            pipeline b { vertex = vs; fragment = fs; }
        "#;
        expect_parse_error(input, |err| match err {
            CompilerError::SemanticError(msg) if msg.contains("'vs'") => Ok(()),
            other => Err(format!("expected semantic error, got {:?}", other)),
        });
    }

    #[test]
    fn test_parse_expression_precedence() {
        let input = r#"
            struct O { vec4 position; }
            vertex vs() -> O {
                O o;
                o.position = o.position * 2.0 + o.position / 4.0;
                return o;
            }
        "#;
        expect_parse(input, |module| {
            let decl = module.vertex_function("vs").ok_or("missing vs")?;
            match &decl.body[1] {
                Statement::Assignment { value, op, .. } => {
                    if *op != AssignOp::Assign {
                        return Err(format!("wrong assign op: {:?}", op));
                    }
                    // Top node must be the additive op, multiplications below.
                    match value {
                        Expression::BinOp { op: BinOpKind::Add, lhs, rhs } => {
                            if !matches!(**lhs, Expression::BinOp { op: BinOpKind::Mul, .. }) {
                                return Err(format!("lhs is not a multiply: {:?}", lhs));
                            }
                            if !matches!(**rhs, Expression::BinOp { op: BinOpKind::Div, .. }) {
                                return Err(format!("rhs is not a divide: {:?}", rhs));
                            }
                            Ok(())
                        }
                        other => Err(format!("expected addition on top, got {:?}", other)),
                    }
                }
                other => Err(format!("expected assignment, got {:?}", other)),
            }
        });
    }

    #[test]
    fn test_parse_unary_and_parenthesis() {
        let input = r#"
            struct O { vec4 position; }
            vertex vs() -> O {
                O o;
                o.position = -(o.position + o.position);
                return o;
            }
        "#;
        expect_parse(input, |module| {
            let decl = module.vertex_function("vs").ok_or("missing vs")?;
            match &decl.body[1] {
                Statement::Assignment { value, .. } => match value {
                    Expression::UnOp { op: UnOpKind::Neg, rhs } => match &**rhs {
                        Expression::Parenthesis(_) => Ok(()),
                        other => Err(format!("expected parenthesis, got {:?}", other)),
                    },
                    other => Err(format!("expected negation, got {:?}", other)),
                },
                other => Err(format!("expected assignment, got {:?}", other)),
            }
        });
    }

    #[test]
    fn test_parse_compound_assignment() {
        let input = r#"
            struct O { vec4 position; }
            vertex vs() -> O {
                O o;
                o.position += o.position;
                o.position *= 2.0;
                return o;
            }
        "#;
        expect_parse(input, |module| {
            let decl = module.vertex_function("vs").ok_or("missing vs")?;
            let ops: Vec<AssignOp> = decl
                .body
                .iter()
                .filter_map(|s| match s {
                    Statement::Assignment { op, .. } => Some(*op),
                    _ => None,
                })
                .collect();
            if ops != [AssignOp::Add, AssignOp::Mul] {
                return Err(format!("wrong ops: {:?}", ops));
            }
            Ok(())
        });
    }

    #[test]
    fn test_malformed_top_level_is_fatal() {
        expect_parse_error("struct V { vec4 position; } return", |err| match err {
            CompilerError::ParseError(_) => Ok(()),
            other => Err(format!("expected parse error, got {:?}", other)),
        });
    }

    #[test]
    fn test_last_declaration_wins_on_duplicate_name() {
        let input = r#"
            struct V { vec4 position; }
            struct V { vec4 position; vec4 color; }
        "#;
        expect_parse(input, |module| {
            let id = module.lookup_type("V").ok_or("no V")?;
            if module.ty(id).properties.len() != 2 {
                return Err(format!(
                    "expected the later definition, got {} properties",
                    module.ty(id).properties.len()
                ));
            }
            Ok(())
        });
    }
}
