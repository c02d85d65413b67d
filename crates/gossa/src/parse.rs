//! Recursive-descent parser for the source language.

use crate::{
    ast::{
        BinaryOp, Block, ChanDirExpr, CommClause, CompositeElem, ConstDecl, Decl, Expr, File, ForRangeStmt, ForStmt,
        FuncDecl, IfStmt, Import, Param, SelectClause, SelectStmt, Stmt, StructFieldExpr, TypeDecl, TypeExpr,
        UnaryOp, VarDecl,
    },
    error::Error,
    scan::{Spanned, Token, scan},
};

pub(crate) fn parse(source: &str) -> Result<File, Error> {
    let toks = scan(source)?;
    Parser::new(toks).file()
}

/// Enumerates top-level function names in `source`, excluding `init`.
/// Unless `exported_all` is set, only exported (capitalised) names are
/// returned.
pub fn parse_func_list(source: &str, exported_all: bool) -> Result<Vec<String>, Error> {
    let file = parse(source)?;
    let mut names = Vec::new();
    for decl in &file.decls {
        if let Decl::Func(f) = decl {
            if f.name == "init" {
                continue;
            }
            if !exported_all && !f.name.chars().next().is_some_and(char::is_uppercase) {
                continue;
            }
            names.push(f.name.clone());
        }
    }
    Ok(names)
}

struct Parser {
    toks: Vec<Spanned>,
    pos: usize,
    /// Set while parsing `if`/`for`/`select` headers, where a bare
    /// `Ident{` must be a block, not a composite literal.
    no_composite: bool,
}

impl Parser {
    fn new(toks: Vec<Spanned>) -> Self {
        Self {
            toks,
            pos: 0,
            no_composite: false,
        }
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let i = (self.pos + offset).min(self.toks.len() - 1);
        &self.toks[i].tok
    }

    fn line(&self) -> u32 {
        self.toks[self.pos].line
    }

    fn bump(&mut self) -> Token {
        let tok = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.bump();
            return true;
        }
        false
    }

    fn expect(&mut self, tok: &Token, context: &str) -> Result<(), Error> {
        if self.eat(tok) {
            return Ok(());
        }
        Err(self.err(format!("expected {tok:?} in {context}, found {:?}", self.peek())))
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::build(message, self.line())
    }

    fn ident(&mut self) -> Result<String, Error> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(&Token::Semi) {}
    }

    // === declarations ===

    fn file(&mut self) -> Result<File, Error> {
        self.skip_semis();
        self.expect(&Token::Package, "package clause")?;
        let package = self.ident()?;
        self.skip_semis();

        let mut imports = Vec::new();
        while self.peek() == &Token::Import {
            let line = self.line();
            self.bump();
            if self.eat(&Token::LParen) {
                self.skip_semis();
                while self.peek() != &Token::RParen {
                    imports.push(self.import_spec(line)?);
                    self.skip_semis();
                }
                self.bump();
            } else {
                imports.push(self.import_spec(line)?);
            }
            self.skip_semis();
        }

        let mut decls = Vec::new();
        while self.peek() != &Token::Eof {
            decls.push(self.decl()?);
            self.skip_semis();
        }
        Ok(File {
            package,
            imports,
            decls,
        })
    }

    fn import_spec(&mut self, line: u32) -> Result<Import, Error> {
        match self.bump() {
            Token::Str(path) => Ok(Import { path, line }),
            other => Err(self.err(format!("expected import path string, found {other:?}"))),
        }
    }

    fn decl(&mut self) -> Result<Decl, Error> {
        match self.peek() {
            Token::Func => Ok(Decl::Func(self.func_decl()?)),
            Token::Var => Ok(Decl::Var(self.var_decl()?)),
            Token::Const => Ok(Decl::Const(self.const_decl()?)),
            Token::Type => Ok(Decl::Type(self.type_decl()?)),
            other => Err(self.err(format!("expected declaration, found {other:?}"))),
        }
    }

    fn func_decl(&mut self) -> Result<FuncDecl, Error> {
        let line = self.line();
        self.expect(&Token::Func, "function declaration")?;
        let name = self.ident()?;
        let params = self.param_list()?;
        let results = self.result_list()?;
        let body = self.block()?;
        Ok(FuncDecl {
            name,
            params,
            results,
            body,
            line,
        })
    }

    fn param_list(&mut self) -> Result<Vec<Param>, Error> {
        self.expect(&Token::LParen, "parameter list")?;
        let mut params = Vec::new();
        while self.peek() != &Token::RParen {
            let mut names = vec![self.ident()?];
            while self.eat(&Token::Comma) {
                names.push(self.ident()?);
            }
            let ty = self.type_expr()?;
            for name in names {
                params.push(Param { name, ty: ty.clone() });
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "parameter list")?;
        Ok(params)
    }

    fn result_list(&mut self) -> Result<Vec<TypeExpr>, Error> {
        match self.peek() {
            Token::LBrace | Token::Semi => Ok(Vec::new()),
            Token::LParen => {
                self.bump();
                let mut results = Vec::new();
                while self.peek() != &Token::RParen {
                    results.push(self.type_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen, "result list")?;
                Ok(results)
            }
            _ => Ok(vec![self.type_expr()?]),
        }
    }

    fn var_decl(&mut self) -> Result<VarDecl, Error> {
        let line = self.line();
        self.expect(&Token::Var, "variable declaration")?;
        let mut names = vec![self.ident()?];
        while self.eat(&Token::Comma) {
            names.push(self.ident()?);
        }
        let ty = match self.peek() {
            Token::Assign | Token::Semi => None,
            _ => Some(self.type_expr()?),
        };
        let values = if self.eat(&Token::Assign) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(VarDecl {
            names,
            ty,
            values,
            line,
        })
    }

    fn const_decl(&mut self) -> Result<ConstDecl, Error> {
        let line = self.line();
        self.expect(&Token::Const, "constant declaration")?;
        let mut names = vec![self.ident()?];
        while self.eat(&Token::Comma) {
            names.push(self.ident()?);
        }
        // an optional type is parsed and discarded; constants carry their
        // literal type
        if !matches!(self.peek(), Token::Assign) {
            let _ = self.type_expr()?;
        }
        self.expect(&Token::Assign, "constant declaration")?;
        let values = self.expr_list()?;
        Ok(ConstDecl { names, values, line })
    }

    fn type_decl(&mut self) -> Result<TypeDecl, Error> {
        let line = self.line();
        self.expect(&Token::Type, "type declaration")?;
        let name = self.ident()?;
        let ty = self.type_expr()?;
        Ok(TypeDecl { name, ty, line })
    }

    // === types ===

    fn type_expr(&mut self) -> Result<TypeExpr, Error> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let line = self.line();
                self.bump();
                if self.peek() == &Token::Dot
                    && matches!(self.peek_at(1), Token::Ident(_))
                {
                    self.bump();
                    let member = self.ident()?;
                    Ok(TypeExpr::Name {
                        pkg: Some(name),
                        name: member,
                        line,
                    })
                } else {
                    Ok(TypeExpr::Name {
                        pkg: None,
                        name,
                        line,
                    })
                }
            }
            Token::LBracket => {
                self.bump();
                if self.eat(&Token::RBracket) {
                    Ok(TypeExpr::Slice(Box::new(self.type_expr()?)))
                } else {
                    let len = self.expr()?;
                    self.expect(&Token::RBracket, "array type")?;
                    Ok(TypeExpr::Array {
                        len: Box::new(len),
                        elem: Box::new(self.type_expr()?),
                    })
                }
            }
            Token::Map => {
                self.bump();
                self.expect(&Token::LBracket, "map type")?;
                let key = self.type_expr()?;
                self.expect(&Token::RBracket, "map type")?;
                Ok(TypeExpr::Map {
                    key: Box::new(key),
                    value: Box::new(self.type_expr()?),
                })
            }
            Token::Chan => {
                self.bump();
                let dir = if self.eat(&Token::Arrow) {
                    ChanDirExpr::Send
                } else {
                    ChanDirExpr::Both
                };
                Ok(TypeExpr::Chan {
                    dir,
                    elem: Box::new(self.type_expr()?),
                })
            }
            Token::Arrow => {
                self.bump();
                self.expect(&Token::Chan, "receive-only channel type")?;
                Ok(TypeExpr::Chan {
                    dir: ChanDirExpr::Recv,
                    elem: Box::new(self.type_expr()?),
                })
            }
            Token::Star => {
                self.bump();
                Ok(TypeExpr::Pointer(Box::new(self.type_expr()?)))
            }
            Token::Func => {
                self.bump();
                self.expect(&Token::LParen, "function type")?;
                let mut params = Vec::new();
                while self.peek() != &Token::RParen {
                    params.push(self.type_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen, "function type")?;
                let results = match self.peek() {
                    Token::LParen => {
                        self.bump();
                        let mut results = Vec::new();
                        while self.peek() != &Token::RParen {
                            results.push(self.type_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                        self.expect(&Token::RParen, "function type results")?;
                        results
                    }
                    Token::Ident(_)
                    | Token::LBracket
                    | Token::Map
                    | Token::Chan
                    | Token::Star
                    | Token::Func
                    | Token::Struct
                    | Token::Interface => vec![self.type_expr()?],
                    _ => Vec::new(),
                };
                Ok(TypeExpr::Func { params, results })
            }
            Token::Struct => {
                self.bump();
                self.expect(&Token::LBrace, "struct type")?;
                self.skip_semis();
                let mut fields = Vec::new();
                while self.peek() != &Token::RBrace {
                    let mut names = vec![self.ident()?];
                    while self.eat(&Token::Comma) {
                        names.push(self.ident()?);
                    }
                    let ty = self.type_expr()?;
                    let tag = match self.peek() {
                        Token::Str(tag) => {
                            let tag = tag.clone();
                            self.bump();
                            Some(tag)
                        }
                        _ => None,
                    };
                    for name in names {
                        fields.push(StructFieldExpr {
                            name,
                            ty: ty.clone(),
                            tag: tag.clone(),
                        });
                    }
                    self.skip_semis();
                }
                self.bump();
                Ok(TypeExpr::Struct { fields })
            }
            Token::Interface => {
                self.bump();
                self.expect(&Token::LBrace, "interface type")?;
                self.skip_semis();
                self.expect(&Token::RBrace, "interface type")?;
                Ok(TypeExpr::Interface)
            }
            other => Err(self.err(format!("expected type, found {other:?}"))),
        }
    }

    // === statements ===

    fn block(&mut self) -> Result<Block, Error> {
        self.expect(&Token::LBrace, "block")?;
        let saved = self.no_composite;
        self.no_composite = false;
        let mut stmts = Vec::new();
        loop {
            self.skip_semis();
            if self.peek() == &Token::RBrace {
                break;
            }
            stmts.push(self.stmt()?);
            if self.peek() != &Token::RBrace {
                self.expect(&Token::Semi, "statement list")?;
            }
        }
        self.bump();
        self.no_composite = saved;
        Ok(Block { stmts })
    }

    fn stmt(&mut self) -> Result<Stmt, Error> {
        match self.peek() {
            Token::Var => Ok(Stmt::Var(self.var_decl()?)),
            Token::Const => Ok(Stmt::Const(self.const_decl()?)),
            Token::Return => {
                let line = self.line();
                self.bump();
                let values = if matches!(self.peek(), Token::Semi | Token::RBrace) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                Ok(Stmt::Return { values, line })
            }
            Token::If => self.if_stmt(),
            Token::For => self.for_stmt(),
            Token::Select => self.select_stmt(),
            Token::Break => {
                let line = self.line();
                self.bump();
                Ok(Stmt::Break { line })
            }
            Token::Continue => {
                let line = self.line();
                self.bump();
                Ok(Stmt::Continue { line })
            }
            Token::Defer => {
                let line = self.line();
                self.bump();
                let call = self.expr()?;
                Ok(Stmt::Defer { call, line })
            }
            Token::Go => {
                let line = self.line();
                self.bump();
                let call = self.expr()?;
                Ok(Stmt::Go { call, line })
            }
            Token::LBrace => Ok(Stmt::Block(self.block()?)),
            _ => self.simple_stmt(),
        }
    }

    fn simple_stmt(&mut self) -> Result<Stmt, Error> {
        let line = self.line();
        let first = self.expr()?;

        match self.peek().clone() {
            Token::Arrow => {
                self.bump();
                let value = self.expr()?;
                Ok(Stmt::Send {
                    chan: first,
                    value,
                    line,
                })
            }
            Token::PlusPlus => {
                self.bump();
                Ok(Stmt::IncDec {
                    target: first,
                    dec: false,
                    line,
                })
            }
            Token::MinusMinus => {
                self.bump();
                Ok(Stmt::IncDec {
                    target: first,
                    dec: true,
                    line,
                })
            }
            Token::Comma => {
                let mut targets = vec![first];
                while self.eat(&Token::Comma) {
                    targets.push(self.expr()?);
                }
                let define = match self.bump() {
                    Token::Define => true,
                    Token::Assign => false,
                    other => return Err(self.err(format!("expected := or = after target list, found {other:?}"))),
                };
                let values = self.expr_list()?;
                Ok(Stmt::Assign {
                    targets,
                    op: None,
                    values,
                    define,
                    line,
                })
            }
            Token::Define | Token::Assign => {
                let define = self.bump() == Token::Define;
                let values = self.expr_list()?;
                Ok(Stmt::Assign {
                    targets: vec![first],
                    op: None,
                    values,
                    define,
                    line,
                })
            }
            tok => {
                if let Some(op) = compound_op(&tok) {
                    self.bump();
                    let value = self.expr()?;
                    Ok(Stmt::Assign {
                        targets: vec![first],
                        op: Some(op),
                        values: vec![value],
                        define: false,
                        line,
                    })
                } else {
                    Ok(Stmt::Expr(first))
                }
            }
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, Error> {
        let line = self.line();
        self.expect(&Token::If, "if statement")?;
        let saved = self.no_composite;
        self.no_composite = true;
        let first = self.simple_stmt()?;
        let (init, cond) = if self.eat(&Token::Semi) {
            let cond = self.expr()?;
            (Some(Box::new(first)), cond)
        } else {
            match first {
                Stmt::Expr(cond) => (None, cond),
                _ => return Err(self.err("missing condition in if statement")),
            }
        };
        self.no_composite = saved;
        let then = self.block()?;
        let els = if self.eat(&Token::Else) {
            match self.peek() {
                Token::If => Some(Box::new(self.if_stmt()?)),
                Token::LBrace => Some(Box::new(Stmt::Block(self.block()?))),
                other => return Err(self.err(format!("expected if or block after else, found {other:?}"))),
            }
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            init,
            cond,
            then,
            els,
            line,
        }))
    }

    fn for_stmt(&mut self) -> Result<Stmt, Error> {
        let line = self.line();
        self.expect(&Token::For, "for statement")?;
        let saved = self.no_composite;
        self.no_composite = true;

        // `for {`
        if self.peek() == &Token::LBrace {
            self.no_composite = saved;
            let body = self.block()?;
            return Ok(Stmt::For(ForStmt {
                init: None,
                cond: None,
                post: None,
                body,
                line,
            }));
        }

        // `for range x {`
        if self.eat(&Token::Range) {
            let expr = self.expr()?;
            self.no_composite = saved;
            let body = self.block()?;
            return Ok(Stmt::ForRange(ForRangeStmt {
                key: None,
                value: None,
                expr,
                body,
                line,
            }));
        }

        // `for k := range x` / `for k, v := range x`
        if let Some(stmt) = self.try_range_header(line)? {
            self.no_composite = saved;
            return Ok(stmt);
        }

        let first = self.simple_stmt()?;
        if self.eat(&Token::Semi) {
            let cond = if self.peek() == &Token::Semi {
                None
            } else {
                Some(self.expr()?)
            };
            self.expect(&Token::Semi, "for clause")?;
            let post = if self.peek() == &Token::LBrace {
                None
            } else {
                Some(Box::new(self.simple_stmt()?))
            };
            self.no_composite = saved;
            let body = self.block()?;
            return Ok(Stmt::For(ForStmt {
                init: Some(Box::new(first)),
                cond,
                post,
                body,
                line,
            }));
        }

        // `for cond {`
        let cond = match first {
            Stmt::Expr(cond) => cond,
            _ => return Err(self.err("missing loop condition")),
        };
        self.no_composite = saved;
        let body = self.block()?;
        Ok(Stmt::For(ForStmt {
            init: None,
            cond: Some(cond),
            post: None,
            body,
            line,
        }))
    }

    /// Recognises `k := range x` and `k, v := range x` loop headers by
    /// lookahead, without consuming anything on failure.
    fn try_range_header(&mut self, line: u32) -> Result<Option<Stmt>, Error> {
        let is_range = match (self.peek(), self.peek_at(1), self.peek_at(2), self.peek_at(3), self.peek_at(4)) {
            (Token::Ident(_), Token::Define, Token::Range, _, _) => true,
            (Token::Ident(_), Token::Comma, Token::Ident(_), Token::Define, Token::Range) => true,
            _ => false,
        };
        if !is_range {
            return Ok(None);
        }
        let key = self.ident()?;
        let value = if self.eat(&Token::Comma) {
            Some(self.ident()?)
        } else {
            None
        };
        self.expect(&Token::Define, "range clause")?;
        self.expect(&Token::Range, "range clause")?;
        let expr = self.expr()?;
        let saved = self.no_composite;
        self.no_composite = false;
        let body = self.block()?;
        self.no_composite = saved;
        Ok(Some(Stmt::ForRange(ForRangeStmt {
            key: Some(key),
            value,
            expr,
            body,
            line,
        })))
    }

    fn select_stmt(&mut self) -> Result<Stmt, Error> {
        let line = self.line();
        self.expect(&Token::Select, "select statement")?;
        self.expect(&Token::LBrace, "select statement")?;
        let mut cases = Vec::new();
        self.skip_semis();
        while self.peek() != &Token::RBrace {
            let case_line = self.line();
            let comm = match self.bump() {
                Token::Case => self.comm_clause()?,
                Token::Default => {
                    self.expect(&Token::Colon, "select default")?;
                    CommClause::Default
                }
                other => return Err(self.err(format!("expected case or default in select, found {other:?}"))),
            };
            let mut stmts = Vec::new();
            loop {
                self.skip_semis();
                if matches!(self.peek(), Token::Case | Token::Default | Token::RBrace) {
                    break;
                }
                stmts.push(self.stmt()?);
                if !matches!(self.peek(), Token::Case | Token::Default | Token::RBrace) {
                    self.expect(&Token::Semi, "select case body")?;
                }
            }
            cases.push(SelectClause {
                comm,
                body: Block { stmts },
                line: case_line,
            });
        }
        self.bump();
        Ok(Stmt::Select(SelectStmt { cases, line }))
    }

    fn comm_clause(&mut self) -> Result<CommClause, Error> {
        // `case <-c:`
        if self.peek() == &Token::Arrow {
            self.bump();
            let chan = self.expr()?;
            self.expect(&Token::Colon, "select case")?;
            return Ok(CommClause::Recv {
                names: Vec::new(),
                chan,
            });
        }
        // `case v := <-c:` / `case v, ok := <-c:`
        if matches!(self.peek(), Token::Ident(_))
            && (self.peek_at(1) == &Token::Define
                || (self.peek_at(1) == &Token::Comma && self.peek_at(3) == &Token::Define))
        {
            let mut names = vec![self.ident()?];
            if self.eat(&Token::Comma) {
                names.push(self.ident()?);
            }
            self.expect(&Token::Define, "select receive")?;
            self.expect(&Token::Arrow, "select receive")?;
            let chan = self.expr()?;
            self.expect(&Token::Colon, "select case")?;
            return Ok(CommClause::Recv { names, chan });
        }
        // `case c <- v:`
        let chan = self.expr()?;
        self.expect(&Token::Arrow, "select send")?;
        let value = self.expr()?;
        self.expect(&Token::Colon, "select case")?;
        Ok(CommClause::Send { chan, value })
    }

    // === expressions ===

    fn expr_list(&mut self) -> Result<Vec<Expr>, Error> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> Result<Expr, Error> {
        self.binary_expr(1)
    }

    fn binary_expr(&mut self, min_prec: u8) -> Result<Expr, Error> {
        let mut lhs = self.unary_expr()?;
        loop {
            let Some((op, prec)) = binary_op(self.peek()) else {
                return Ok(lhs);
            };
            if prec < min_prec {
                return Ok(lhs);
            }
            let line = self.line();
            self.bump();
            let rhs = self.binary_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, Error> {
        let line = self.line();
        let op = match self.peek() {
            Token::Minus => Some(UnaryOp::Neg),
            Token::Bang => Some(UnaryOp::Not),
            Token::Caret => Some(UnaryOp::BitNot),
            Token::Star => Some(UnaryOp::Deref),
            Token::Amp => Some(UnaryOp::Addr),
            Token::Arrow => Some(UnaryOp::Recv),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.unary_expr()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
                line,
            });
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<Expr, Error> {
        let mut expr = self.operand()?;
        loop {
            match self.peek().clone() {
                Token::LParen => {
                    let line = self.line();
                    self.bump();
                    let saved = self.no_composite;
                    self.no_composite = false;
                    let mut args = Vec::new();
                    while self.peek() != &Token::RParen {
                        args.push(self.expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "call arguments")?;
                    self.no_composite = saved;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                Token::LBracket => {
                    let line = self.line();
                    self.bump();
                    let saved = self.no_composite;
                    self.no_composite = false;
                    let result = self.index_or_slice(expr, line)?;
                    self.no_composite = saved;
                    expr = result;
                }
                Token::Dot => {
                    let line = self.line();
                    self.bump();
                    if self.peek() == &Token::LParen {
                        self.bump();
                        let ty = self.type_expr()?;
                        self.expect(&Token::RParen, "type assertion")?;
                        expr = Expr::TypeAssert {
                            base: Box::new(expr),
                            ty,
                            line,
                        };
                    } else {
                        let field = self.ident()?;
                        expr = Expr::Selector {
                            base: Box::new(expr),
                            field,
                            line,
                        };
                    }
                }
                Token::LBrace if !self.no_composite => {
                    // composite literal of a named (possibly qualified) type
                    let Some(ty) = type_of_expr(&expr) else {
                        return Ok(expr);
                    };
                    let line = self.line();
                    let elems = self.composite_body()?;
                    expr = Expr::Composite { ty, elems, line };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn index_or_slice(&mut self, base: Expr, line: u32) -> Result<Expr, Error> {
        let low = if self.peek() == &Token::Colon {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if self.eat(&Token::RBracket) {
            let index = low.ok_or_else(|| self.err("missing index expression"))?;
            return Ok(Expr::Index {
                base: Box::new(base),
                index,
                line,
            });
        }
        self.expect(&Token::Colon, "slice expression")?;
        let high = if matches!(self.peek(), Token::RBracket | Token::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let max = if self.eat(&Token::Colon) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect(&Token::RBracket, "slice expression")?;
        Ok(Expr::SliceExpr {
            base: Box::new(base),
            low,
            high,
            max,
            line,
        })
    }

    fn operand(&mut self) -> Result<Expr, Error> {
        let line = self.line();
        match self.peek().clone() {
            Token::Int(value) => {
                self.bump();
                Ok(Expr::IntLit { value, line })
            }
            Token::Uint(value) => {
                self.bump();
                Ok(Expr::UintLit { value, line })
            }
            Token::Float(value) => {
                self.bump();
                Ok(Expr::FloatLit { value, line })
            }
            Token::Str(value) => {
                self.bump();
                Ok(Expr::StringLit { value, line })
            }
            Token::Ident(name) => {
                self.bump();
                Ok(Expr::Ident { name, line })
            }
            Token::LParen => {
                self.bump();
                let saved = self.no_composite;
                self.no_composite = false;
                let expr = self.expr()?;
                self.no_composite = saved;
                self.expect(&Token::RParen, "parenthesised expression")?;
                Ok(expr)
            }
            Token::Func => {
                self.bump();
                let params = self.param_list()?;
                let results = match self.peek() {
                    Token::LBrace => Vec::new(),
                    Token::LParen => {
                        self.bump();
                        let mut results = Vec::new();
                        while self.peek() != &Token::RParen {
                            results.push(self.type_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                        self.expect(&Token::RParen, "function literal results")?;
                        results
                    }
                    _ => vec![self.type_expr()?],
                };
                let body = self.block()?;
                Ok(Expr::FuncLit {
                    params,
                    results,
                    body,
                    line,
                })
            }
            Token::LBracket | Token::Map | Token::Struct | Token::Chan | Token::Interface => {
                let ty = self.type_expr()?;
                match self.peek() {
                    Token::LBrace => {
                        let elems = self.composite_body()?;
                        Ok(Expr::Composite { ty, elems, line })
                    }
                    Token::LParen => {
                        self.bump();
                        let saved = self.no_composite;
                        self.no_composite = false;
                        let inner = self.expr()?;
                        self.no_composite = saved;
                        self.expect(&Token::RParen, "conversion")?;
                        Ok(Expr::Conversion {
                            ty,
                            expr: Box::new(inner),
                            line,
                        })
                    }
                    // a bare type in expression position: make/new argument
                    _ => Ok(Expr::TypeLit { ty, line }),
                }
            }
            other => Err(self.err(format!("unexpected token {other:?} in expression"))),
        }
    }

    fn composite_body(&mut self) -> Result<Vec<CompositeElem>, Error> {
        self.expect(&Token::LBrace, "composite literal")?;
        let saved = self.no_composite;
        self.no_composite = false;
        let mut elems = Vec::new();
        loop {
            self.skip_semis();
            if self.peek() == &Token::RBrace {
                break;
            }
            let first = self.expr()?;
            if self.eat(&Token::Colon) {
                let value = self.expr()?;
                elems.push(CompositeElem {
                    key: Some(first),
                    value,
                });
            } else {
                elems.push(CompositeElem { key: None, value: first });
            }
            if !self.eat(&Token::Comma) {
                self.skip_semis();
                break;
            }
        }
        self.skip_semis();
        self.expect(&Token::RBrace, "composite literal")?;
        self.no_composite = saved;
        Ok(elems)
    }
}

/// A selector or identifier expression reinterpreted as a type name, for
/// composite literals like `Point{1, 2}` and `pkg.Point{1, 2}`.
fn type_of_expr(expr: &Expr) -> Option<TypeExpr> {
    match expr {
        Expr::Ident { name, line } => Some(TypeExpr::Name {
            pkg: None,
            name: name.clone(),
            line: *line,
        }),
        Expr::Selector { base, field, line } => match base.as_ref() {
            Expr::Ident { name, .. } => Some(TypeExpr::Name {
                pkg: Some(name.clone()),
                name: field.clone(),
                line: *line,
            }),
            _ => None,
        },
        _ => None,
    }
}

fn binary_op(tok: &Token) -> Option<(BinaryOp, u8)> {
    Some(match tok {
        Token::OrOr => (BinaryOp::LOr, 1),
        Token::AndAnd => (BinaryOp::LAnd, 2),
        Token::EqEq => (BinaryOp::Eq, 3),
        Token::NotEq => (BinaryOp::Ne, 3),
        Token::Lt => (BinaryOp::Lt, 3),
        Token::LtEq => (BinaryOp::Le, 3),
        Token::Gt => (BinaryOp::Gt, 3),
        Token::GtEq => (BinaryOp::Ge, 3),
        Token::Plus => (BinaryOp::Add, 4),
        Token::Minus => (BinaryOp::Sub, 4),
        Token::Pipe => (BinaryOp::Or, 4),
        Token::Caret => (BinaryOp::Xor, 4),
        Token::Star => (BinaryOp::Mul, 5),
        Token::Slash => (BinaryOp::Div, 5),
        Token::Percent => (BinaryOp::Rem, 5),
        Token::Shl => (BinaryOp::Shl, 5),
        Token::Shr => (BinaryOp::Shr, 5),
        Token::Amp => (BinaryOp::And, 5),
        Token::AmpCaret => (BinaryOp::AndNot, 5),
        _ => return None,
    })
}

fn compound_op(tok: &Token) -> Option<BinaryOp> {
    Some(match tok {
        Token::PlusEq => BinaryOp::Add,
        Token::MinusEq => BinaryOp::Sub,
        Token::StarEq => BinaryOp::Mul,
        Token::SlashEq => BinaryOp::Div,
        Token::PercentEq => BinaryOp::Rem,
        Token::AmpEq => BinaryOp::And,
        Token::PipeEq => BinaryOp::Or,
        Token::CaretEq => BinaryOp::Xor,
        Token::AmpCaretEq => BinaryOp::AndNot,
        Token::ShlEq => BinaryOp::Shl,
        Token::ShrEq => BinaryOp::Shr,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> File {
        parse(src).unwrap()
    }

    #[test]
    fn minimal_file() {
        let file = parse_ok("package main\n\nfunc test() int {\n\treturn 1 + 2*3\n}\n");
        assert_eq!(file.package, "main");
        assert_eq!(file.decls.len(), 1);
    }

    #[test]
    fn imports_single_and_grouped() {
        let file = parse_ok("package main\nimport \"pkg1\"\nimport (\n\t\"pkg2\"\n\t\"pkg3\"\n)\nfunc test() {\n}\n");
        let paths: Vec<_> = file.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["pkg1", "pkg2", "pkg3"]);
    }

    #[test]
    fn precedence_binds_mul_tighter() {
        let file = parse_ok("package main\nfunc test() int { return 1 + 2*3 }\n");
        let Decl::Func(f) = &file.decls[0] else { panic!() };
        let Stmt::Return { values, .. } = &f.body.stmts[0] else { panic!() };
        let Expr::Binary { op, rhs, .. } = &values[0] else { panic!() };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.as_ref(), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn if_with_init_and_else() {
        parse_ok("package main\nfunc test(n int) int {\n\tif v := n * 2; v > 4 {\n\t\treturn v\n\t} else if v == 4 {\n\t\treturn 0\n\t} else {\n\t\treturn -1\n\t}\n}\n");
    }

    #[test]
    fn for_forms() {
        parse_ok("package main\nfunc test() {\n\tfor {\n\t\tbreak\n\t}\n\tfor i := 0; i < 3; i++ {\n\t}\n\tfor k, v := range m {\n\t\t_ = k\n\t\t_ = v\n\t}\n}\n");
    }

    #[test]
    fn select_clauses() {
        parse_ok("package main\nfunc test(c chan int) int {\n\tselect {\n\tcase v := <-c:\n\t\treturn v\n\tcase c <- 1:\n\t\treturn 0\n\tdefault:\n\t\treturn -1\n\t}\n\treturn -2\n}\n");
    }

    #[test]
    fn composite_literals() {
        parse_ok("package main\ntype point struct {\n\tx, y int\n}\nfunc test() int {\n\tp := point{1, 2}\n\ts := []int{1, 2, 3}\n\tm := map[string]int{\"a\": 1}\n\treturn p.x + s[0] + m[\"a\"]\n}\n");
    }

    #[test]
    fn composite_not_allowed_in_if_header() {
        // `x == point{}` in an if header must fail: the brace opens the block
        assert!(parse("package main\nfunc test() {\n\tif x == point{} {\n\t}\n}\n").is_err());
    }

    #[test]
    fn func_literals_and_defer() {
        parse_ok("package main\nfunc test() int {\n\tdefer func() {\n\t\trecover()\n\t}()\n\tf := func(x int) int { return x + 1 }\n\treturn f(1)\n}\n");
    }

    #[test]
    fn type_assertion_and_conversion() {
        parse_ok("package main\nfunc test(x any) int {\n\tb := []byte(\"ab\")\n\tn, ok := x.(int)\n\tif !ok {\n\t\treturn len(b)\n\t}\n\treturn n\n}\n");
    }

    #[test]
    fn func_list_excludes_init_and_unexported() {
        let src = "package main\nfunc init() {\n}\nfunc Exported() {\n}\nfunc helper() {\n}\n";
        assert_eq!(parse_func_list(src, false).unwrap(), vec!["Exported"]);
        assert_eq!(parse_func_list(src, true).unwrap(), vec!["Exported", "helper"]);
    }
}
