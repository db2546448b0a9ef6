// Parser for swpc .swp loop-IR source files.
//
// Parses a token stream (from the lexer) into the surface AST. Uses chumsky
// combinators; ops, expressions and loops are recursive.
//
// Grammar sketch:
//   program   := (buffer_decl | loop)*
//   loop      := 'for' IDENT 'in' int '..' int annotation* '{' loop_item* '}'
//   loop_item := 'alloc' decl | block | reduction | loop
//   block     := 'block' IDENT '{' ('init' '{' op* '}')? op* '}'
//   reduction := 'reduction' IDENT '{' 'init' '{' op* '}' 'update' '{' op* '}' '}'
//   op        := access '=' expr ';' | 'for' IDENT 'in' int '..' int '{' op* '}'
//              | 'if' '(' expr ')' '{' op* '}'
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a swpc source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Integers ──

    let signed_int = just(Token::Minus)
        .or_not()
        .then(select! { Token::Int(n) => n })
        .map_with(|(neg, n), e| (if neg.is_some() { -n } else { n }, e.span()));

    // ── Expressions ──

    let expr = recursive(|expr| {
        let access = ident
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBracket), just(Token::RBracket)),
            )
            .map_with(|(buffer, indices), e| Access {
                buffer,
                indices,
                span: e.span(),
            });

        let atom = select! {
            Token::Int(n) = e => Expr::Int(n, e.span()),
        }
        .or(access.map(Expr::Load))
        .or(ident.clone().map(Expr::Var))
        .or(expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen)));

        let unary = just(Token::Minus)
            .ignore_then(atom.clone())
            .map_with(|inner, e| Expr::Neg(Box::new(inner), e.span()))
            .or(atom);

        let product = unary.clone().foldl_with(
            just(Token::Star).to(BinOp::Mul).then(unary).repeated(),
            |lhs, (op, rhs), e| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span: e.span(),
            },
        );

        let add_op = just(Token::Plus)
            .to(BinOp::Add)
            .or(just(Token::Minus).to(BinOp::Sub));

        product.clone().foldl_with(
            add_op.then(product).repeated(),
            |lhs, (op, rhs), e| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span: e.span(),
            },
        )
    });

    let access = ident
        .clone()
        .then(
            expr.clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .map_with(|(buffer, indices), e| Access {
            buffer,
            indices,
            span: e.span(),
        });

    // ── Ops ──

    let op = recursive(|op| {
        let op_list = op
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let store = access
            .clone()
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .then_ignore(just(Token::Semi))
            .map_with(|(target, value), e| Op::Store {
                target,
                value,
                span: e.span(),
            });

        let grid = just(Token::For)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::In))
            .then(signed_int.clone())
            .then_ignore(just(Token::DotDot))
            .then(signed_int.clone())
            .then(op_list.clone())
            .map_with(|(((var, (min, _)), (max, _)), body), e| Op::Grid {
                var,
                min,
                max,
                body,
                span: e.span(),
            });

        let if_op = just(Token::If)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(op_list)
            .map_with(|(cond, then), e| Op::If {
                cond,
                then,
                span: e.span(),
            });

        choice((grid, if_op, store))
    });

    let op_block = op
        .clone()
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    // ── Element type: parsed as Ident, checked here ──

    let dtype = ident.clone().try_map(|id, span| match id.name.as_str() {
        "i32" | "i64" | "f32" => Ok(id),
        _ => Err(Rich::custom(
            span,
            format!("expected element type (i32, i64, f32), found '{}'", id.name),
        )),
    });

    // ── Buffer declaration body: IDENT ':' TYPE '[' dims ']' ';' ──

    let buffer_body = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(dtype)
        .then(
            signed_int
                .clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .then_ignore(just(Token::Semi))
        .map_with(|((name, dtype), shape), e| BufferDecl {
            name,
            dtype,
            shape,
            span: e.span(),
        });

    // ── Blocks ──

    let block_decl = just(Token::Block)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::LBrace))
        .then(just(Token::Init).ignore_then(op_block.clone()).or_not())
        .then(op.clone().repeated().collect::<Vec<_>>())
        .then_ignore(just(Token::RBrace))
        .map_with(|((name, init), body), e| BlockDecl {
            name,
            init,
            body,
            span: e.span(),
        });

    let reduction_decl = just(Token::Reduction)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::LBrace))
        .then(just(Token::Init).ignore_then(op_block.clone()))
        .then(just(Token::Update).ignore_then(op_block))
        .then_ignore(just(Token::RBrace))
        .map_with(|((name, init), update), e| ReductionDecl {
            name,
            init,
            update,
            span: e.span(),
        });

    // ── Annotations: '@' IDENT '=' (INT | STRING | '[' ints ']') ──

    let annotation_lit = signed_int
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map(|items| AnnotationLit::Ints(items.into_iter().map(|(n, _)| n).collect()))
        .or(signed_int.clone().map(|(n, _)| AnnotationLit::Int(n)))
        .or(select! { Token::StringLit(s) => AnnotationLit::Str(s) });

    let annotation = just(Token::At)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(annotation_lit)
        .map_with(|(key, value), e| Annotation {
            key,
            value,
            span: e.span(),
        });

    // ── Loops ──

    let loop_stmt = recursive(|loop_stmt| {
        let item = choice((
            just(Token::Alloc)
                .ignore_then(buffer_body.clone())
                .map(LoopItem::Alloc),
            block_decl.clone().map(LoopItem::Block),
            reduction_decl.clone().map(LoopItem::Reduction),
            loop_stmt.map(LoopItem::Loop),
        ));

        just(Token::For)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::In))
            .then(signed_int.clone())
            .then_ignore(just(Token::DotDot))
            .then(signed_int.clone())
            .then(annotation.repeated().collect::<Vec<_>>())
            .then(
                item.repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|((((var, min), max), annotations), body), e| LoopStmt {
                var,
                min,
                max,
                annotations,
                body,
                span: e.span(),
            })
    });

    // ── Program ──

    let item = just(Token::Buffer)
        .ignore_then(buffer_body)
        .map(Item::Buffer)
        .or(loop_stmt.map(Item::Loop));

    item.repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| Program {
            items,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.program.expect("expected program")
    }

    fn only_loop(prog: &Program) -> &LoopStmt {
        let loops: Vec<&LoopStmt> = prog
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Loop(l) => Some(l),
                Item::Buffer(_) => None,
            })
            .collect();
        assert_eq!(loops.len(), 1, "expected exactly one loop");
        loops[0]
    }

    #[test]
    fn empty_program() {
        let prog = parse_ok("");
        assert!(prog.items.is_empty());
    }

    #[test]
    fn buffer_declaration() {
        let prog = parse_ok("buffer A: f32[16, 8];");
        let Item::Buffer(decl) = &prog.items[0] else {
            panic!("expected buffer")
        };
        assert_eq!(decl.name.name, "A");
        assert_eq!(decl.dtype.name, "f32");
        let dims: Vec<i64> = decl.shape.iter().map(|(d, _)| *d).collect();
        assert_eq!(dims, vec![16, 8]);
    }

    #[test]
    fn unknown_dtype_rejected() {
        let result = parse("buffer A: float[4];");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn loop_with_annotations() {
        let prog = parse_ok(
            "for i in 0..16 @software_pipeline_stage = [0, 1] @software_pipeline_order = [1, 0] {\n\
             block a { } block b { }\n\
             }",
        );
        let l = only_loop(&prog);
        assert_eq!(l.var.name, "i");
        assert_eq!(l.min.0, 0);
        assert_eq!(l.max.0, 16);
        assert_eq!(l.annotations.len(), 2);
        assert_eq!(l.annotations[0].key.name, "software_pipeline_stage");
        assert_eq!(l.annotations[0].value, AnnotationLit::Ints(vec![0, 1]));
        assert_eq!(l.annotations[1].value, AnnotationLit::Ints(vec![1, 0]));
        assert_eq!(l.body.len(), 2);
    }

    #[test]
    fn scalar_and_string_annotations() {
        let prog = parse_ok("for i in 0..4 @software_pipeline_block_count = 3 @note = \"x\" { }");
        let l = only_loop(&prog);
        assert_eq!(l.annotations[0].value, AnnotationLit::Int(3));
        assert_eq!(l.annotations[1].value, AnnotationLit::Str("x".to_string()));
    }

    #[test]
    fn block_with_init_and_grid() {
        let prog = parse_ok(
            "for i in 0..4 {\n\
               alloc S: i32[8];\n\
               block acc {\n\
                 init { S[0] = 0; }\n\
                 for k in 0..8 { S[k] = S[k] + A[i, k] * 2; }\n\
               }\n\
             }",
        );
        let l = only_loop(&prog);
        assert!(matches!(&l.body[0], LoopItem::Alloc(decl) if decl.name.name == "S"));
        let LoopItem::Block(block) = &l.body[1] else {
            panic!("expected block")
        };
        assert_eq!(block.name.name, "acc");
        assert_eq!(block.init.as_ref().map(Vec::len), Some(1));
        assert_eq!(block.body.len(), 1);
        let Op::Grid { var, min, max, body, .. } = &block.body[0] else {
            panic!("expected grid")
        };
        assert_eq!(var.name, "k");
        assert_eq!((*min, *max), (0, 8));
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn expression_precedence() {
        let prog = parse_ok("for i in 0..1 { block b { X[0] = 1 + 2 * 3; } }");
        let l = only_loop(&prog);
        let LoopItem::Block(block) = &l.body[0] else {
            panic!("expected block")
        };
        let Op::Store { value, .. } = &block.body[0] else {
            panic!("expected store")
        };
        let Expr::Binary { op, rhs, .. } = value else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn negative_literals_and_subtraction() {
        let prog = parse_ok("for i in -2..2 { block b { X[i - 1] = -3; } }");
        let l = only_loop(&prog);
        assert_eq!(l.min.0, -2);
        let LoopItem::Block(block) = &l.body[0] else {
            panic!("expected block")
        };
        let Op::Store { target, value, .. } = &block.body[0] else {
            panic!("expected store")
        };
        assert!(matches!(
            target.indices[0],
            Expr::Binary { op: BinOp::Sub, .. }
        ));
        assert!(matches!(value, Expr::Neg(..)));
    }

    #[test]
    fn reduction_pair() {
        let prog = parse_ok(
            "for i in 0..4 {\n\
               reduction mm { init { C[i] = 0; } update { C[i] = C[i] + 1; } }\n\
             }",
        );
        let l = only_loop(&prog);
        let LoopItem::Reduction(red) = &l.body[0] else {
            panic!("expected reduction")
        };
        assert_eq!(red.name.name, "mm");
        assert_eq!(red.init.len(), 1);
        assert_eq!(red.update.len(), 1);
    }

    #[test]
    fn nested_loops_and_if() {
        let prog = parse_ok(
            "for j in 0..2 { for i in 0..4 { block b { if (M[i]) { X[i] = 1; } } } }",
        );
        let outer = only_loop(&prog);
        let LoopItem::Loop(inner) = &outer.body[0] else {
            panic!("expected nested loop")
        };
        let LoopItem::Block(block) = &inner.body[0] else {
            panic!("expected block")
        };
        assert!(matches!(block.body[0], Op::If { .. }));
    }

    #[test]
    fn missing_semicolon_is_error() {
        let result = parse("for i in 0..4 { block b { X[i] = 1 } }");
        assert!(!result.errors.is_empty());
    }
}
