//! Recursive descent parser for entity and registry artifacts.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// Parser over one artifact's text.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
        }
    }

    /// Parse an entity artifact.
    pub fn parse_entity_file(&mut self) -> Result<EntityFile, ParseError> {
        let namespace = self.parse_namespace()?;
        let model = self.parse_model()?;
        self.expect_eof()?;
        Ok(EntityFile { namespace, model })
    }

    /// Parse a registry artifact.
    pub fn parse_registry_file(&mut self) -> Result<RegistryFile, ParseError> {
        let namespace = self.parse_namespace()?;

        let mut imports = Vec::new();
        while self.peek_is(&Token::Use) {
            let start = self.next_token()?.span;
            let path = self.parse_path()?;
            let end = self.expect_token(Token::Semicolon)?;
            imports.push(Spanned::new(path.value, start.merge(end.span)));
        }

        let registry = self.parse_registry()?;
        self.expect_eof()?;
        Ok(RegistryFile {
            namespace,
            imports,
            registry,
        })
    }

    fn parse_namespace(&mut self) -> Result<Option<Spanned<String>>, ParseError> {
        if !self.peek_is(&Token::Namespace) {
            return Ok(None);
        }
        let start = self.next_token()?.span;
        let path = self.parse_path()?;
        let end = self.expect_token(Token::Semicolon)?;
        Ok(Some(Spanned::new(path.value, start.merge(end.span))))
    }

    /// Parse a dotted path such as `Acme.Content.Models`.
    fn parse_path(&mut self) -> Result<Spanned<String>, ParseError> {
        let first = self.expect_ident()?;
        let mut path = first.value;
        let mut span = first.span;
        while self.peek_is(&Token::Dot) {
            self.next_token()?;
            let segment = self.expect_ident()?;
            path.push('.');
            path.push_str(&segment.value);
            span = span.merge(segment.span);
        }
        Ok(Spanned::new(path, span))
    }

    fn parse_model(&mut self) -> Result<ModelDecl, ParseError> {
        let start = self.expect_token(Token::Model).map_err(|e| {
            e.with_hint("an entity artifact declares exactly one `model Name { ... }`")
        })?;
        let name = self.expect_ident()?;
        let open = self.expect_token(Token::LBrace)?;

        let mut members = Vec::new();
        loop {
            if self.peek_is(&Token::RBrace) {
                break;
            }
            members.push(self.parse_member()?);
        }
        let close = self.expect_token(Token::RBrace)?;

        Ok(ModelDecl {
            name,
            members,
            body: Block {
                open: open.span,
                close: close.span,
            },
            span: start.span.merge(close.span),
        })
    }

    fn parse_member(&mut self) -> Result<MemberDecl, ParseError> {
        let name = self.expect_ident()?;
        self.expect_token(Token::Colon).map_err(|e| {
            e.with_hint("members are written as `Name: Type;`")
        })?;
        let ty = self.parse_type()?;

        let optional = if self.peek_is(&Token::Question) {
            self.next_token()?;
            true
        } else {
            false
        };

        let empty_init = if self.peek_is(&Token::Assign) {
            self.next_token()?;
            self.expect_token(Token::LBracket)?;
            self.expect_token(Token::RBracket)?;
            true
        } else {
            false
        };

        let mut annotations = Vec::new();
        while self.peek_is(&Token::At) {
            annotations.push(self.parse_annotation()?);
        }

        let end = self.expect_token(Token::Semicolon)?;
        let span = name.span.merge(end.span);
        Ok(MemberDecl {
            name,
            ty,
            optional,
            empty_init,
            annotations,
            span,
        })
    }

    fn parse_type(&mut self) -> Result<TypeRef, ParseError> {
        if self.peek_is(&Token::Collection) {
            self.next_token()?;
            self.expect_token(Token::Lt)?;
            let element = self.expect_ident()?;
            self.expect_token(Token::Gt)?;
            return Ok(TypeRef::Collection(element.value));
        }
        Ok(TypeRef::Named(self.expect_ident()?.value))
    }

    fn parse_annotation(&mut self) -> Result<Annotation, ParseError> {
        self.expect_token(Token::At)?;
        let name = self.expect_ident()?;
        match name.value.as_str() {
            "key" => Ok(Annotation::Key),
            "audit" => Ok(Annotation::Audit),
            "relation" => {
                let arg = self.parse_annotation_arg()?;
                let kind = RelationKind::from_name(&arg.value).ok_or_else(|| {
                    ParseError::new(format!("unknown relation kind '{}'", arg.value), arg.span)
                        .with_hint("expected OneToOne, OneToMany, ManyToOne or ManyToMany")
                })?;
                Ok(Annotation::Relation(kind))
            }
            "foreign_key" => {
                let arg = self.parse_annotation_arg()?;
                Ok(Annotation::ForeignKey(arg.value))
            }
            other => Err(ParseError::new(
                format!("unknown annotation '@{}'", other),
                name.span,
            )
            .with_hint("expected @key, @audit, @relation(Kind) or @foreign_key(Model)")),
        }
    }

    fn parse_annotation_arg(&mut self) -> Result<Spanned<String>, ParseError> {
        self.expect_token(Token::LParen)?;
        let arg = self.expect_ident()?;
        self.expect_token(Token::RParen)?;
        Ok(arg)
    }

    fn parse_registry(&mut self) -> Result<RegistryDecl, ParseError> {
        let start = self.expect_token(Token::Registry).map_err(|e| {
            e.with_hint("a registry artifact declares exactly one `registry Name { ... }`")
        })?;
        let name = self.expect_ident()?;
        let open = self.expect_token(Token::LBrace)?;

        let mut sets = Vec::new();
        let mut configure: Option<ConfigureBlock> = None;
        loop {
            let tok = self.peek_token()?;
            match tok.token {
                Token::RBrace => break,
                Token::Set => sets.push(self.parse_set()?),
                Token::Configure => {
                    let block = self.parse_configure()?;
                    if configure.is_some() {
                        return Err(ParseError::new(
                            "registry declares more than one configure block",
                            block.span,
                        ));
                    }
                    configure = Some(block);
                }
                other => {
                    return Err(ParseError::new(
                        format!("expected 'set' or 'configure', found {}", other.describe()),
                        tok.span,
                    ))
                }
            }
        }
        let close = self.expect_token(Token::RBrace)?;

        Ok(RegistryDecl {
            name,
            sets,
            configure,
            body: Block {
                open: open.span,
                close: close.span,
            },
            span: start.span.merge(close.span),
        })
    }

    fn parse_set(&mut self) -> Result<SetDecl, ParseError> {
        let start = self.expect_token(Token::Set)?;
        let name = self.expect_ident()?;
        self.expect_token(Token::Colon)?;
        let model = self.expect_ident()?;
        let end = self.expect_token(Token::Semicolon)?;
        Ok(SetDecl {
            name,
            model,
            span: start.span.merge(end.span),
        })
    }

    fn parse_configure(&mut self) -> Result<ConfigureBlock, ParseError> {
        let start = self.expect_token(Token::Configure)?;
        let open = self.expect_token(Token::LBrace)?;

        let mut statements = Vec::new();
        loop {
            let tok = self.peek_token()?;
            match tok.token {
                Token::RBrace => break,
                Token::Finalize => {
                    let begin = self.next_token()?.span;
                    let end = self.expect_token(Token::Semicolon)?;
                    statements.push(ConfigStatement::Finalize(begin.merge(end.span)));
                }
                _ => statements.push(ConfigStatement::Relation(self.parse_relation_config()?)),
            }
        }
        let close = self.expect_token(Token::RBrace)?;

        Ok(ConfigureBlock {
            statements,
            body: Block {
                open: open.span,
                close: close.span,
            },
            span: start.span.merge(close.span),
        })
    }

    /// Parse `Source.hasX<Target>(nav).withY(inverse).link;`.
    fn parse_relation_config(&mut self) -> Result<RelationConfig, ParseError> {
        let source = self.expect_ident()?;
        self.expect_token(Token::Dot)?;

        let has = self.expect_ident()?;
        let has_many = match has.value.as_str() {
            "hasOne" => false,
            "hasMany" => true,
            other => {
                return Err(ParseError::new(
                    format!("expected 'hasOne' or 'hasMany', found '{}'", other),
                    has.span,
                ))
            }
        };
        self.expect_token(Token::Lt)?;
        let target = self.expect_ident()?;
        self.expect_token(Token::Gt)?;
        let navigation = self.parse_call_arg()?;

        self.expect_token(Token::Dot)?;
        let with = self.expect_ident()?;
        let with_many = match with.value.as_str() {
            "withOne" => false,
            "withMany" => true,
            other => {
                return Err(ParseError::new(
                    format!("expected 'withOne' or 'withMany', found '{}'", other),
                    with.span,
                ))
            }
        };
        let inverse = self.parse_call_arg()?;

        let kind = match (has_many, with_many) {
            (false, false) => RelationKind::OneToOne,
            (true, false) => RelationKind::OneToMany,
            (false, true) => RelationKind::ManyToOne,
            (true, true) => RelationKind::ManyToMany,
        };

        self.expect_token(Token::Dot)?;
        let link_call = self.expect_ident()?;
        let link = match (link_call.value.as_str(), kind) {
            ("usingTable", RelationKind::ManyToMany) => {
                RelationLink::JoinTable(self.parse_call_arg()?.value)
            }
            ("hasForeignKey", kind) if kind != RelationKind::ManyToMany => {
                self.expect_token(Token::Lt)?;
                let owner = self.expect_ident()?;
                self.expect_token(Token::Gt)?;
                let property = self.parse_call_arg()?;
                RelationLink::ForeignKey {
                    owner: owner.value,
                    property: property.value,
                }
            }
            (other, kind) => {
                let expected = if kind == RelationKind::ManyToMany {
                    "usingTable"
                } else {
                    "hasForeignKey"
                };
                return Err(ParseError::new(
                    format!("expected '{}' for a {} relation, found '{}'", expected, kind, other),
                    link_call.span,
                ));
            }
        };

        let end = self.expect_token(Token::Semicolon)?;
        Ok(RelationConfig {
            source: source.value,
            target: target.value,
            kind,
            navigation: navigation.value,
            inverse: inverse.value,
            link,
            span: source.span.merge(end.span),
        })
    }

    fn parse_call_arg(&mut self) -> Result<Spanned<String>, ParseError> {
        self.expect_token(Token::LParen)?;
        let arg = self.expect_ident()?;
        self.expect_token(Token::RParen)?;
        Ok(arg)
    }

    // Helper methods

    fn peek_is(&mut self, expected: &Token) -> bool {
        self.lexer
            .peek()
            .map(|t| std::mem::discriminant(&t.token) == std::mem::discriminant(expected))
            .unwrap_or(false)
    }

    fn peek_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.peek() {
            Some(tok) => Ok(tok.clone()),
            None => Err(self.end_of_input()),
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => Ok(tok),
            None => Err(self.end_of_input()),
        }
    }

    fn end_of_input(&self) -> ParseError {
        match self.lexer.error() {
            Some(span) => ParseError::new("unrecognized input", span),
            None => {
                let end = self.lexer.source_len();
                ParseError::new("unexpected end of input", Span::new(end, end))
            }
        }
    }

    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.token.describe()
                ),
                tok.span,
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(Spanned::new(name, tok.span)),
            other => Err(ParseError::new(
                format!("expected identifier, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        if let Some(tok) = self.lexer.peek() {
            return Err(ParseError::new(
                format!("unexpected {} after declaration", tok.token.describe()),
                tok.span,
            ));
        }
        match self.lexer.error() {
            Some(span) => Err(ParseError::new("unrecognized input", span)),
            None => Ok(()),
        }
    }
}

/// Parse an entity artifact.
pub fn parse_entity(source: &str) -> Result<EntityFile, ParseError> {
    Parser::new(source).parse_entity_file()
}

/// Parse a registry artifact.
pub fn parse_registry(source: &str) -> Result<RegistryFile, ParseError> {
    Parser::new(source).parse_registry_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = "\
// generated
namespace Acme.Models;

model Order {
    Id: Guid @key;
    Title: String;
    Note: String?;
    Customer: Customer? @relation(OneToOne);
    CustomerId: Guid? @foreign_key(Customer);
    Lines: Collection<OrderLine> = [] @relation(OneToMany);
}
";

    const REGISTRY: &str = "\
namespace Acme.Data;

use Acme.Models;

registry ContentRegistry {
    set Orders: Order;
    set Customers: Customer;

    configure {
        Order.hasOne<Customer>(Customer).withOne(Order).hasForeignKey<Order>(CustomerId);
        Post.hasMany<Tag>(Tags).withMany(Posts).usingTable(PostTags);
        finalize;
    }
}
";

    #[test]
    fn test_parse_entity() {
        let file = parse_entity(ORDER).unwrap();
        assert_eq!(file.namespace.unwrap().value, "Acme.Models");
        assert_eq!(file.model.name.value, "Order");
        assert_eq!(file.model.members.len(), 6);

        let id = &file.model.members[0];
        assert!(id.is_key());
        assert_eq!(id.ty, TypeRef::Named("Guid".into()));

        let note = file.model.member("Note").unwrap();
        assert!(note.optional);

        let customer = file.model.member("Customer").unwrap();
        assert_eq!(customer.relation(), Some(RelationKind::OneToOne));

        let fk = file.model.member("CustomerId").unwrap();
        assert_eq!(fk.foreign_key_of(), Some("Customer"));

        let lines = file.model.member("Lines").unwrap();
        assert_eq!(lines.ty, TypeRef::Collection("OrderLine".into()));
        assert!(lines.empty_init);
    }

    #[test]
    fn test_member_spans_cover_statement() {
        let file = parse_entity(ORDER).unwrap();
        let title = file.model.member("Title").unwrap();
        assert_eq!(title.span.slice(ORDER), "Title: String;");
        assert_eq!(file.model.body.close.slice(ORDER), "}");
    }

    #[test]
    fn test_member_display_matches_source() {
        let file = parse_entity(ORDER).unwrap();
        for member in &file.model.members {
            assert_eq!(member.to_string(), member.span.slice(ORDER));
        }
    }

    #[test]
    fn test_parse_entity_without_namespace() {
        let file = parse_entity("model Tag {}").unwrap();
        assert!(file.namespace.is_none());
        assert!(file.model.members.is_empty());
    }

    #[test]
    fn test_parse_registry() {
        let file = parse_registry(REGISTRY).unwrap();
        assert_eq!(file.namespace.as_ref().unwrap().value, "Acme.Data");
        assert!(file.imports_namespace("Acme.Models"));

        let registry = file.registry;
        assert_eq!(registry.name.value, "ContentRegistry");
        assert_eq!(registry.sets.len(), 2);
        assert_eq!(registry.set_for("Customer").unwrap().name.value, "Customers");

        let configure = registry.configure.unwrap();
        assert!(configure.is_finalized());
        let relations: Vec<_> = configure.relations().collect();
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].kind, RelationKind::OneToOne);
        assert_eq!(
            relations[0].link,
            RelationLink::ForeignKey {
                owner: "Order".into(),
                property: "CustomerId".into()
            }
        );
        assert_eq!(relations[1].kind, RelationKind::ManyToMany);
        assert_eq!(relations[1].link, RelationLink::JoinTable("PostTags".into()));
    }

    #[test]
    fn test_relation_statement_display_matches_source() {
        let file = parse_registry(REGISTRY).unwrap();
        let configure = file.registry.configure.unwrap();
        for relation in configure.relations() {
            assert_eq!(relation.to_string(), relation.span.slice(REGISTRY));
        }
    }

    #[test]
    fn test_missing_colon_has_hint() {
        let err = parse_entity("model A {\n    Title String;\n}").unwrap_err();
        assert!(err.message.contains("expected ':'"));
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_unknown_annotation() {
        let err = parse_entity("model A { Id: Guid @primary; }").unwrap_err();
        assert!(err.message.contains("@primary"));
    }

    #[test]
    fn test_mismatched_link_is_rejected() {
        let source = "registry R {\n    configure {\n        A.hasMany<B>(Bs).withMany(As).hasForeignKey<A>(BId);\n    }\n}";
        let err = parse_registry(source).unwrap_err();
        assert!(err.message.contains("usingTable"));
    }

    #[test]
    fn test_trailing_input_is_rejected() {
        let err = parse_entity("model A {}\nmodel B {}").unwrap_err();
        assert!(err.message.contains("after declaration"));
    }

    #[test]
    fn test_unrecognized_character() {
        let err = parse_entity("model A {\n    Id: Guid #;\n}").unwrap_err();
        assert_eq!(err.message, "unrecognized input");
    }
}
