use std::sync::Arc;

use crate::{
    access::AccessType,
    ast::{Node, NodeKind},
    lexer::{LexError, Lexer, Token},
};

/// A parsing failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The scanner rejected the input.
    Lex(LexError),
    /// The token stream did not match the grammar.
    Unexpected { expected: String, found: String },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Lex(err) => write!(f, "{}", err),
            ParseError::Unexpected { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> ParseError {
        ParseError::Lex(err)
    }
}

/// The parts of a `GRANT ... ACCESS TO ...` rule text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAccessRule {
    pub access_types: Vec<AccessType>,
    pub entity_name: String,
    pub alias: String,
    pub predicate: Option<Arc<Node>>,
}

/// Parse a complete SELECT statement.
pub fn parse_statement(text: &str) -> Result<Arc<Node>, ParseError> {
    Parser::new(Lexer::new(text))?.parse_statement()
}

/// Parse a bare predicate (an access-rule WHERE body, a test fragment).
pub fn parse_predicate(text: &str) -> Result<Arc<Node>, ParseError> {
    Parser::new(Lexer::new(text))?.parse_predicate()
}

/// Parse a `GRANT [CREATE] [READ] [UPDATE] [DELETE] ACCESS TO Entity alias
/// [WHERE predicate]` rule text.
pub fn parse_access_rule(text: &str) -> Result<ParsedAccessRule, ParseError> {
    Parser::new(Lexer::new(text))?.parse_access_rule()
}

/// Words that terminate an expression and therefore can never be an
/// implicit alias.
const RESERVED: [&str; 22] = [
    "select", "distinct", "from", "where", "group", "having", "order", "by", "as", "inner",
    "left", "outer", "join", "fetch", "and", "or", "not", "asc", "desc", "on", "new", "set",
];

pub struct Parser {
    lexer: Lexer,
    current: Token,
    peek: Token,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Result<Self, ParseError> {
        let current = lexer.next_token()?;
        let peek = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current,
            peek,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = std::mem::replace(&mut self.peek, self.lexer.next_token()?);
        Ok(())
    }

    fn unexpected(&self, expected: impl Into<String>) -> ParseError {
        ParseError::Unexpected {
            expected: expected.into(),
            found: format!("{:?}", self.current),
        }
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        if self.check(&token) {
            self.advance()
        } else {
            Err(self.unexpected(format!("{:?}", token)))
        }
    }

    fn accept(&mut self, token: &Token) -> Result<bool, ParseError> {
        if self.check(token) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Whether the current token is the given keyword (case-insensitive).
    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current, Token::Identifier(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek, Token::Identifier(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn accept_keyword(&mut self, keyword: &str) -> Result<bool, ParseError> {
        if self.at_keyword(keyword) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.accept_keyword(keyword)? {
            Ok(())
        } else {
            Err(self.unexpected(keyword.to_uppercase()))
        }
    }

    fn take_identifier(&mut self, expected: &str) -> Result<String, ParseError> {
        match &self.current {
            Token::Identifier(word) => {
                let word = word.clone();
                self.advance()?;
                Ok(word)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    /// `ident(.ident)*` - entity class names, constructor targets.
    fn take_qualified_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.take_identifier("a name")?;
        while self.check(&Token::Dot) {
            self.advance()?;
            name.push('.');
            name.push_str(&self.take_identifier("a name segment")?);
        }
        Ok(name)
    }

    /// Whether the current token can open an implicit alias: an identifier
    /// that is not a structural keyword.
    fn at_alias(&self) -> bool {
        matches!(&self.current, Token::Identifier(word)
            if !RESERVED.contains(&word.to_ascii_lowercase().as_str()))
    }

    // -- statements ---------------------------------------------------------

    /// Parse a complete statement and require end of input.
    pub fn parse_statement(&mut self) -> Result<Arc<Node>, ParseError> {
        let statement = self.parse_select(NodeKind::Select)?;
        self.expect(Token::Eof)?;
        Ok(statement)
    }

    /// Parse a bare predicate and require end of input.
    pub fn parse_predicate(&mut self) -> Result<Arc<Node>, ParseError> {
        let predicate = self.parse_or()?;
        self.expect(Token::Eof)?;
        Ok(predicate)
    }

    pub fn parse_access_rule(&mut self) -> Result<ParsedAccessRule, ParseError> {
        self.expect_keyword("grant")?;
        let mut access_types = Vec::new();
        loop {
            if self.accept_keyword("create")? {
                access_types.push(AccessType::Create);
            } else if self.accept_keyword("read")? {
                access_types.push(AccessType::Read);
            } else if self.accept_keyword("update")? {
                access_types.push(AccessType::Update);
            } else if self.accept_keyword("delete")? {
                access_types.push(AccessType::Delete);
            } else {
                break;
            }
        }
        self.expect_keyword("access")?;
        self.expect_keyword("to")?;
        let entity_name = self.take_qualified_name()?;
        let alias = self.take_identifier("an alias")?;
        let predicate = if self.accept_keyword("where")? {
            Some(self.parse_or()?)
        } else {
            None
        };
        self.expect(Token::Eof)?;
        Ok(ParsedAccessRule {
            access_types,
            entity_name,
            alias,
            predicate,
        })
    }

    fn parse_select(&mut self, kind: NodeKind) -> Result<Arc<Node>, ParseError> {
        let mut children = vec![self.parse_select_clause()?, self.parse_from_clause()?];
        if self.accept_keyword("where")? {
            children.push(Node::branch(NodeKind::WhereClause, vec![self.parse_or()?]));
        }
        if self.at_keyword("group") {
            children.push(self.parse_group_by()?);
        }
        if self.accept_keyword("having")? {
            children.push(Node::branch(NodeKind::HavingClause, vec![self.parse_or()?]));
        }
        if self.at_keyword("order") {
            children.push(self.parse_order_by()?);
        }
        Ok(Node::branch(kind, children))
    }

    fn parse_select_clause(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect_keyword("select")?;
        let distinct = self.accept_keyword("distinct")?;
        let mut items = vec![self.parse_select_item()?];
        while self.accept(&Token::Comma)? {
            items.push(self.parse_select_item()?);
        }
        if distinct {
            Ok(Node::branch_with_value(
                NodeKind::SelectClause,
                "distinct",
                items,
            ))
        } else {
            Ok(Node::branch(NodeKind::SelectClause, items))
        }
    }

    fn parse_select_item(&mut self) -> Result<Arc<Node>, ParseError> {
        if self.at_keyword("new") {
            self.advance()?;
            let class_name = self.take_qualified_name()?;
            self.expect(Token::LParen)?;
            let mut args = vec![self.parse_value_expression()?];
            while self.accept(&Token::Comma)? {
                args.push(self.parse_value_expression()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Node::branch_with_value(
                NodeKind::Constructor,
                class_name,
                args,
            ));
        }
        if self.at_keyword("entry") && matches!(self.peek, Token::LParen) {
            self.advance()?;
            self.expect(Token::LParen)?;
            let path = self.parse_path()?;
            self.expect(Token::RParen)?;
            return Ok(Node::branch(NodeKind::MapEntry, vec![path]));
        }
        self.parse_value_expression()
    }

    fn parse_from_clause(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect_keyword("from")?;
        let mut children = Vec::new();
        loop {
            children.push(self.parse_range_declaration()?);
            while self.at_keyword("inner") || self.at_keyword("left") || self.at_keyword("join") {
                children.push(self.parse_join()?);
            }
            if !self.accept(&Token::Comma)? {
                break;
            }
        }
        Ok(Node::branch(NodeKind::FromClause, children))
    }

    fn parse_range_declaration(&mut self) -> Result<Arc<Node>, ParseError> {
        let entity = self.take_qualified_name()?;
        let mut children = vec![Node::leaf(NodeKind::EntityName, entity)];
        let _ = self.accept_keyword("as")?;
        if self.at_alias() {
            let alias = self.take_identifier("an alias")?;
            children.push(Node::leaf(NodeKind::Alias, alias));
        }
        Ok(Node::branch(NodeKind::RangeDeclaration, children))
    }

    fn parse_join(&mut self) -> Result<Arc<Node>, ParseError> {
        let outer = if self.accept_keyword("left")? {
            let _ = self.accept_keyword("outer")?;
            true
        } else {
            let _ = self.accept_keyword("inner")?;
            false
        };
        self.expect_keyword("join")?;
        let fetch = self.accept_keyword("fetch")?;
        let kind = match (outer, fetch) {
            (false, false) => NodeKind::InnerJoin,
            (false, true) => NodeKind::InnerFetchJoin,
            (true, false) => NodeKind::OuterJoin,
            (true, true) => NodeKind::OuterFetchJoin,
        };
        let path = self.parse_path()?;
        let mut children = vec![path];
        let _ = self.accept_keyword("as")?;
        if self.at_alias() {
            let alias = self.take_identifier("an alias")?;
            children.push(Node::leaf(NodeKind::Alias, alias));
        }
        Ok(Node::branch(kind, children))
    }

    fn parse_group_by(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect_keyword("group")?;
        self.expect_keyword("by")?;
        let mut paths = vec![self.parse_value_expression()?];
        while self.accept(&Token::Comma)? {
            paths.push(self.parse_value_expression()?);
        }
        Ok(Node::branch(NodeKind::GroupByClause, paths))
    }

    fn parse_order_by(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect_keyword("order")?;
        self.expect_keyword("by")?;
        let mut items = vec![self.parse_order_by_item()?];
        while self.accept(&Token::Comma)? {
            items.push(self.parse_order_by_item()?);
        }
        Ok(Node::branch(NodeKind::OrderByClause, items))
    }

    fn parse_order_by_item(&mut self) -> Result<Arc<Node>, ParseError> {
        let path = self.parse_value_expression()?;
        let direction = if self.accept_keyword("desc")? {
            "desc"
        } else {
            let _ = self.accept_keyword("asc")?;
            "asc"
        };
        Ok(Node::branch_with_value(
            NodeKind::OrderByItem,
            direction,
            vec![path],
        ))
    }

    // -- predicates ---------------------------------------------------------

    fn parse_or(&mut self) -> Result<Arc<Node>, ParseError> {
        // A hint comment binds to the whole predicate that follows it.
        if let Token::Hint(name) = &self.current {
            let hint = Node::leaf(NodeKind::Hint, name.clone());
            self.advance()?;
            let inner = self.parse_or()?;
            return Ok(Node::branch(NodeKind::Hinted, vec![hint, inner]));
        }

        let mut left = self.parse_and()?;
        while self.accept_keyword("or")? {
            let right = self.parse_and()?;
            left = Node::branch(NodeKind::Or, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Arc<Node>, ParseError> {
        let mut left = self.parse_not()?;
        while self.accept_keyword("and")? {
            let right = self.parse_not()?;
            left = Node::branch(NodeKind::And, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Arc<Node>, ParseError> {
        if self.at_keyword("not") {
            self.advance()?;
            let operand = self.parse_not()?;
            return Ok(Node::branch(NodeKind::Not, vec![operand]));
        }
        self.parse_condition()
    }

    fn parse_condition(&mut self) -> Result<Arc<Node>, ParseError> {
        if self.at_keyword("exists") {
            self.advance()?;
            self.expect(Token::LParen)?;
            self.require_keyword("select")?;
            let subselect = self.parse_select(NodeKind::Subselect)?;
            self.expect(Token::RParen)?;
            return Ok(Node::branch(NodeKind::Exists, vec![subselect]));
        }

        let left = self.parse_value_expression()?;
        self.parse_condition_rest(left)
    }

    /// Check that the current token is a keyword without consuming it.
    fn require_keyword(&self, keyword: &str) -> Result<(), ParseError> {
        if self.at_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword.to_uppercase()))
        }
    }

    fn parse_condition_rest(&mut self, left: Arc<Node>) -> Result<Arc<Node>, ParseError> {
        let comparison = match &self.current {
            Token::Equals => Some(NodeKind::Equals),
            Token::NotEquals => Some(NodeKind::NotEquals),
            Token::Less => Some(NodeKind::LessThan),
            Token::LessEquals => Some(NodeKind::LessEquals),
            Token::Greater => Some(NodeKind::GreaterThan),
            Token::GreaterEquals => Some(NodeKind::GreaterEquals),
            _ => None,
        };
        if let Some(kind) = comparison {
            self.advance()?;
            let right = self.parse_value_expression()?;
            return Ok(Node::branch(kind, vec![left, right]));
        }

        // `x NOT BETWEEN/LIKE/IN/MEMBER ...`
        let negated = if self.at_keyword("not") {
            self.advance()?;
            true
        } else {
            false
        };

        if self.accept_keyword("between")? {
            let low = self.parse_value_expression()?;
            self.expect_keyword("and")?;
            let high = self.parse_value_expression()?;
            let node = Node::branch(NodeKind::Between, vec![left, low, high]);
            return Ok(negate_if(negated, node));
        }
        if self.accept_keyword("like")? {
            let pattern = self.parse_value_expression()?;
            let mut children = vec![left, pattern];
            if self.accept_keyword("escape")? {
                children.push(self.parse_value_expression()?);
            }
            let node = Node::branch(NodeKind::Like, children);
            return Ok(negate_if(negated, node));
        }
        if self.accept_keyword("in")? {
            self.expect(Token::LParen)?;
            let mut children = vec![left];
            if self.at_keyword("select") {
                children.push(self.parse_select(NodeKind::Subselect)?);
            } else {
                children.push(self.parse_value_expression()?);
                while self.accept(&Token::Comma)? {
                    children.push(self.parse_value_expression()?);
                }
            }
            self.expect(Token::RParen)?;
            let node = Node::branch(NodeKind::In, children);
            return Ok(negate_if(negated, node));
        }
        if self.accept_keyword("member")? {
            let _ = self.accept_keyword("of")?;
            let collection = self.parse_value_expression()?;
            let kind = if negated {
                NodeKind::NotMemberOf
            } else {
                NodeKind::MemberOf
            };
            return Ok(Node::branch(kind, vec![left, collection]));
        }
        if negated {
            return Err(self.unexpected("BETWEEN, LIKE, IN or MEMBER after NOT"));
        }

        if self.accept_keyword("is")? {
            let negated = self.accept_keyword("not")?;
            if self.accept_keyword("null")? {
                let kind = if negated {
                    NodeKind::IsNotNull
                } else {
                    NodeKind::IsNull
                };
                return Ok(Node::branch(kind, vec![left]));
            }
            if self.accept_keyword("empty")? {
                let kind = if negated {
                    NodeKind::IsNotEmpty
                } else {
                    NodeKind::IsEmpty
                };
                return Ok(Node::branch(kind, vec![left]));
            }
            return Err(self.unexpected("NULL or EMPTY after IS"));
        }

        // A bare expression in predicate position (boolean literal or
        // boolean-valued path).
        Ok(left)
    }

    // -- value expressions --------------------------------------------------

    fn parse_value_expression(&mut self) -> Result<Arc<Node>, ParseError> {
        self.parse_additive()
    }

    fn parse_additive(&mut self) -> Result<Arc<Node>, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let kind = match &self.current {
                Token::Plus => NodeKind::Add,
                Token::Minus => NodeKind::Subtract,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Node::branch(kind, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Arc<Node>, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let kind = match &self.current {
                Token::Star => NodeKind::Multiply,
                Token::Slash => NodeKind::Divide,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Node::branch(kind, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Arc<Node>, ParseError> {
        if self.accept(&Token::Minus)? {
            let operand = self.parse_unary()?;
            return Ok(Node::branch(NodeKind::Negate, vec![operand]));
        }
        let _ = self.accept(&Token::Plus)?;
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Arc<Node>, ParseError> {
        match &self.current {
            Token::Integer(spelling) => {
                let node = Node::leaf(NodeKind::IntegerLiteral, spelling.clone());
                self.advance()?;
                Ok(node)
            }
            Token::Decimal(spelling) => {
                let node = Node::leaf(NodeKind::DecimalLiteral, spelling.clone());
                self.advance()?;
                Ok(node)
            }
            Token::String(content) => {
                let node = Node::leaf(NodeKind::StringLiteral, content.clone());
                self.advance()?;
                Ok(node)
            }
            Token::NamedParameter(name) => {
                let node = Node::leaf(NodeKind::NamedParameter, name.clone());
                self.advance()?;
                Ok(node)
            }
            Token::PositionalParameter(position) => {
                let node = Node::leaf(NodeKind::PositionalParameter, position.clone());
                self.advance()?;
                Ok(node)
            }
            Token::LParen => {
                self.advance()?;
                if self.at_keyword("select") {
                    let subselect = self.parse_select(NodeKind::Subselect)?;
                    self.expect(Token::RParen)?;
                    return Ok(subselect);
                }
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(Node::branch(NodeKind::Grouping, vec![inner]))
            }
            Token::Identifier(_) => self.parse_word_primary(),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Primaries that start with a word: literals, functions, CASE forms,
    /// KEY/VALUE projections and plain paths.
    fn parse_word_primary(&mut self) -> Result<Arc<Node>, ParseError> {
        if self.at_keyword("true") || self.at_keyword("false") {
            let spelling = if self.at_keyword("true") { "true" } else { "false" };
            self.advance()?;
            return Ok(Node::leaf(NodeKind::BooleanLiteral, spelling));
        }
        if self.accept_keyword("null")? {
            return Ok(Node::bare_leaf(NodeKind::NullLiteral));
        }
        if self.at_keyword("case") {
            return self.parse_case();
        }

        // Function call forms require an opening parenthesis; a word
        // without one is a path even when it spells a function name.
        if matches!(self.peek, Token::LParen) {
            if self.at_keyword("coalesce") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Coalesce, 1, usize::MAX);
            }
            if self.at_keyword("nullif") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Nullif, 2, 2);
            }
            if self.at_keyword("concat") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Concat, 2, usize::MAX);
            }
            if self.at_keyword("substring") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Substring, 2, 3);
            }
            if self.at_keyword("upper") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Upper, 1, 1);
            }
            if self.at_keyword("lower") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Lower, 1, 1);
            }
            if self.at_keyword("length") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Length, 1, 1);
            }
            if self.at_keyword("locate") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Locate, 2, 3);
            }
            if self.at_keyword("trim") {
                self.advance()?;
                return self.parse_trim();
            }
            if self.at_keyword("count") {
                self.advance()?;
                return self.parse_count();
            }
            if self.at_keyword("sum") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Sum, 1, 1);
            }
            if self.at_keyword("avg") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Avg, 1, 1);
            }
            if self.at_keyword("min") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Min, 1, 1);
            }
            if self.at_keyword("max") {
                self.advance()?;
                return self.parse_argument_list(NodeKind::Max, 1, 1);
            }
            if self.at_keyword("key") || self.at_keyword("value") {
                return self.parse_map_projection();
            }
        }

        self.parse_path()
    }

    fn parse_argument_list(
        &mut self,
        kind: NodeKind,
        min: usize,
        max: usize,
    ) -> Result<Arc<Node>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = vec![self.parse_value_expression()?];
        while self.accept(&Token::Comma)? {
            args.push(self.parse_value_expression()?);
        }
        self.expect(Token::RParen)?;
        if args.len() < min || args.len() > max {
            return Err(self.unexpected(format!("{} arguments for {:?}", min, kind)));
        }
        Ok(Node::branch(kind, args))
    }

    fn parse_trim(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect(Token::LParen)?;
        let mode = if self.accept_keyword("leading")? {
            Some("leading")
        } else if self.accept_keyword("trailing")? {
            Some("trailing")
        } else if self.accept_keyword("both")? {
            Some("both")
        } else {
            None
        };

        let mut children = Vec::new();
        if let Token::String(_) = &self.current {
            if self.peek_keyword("from") {
                children.push(self.parse_primary()?);
                self.expect_keyword("from")?;
            }
        } else if mode.is_some() {
            self.expect_keyword("from")?;
        }
        children.push(self.parse_value_expression()?);
        self.expect(Token::RParen)?;

        match mode {
            Some(mode) => Ok(Node::branch_with_value(NodeKind::Trim, mode, children)),
            None => Ok(Node::branch(NodeKind::Trim, children)),
        }
    }

    fn parse_count(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect(Token::LParen)?;
        let distinct = self.accept_keyword("distinct")?;
        let operand = self.parse_value_expression()?;
        self.expect(Token::RParen)?;
        if distinct {
            Ok(Node::branch_with_value(
                NodeKind::Count,
                "distinct",
                vec![operand],
            ))
        } else {
            Ok(Node::branch(NodeKind::Count, vec![operand]))
        }
    }

    /// `KEY(path)[.segment]*` / `VALUE(path)` - encoded in the path
    /// terminal's text.
    fn parse_map_projection(&mut self) -> Result<Arc<Node>, ParseError> {
        let wrapper = if self.at_keyword("key") { "KEY" } else { "VALUE" };
        self.advance()?;
        self.expect(Token::LParen)?;
        let inner = self.take_qualified_name()?;
        self.expect(Token::RParen)?;
        let mut text = format!("{}({})", wrapper, inner);
        while self.check(&Token::Dot) {
            self.advance()?;
            text.push('.');
            text.push_str(&self.take_identifier("a path segment")?);
        }
        Ok(Node::leaf(NodeKind::Path, text))
    }

    fn parse_case(&mut self) -> Result<Arc<Node>, ParseError> {
        self.expect_keyword("case")?;
        if self.at_keyword("when") {
            // Searched case.
            let mut children = Vec::new();
            while self.accept_keyword("when")? {
                let condition = self.parse_or()?;
                self.expect_keyword("then")?;
                let result = self.parse_value_expression()?;
                children.push(Node::branch(NodeKind::When, vec![condition, result]));
            }
            children.push(self.parse_case_else()?);
            self.expect_keyword("end")?;
            return Ok(Node::branch(NodeKind::CaseWhen, children));
        }

        // Simple case.
        let operand = self.parse_value_expression()?;
        let mut children = vec![operand];
        while self.accept_keyword("when")? {
            let matched = self.parse_value_expression()?;
            self.expect_keyword("then")?;
            let result = self.parse_value_expression()?;
            children.push(Node::branch(NodeKind::SimpleWhen, vec![matched, result]));
        }
        children.push(self.parse_case_else()?);
        self.expect_keyword("end")?;
        Ok(Node::branch(NodeKind::SimpleCase, children))
    }

    fn parse_case_else(&mut self) -> Result<Arc<Node>, ParseError> {
        if self.accept_keyword("else")? {
            self.parse_value_expression()
        } else {
            Ok(Node::bare_leaf(NodeKind::NullLiteral))
        }
    }

    fn parse_path(&mut self) -> Result<Arc<Node>, ParseError> {
        let text = self.take_qualified_name()?;
        Ok(Node::leaf(NodeKind::Path, text))
    }
}

fn negate_if(negated: bool, node: Arc<Node>) -> Arc<Node> {
    if negated {
        Node::branch(NodeKind::Not, vec![node])
    } else {
        node
    }
}
