use sqlparser::dialect::MySqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::ParseError;

/// One entry of a select list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    /// Expression text with whitespace removed, e.g. `@@session.sql_mode`
    pub expr: String,
    pub alias: Option<String>,
}

impl SelectItem {
    /// Column label: the alias, or the expression itself
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.expr)
    }
}

/// Split the select list of `sql` into expressions and aliases.
///
/// Works on tokens rather than the AST so that MySQL-only expressions such
/// as `@@session.tx_isolation` survive. The list ends at the first
/// top-level `FROM`, `WHERE`, `GROUP`, `ORDER` or `LIMIT`.
pub fn parse_select_variables(sql: &str) -> Result<Vec<SelectItem>, ParseError> {
    let dialect = MySqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| ParseError::Sql(e.to_string()))?;

    let mut iter = tokens
        .into_iter()
        .skip_while(|t| matches!(t, Token::Whitespace(_)));
    match iter.next() {
        Some(Token::Word(w)) if w.keyword == Keyword::SELECT => {}
        _ => return Err(ParseError::NotSelect),
    }

    let mut items = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0usize;

    for token in iter {
        match &token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                items.push(build_item(std::mem::take(&mut current))?);
                continue;
            }
            Token::Word(w)
                if depth == 0
                    && matches!(
                        w.keyword,
                        Keyword::FROM | Keyword::WHERE | Keyword::GROUP | Keyword::ORDER | Keyword::LIMIT
                    ) =>
            {
                break;
            }
            Token::SemiColon if depth == 0 => break,
            _ => {}
        }
        current.push(token);
    }

    if current.iter().any(|t| !matches!(t, Token::Whitespace(_))) {
        items.push(build_item(current)?);
    }

    if items.is_empty() {
        return Err(ParseError::EmptyStatement);
    }
    Ok(items)
}

fn build_item(tokens: Vec<Token>) -> Result<SelectItem, ParseError> {
    // Trim surrounding whitespace
    let start = tokens
        .iter()
        .position(|t| !matches!(t, Token::Whitespace(_)))
        .ok_or(ParseError::EmptyStatement)?;
    let end = tokens
        .iter()
        .rposition(|t| !matches!(t, Token::Whitespace(_)))
        .unwrap_or(start);
    let tokens = &tokens[start..=end];

    // Explicit `expr AS alias`
    if let Some(pos) = tokens
        .iter()
        .position(|t| matches!(t, Token::Word(w) if w.keyword == Keyword::AS))
    {
        let alias = render(&tokens[pos + 1..], true);
        return Ok(SelectItem {
            expr: render(&tokens[..pos], false),
            alias: Some(alias).filter(|a| !a.is_empty()),
        });
    }

    // Implicit `expr alias`: a trailing word or string after whitespace
    if tokens.len() >= 3 {
        let last = &tokens[tokens.len() - 1];
        let before = &tokens[tokens.len() - 2];
        let is_label = matches!(last, Token::Word(_) | Token::SingleQuotedString(_));
        if is_label && matches!(before, Token::Whitespace(_)) {
            return Ok(SelectItem {
                expr: render(&tokens[..tokens.len() - 2], false),
                alias: Some(render(std::slice::from_ref(last), true)),
            });
        }
    }

    Ok(SelectItem {
        expr: render(tokens, false),
        alias: None,
    })
}

fn render(tokens: &[Token], unquote: bool) -> String {
    tokens
        .iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .map(|t| match t {
            Token::Word(w) if unquote || w.quote_style.is_none() => w.value.clone(),
            Token::SingleQuotedString(s) | Token::DoubleQuotedString(s) if unquote => s.clone(),
            other => other.to_string(),
        })
        .collect()
}
