//! Lookups of single entries in the toolkit's dictionary files, either by
//! asking the toolkit (`foamDictionary -entry <key> -value <dict>`) or by
//! reading the file here.

use std::fs;
use std::path::Path;

use log::debug;

use crate::config::{Config, DictionaryBackend};
use crate::error::{Error, Result};
use crate::process::{self, ExitState, Invocation, Launcher};

/// Source of raw dictionary entry values. The value is returned as the tool
/// prints it, whitespace separated; callers decide how many tokens they
/// accept.
pub trait DictionaryQuery {
    /// Look up `entry` in `dict`. Nested entries are addressed with `/`, as
    /// in `simpleCoeffs/n`.
    fn value(&self, dict: &Path, entry: &str) -> Result<String>;

    /// Look up an entry which must consist of exactly one token.
    fn single_value(&self, dict: &Path, entry: &str) -> Result<String> {
        let raw = self.value(dict, entry)?;
        let tokens: Vec<_> = raw.split_whitespace().collect();

        match tokens.as_slice() {
            [token] => Ok(token.to_string()),
            [] => Err(Error::lookup(entry, dict, "no value")),
            _ => Err(Error::lookup(
                entry,
                dict,
                format!("expected one token, got {}", tokens.len()),
            )),
        }
    }
}

/// Return the query configured for this run, operating from `dir`.
pub fn query<'a>(config: &'a Config, dir: &'a Path) -> Box<dyn DictionaryQuery + 'a> {
    match config.dictionary_backend {
        DictionaryBackend::Toolkit => Box::new(ToolkitQuery { config, dir }),
        DictionaryBackend::Native => Box::new(NativeQuery),
    }
}

/// Asks the toolkit's dictionary utility, inside the container when one is
/// configured.
pub struct ToolkitQuery<'a> {
    pub config: &'a Config,
    pub dir: &'a Path,
}

impl<'a> DictionaryQuery for ToolkitQuery<'a> {
    fn value(&self, dict: &Path, entry: &str) -> Result<String> {
        let invocation = Invocation::new(&self.config.dictionary_tool)
            .args(["-entry", entry, "-value"])
            .arg(dict)
            .current_dir(self.dir);
        let invocation = Launcher::new(self.config).wrap(invocation);

        debug!("Querying {:?}", invocation.command_line());

        let captured = process::capture(&invocation)
            .map_err(|e| Error::lookup(entry, dict, e.to_string()))?;

        match captured.state {
            ExitState::Success => Ok(captured.stdout),
            state => Err(Error::lookup(
                entry,
                dict,
                format!("{} exited with {:?}", self.config.dictionary_tool.to_string_lossy(), state),
            )),
        }
    }
}

/// Reads the dictionary file directly. Understands comments, quoted strings,
/// sub-dictionaries, and `#` directives (which are skipped, not expanded), so
/// it answers plain entries like `numberOfSubdomains 4;` without the toolkit.
pub struct NativeQuery;

impl DictionaryQuery for NativeQuery {
    fn value(&self, dict: &Path, entry: &str) -> Result<String> {
        let text = fs::read_to_string(dict).map_err(|e| Error::lookup(entry, dict, e.to_string()))?;
        let tokens = tokenize(&text);
        let path: Vec<_> = entry.split('/').collect();

        find(&tokens, &path)
            .map(|words| words.join(" "))
            .ok_or_else(|| Error::lookup(entry, dict, "no such entry"))
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Open,
    Close,
    End,
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        match c {
            _ if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '"' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Word(chars[start..i.min(chars.len())].iter().collect()));
            }
            '{' => {
                tokens.push(Token::Open);
                i += 1;
            }
            '}' => {
                tokens.push(Token::Close);
                i += 1;
            }
            ';' => {
                tokens.push(Token::End);
                i += 1;
            }
            '(' | ')' => {
                tokens.push(Token::Word(c.to_string()));
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && !"{};()\"".contains(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
        }
    }
    tokens
}

/// Index one past the `Close` matching the `Open` at `open`.
fn skip_block(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0;
    let mut i = open;

    while i < tokens.len() {
        match tokens[i] {
            Token::Open => depth += 1,
            Token::Close => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => (),
        }
        i += 1;
    }
    tokens.len()
}

/// Index one past a parenthesised list starting at `open`.
fn skip_list(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0;
    let mut i = open;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Word(w) if w == "(" => depth += 1,
            Token::Word(w) if w == ")" => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => (),
        }
        i += 1;
    }
    tokens.len()
}

/// Find the value words of the entry at `path` in a token stream. A later
/// definition of the same keyword overrides an earlier one.
fn find(tokens: &[Token], path: &[&str]) -> Option<Vec<String>> {
    let (head, rest) = path.split_first()?;
    let mut found = None;
    let mut i = 0;

    while i < tokens.len() {
        let key = match &tokens[i] {
            Token::Word(w) => w,
            Token::Open => {
                i = skip_block(tokens, i);
                continue;
            }
            Token::Close | Token::End => {
                i += 1;
                continue;
            }
        };

        if key.starts_with('#') {
            i += 1;
            match tokens.get(i) {
                Some(Token::Word(w)) if w == "(" => i = skip_list(tokens, i),
                Some(Token::Word(_)) => i += 1,
                _ => (),
            }
            continue;
        }

        if tokens.get(i + 1) == Some(&Token::Open) {
            let end = skip_block(tokens, i + 1);
            if key.as_str() == *head && !rest.is_empty() {
                let inner = &tokens[i + 2..end.saturating_sub(1).max(i + 2)];
                if let Some(words) = find(inner, rest) {
                    found = Some(words);
                }
            }
            i = end;
            continue;
        }

        let mut words = Vec::new();
        let mut j = i + 1;
        while j < tokens.len() {
            match &tokens[j] {
                Token::End => break,
                Token::Word(w) => words.push(w.clone()),
                Token::Open => {
                    j = skip_block(tokens, j);
                    continue;
                }
                Token::Close => break,
            }
            j += 1;
        }
        if key.as_str() == *head && rest.is_empty() {
            found = Some(words);
        }
        i = j + 1;
    }
    found
}
