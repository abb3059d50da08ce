//! User-defined command aliases.
//!
//! An alias maps a slash command name to a template. Templates may use
//! `$1`, `$2`, ... for single arguments, `$N-` for argument N onwards, and `$*`
//! for the argument string exactly as typed:
//!
//! ```text
//! /alias j /join #$1        "/j rust"        -> "/join #rust"
//! /alias say /msg $1 $2-    "/say bob hi all" -> "/msg bob hi all"
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;

use crate::store::{AliasRow, Db};

/// Alias table backed by the record store.
pub struct AliasManager {
    db: Arc<Mutex<Db>>,
    /// Lower-cased name -> expansion. `None` until first use or after a write.
    cache: RwLock<Option<HashMap<String, String>>>,
}

impl AliasManager {
    pub fn new(db: Arc<Mutex<Db>>) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
        }
    }

    /// Expand the alias a command line starts with, if any.
    ///
    /// Lines that aren't slash commands, or whose command isn't an alias,
    /// come back unchanged.
    pub fn expand(&self, line: &str) -> Result<String> {
        let Some(command) = line.strip_prefix('/') else {
            return Ok(line.to_string());
        };
        let (name, args) = match command.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim_start()),
            None => (command, ""),
        };
        if name.is_empty() {
            return Ok(line.to_string());
        }

        self.load()?;
        let cache = self.cache.read().unwrap();
        let Some(template) = cache.as_ref().and_then(|c| c.get(&name.to_lowercase())) else {
            return Ok(line.to_string());
        };
        Ok(substitute(template, args))
    }

    pub fn add(&self, name: &str, expansion: &str) -> Result<()> {
        self.db.lock().unwrap().add_alias(name, expansion)?;
        *self.cache.write().unwrap() = None;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.db.lock().unwrap().delete_alias(name)?;
        *self.cache.write().unwrap() = None;
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<AliasRow>> {
        Ok(self.db.lock().unwrap().aliases()?)
    }

    fn load(&self) -> Result<()> {
        if self.cache.read().unwrap().is_some() {
            return Ok(());
        }
        let rows = self.db.lock().unwrap().aliases()?;
        let table = rows.into_iter().map(|row| (row.name, row.expansion)).collect();
        *self.cache.write().unwrap() = Some(table);
        Ok(())
    }
}

/// Fill a template's placeholders from an argument string.
pub fn substitute(template: &str, args_raw: &str) -> String {
    let args = split_args(args_raw);
    let mut out = String::with_capacity(template.len() + args_raw.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('*') {
            out.push_str(args_raw);
            rest = tail;
            continue;
        }

        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let index = after[..digits].parse::<usize>().ok().filter(|&n| n > 0);
        match index {
            Some(n) => {
                let tail = &after[digits..];
                if let Some(tail) = tail.strip_prefix('-') {
                    out.push_str(&args.get(n - 1..).map(|a| a.join(" ")).unwrap_or_default());
                    rest = tail;
                } else {
                    // Unsupplied positions expand to nothing.
                    out.push_str(args.get(n - 1).map(String::as_str).unwrap_or(""));
                    rest = tail;
                }
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Split arguments on spaces, honouring `"..."` / `'...'` quoting and
/// backslash escapes of quotes and backslashes.
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('"' | '\'' | '\\')) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' | '\'' if quote.is_none() => quote = Some(c),
            '"' | '\'' if quote == Some(c) => quote = None,
            ' ' if quote.is_none() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AliasManager {
        AliasManager::new(Arc::new(Mutex::new(Db::open_memory().unwrap())))
    }

    #[test]
    fn positional_and_range_placeholders() {
        assert_eq!(substitute("/join #$1", "rust"), "/join #rust");
        assert_eq!(substitute("/msg $1 $2-", "bob hi all"), "/msg bob hi all");
        assert_eq!(substitute("/me says $1-", "a b c"), "/me says a b c");
        assert_eq!(substitute("[$*]", "  raw  text"), "[  raw  text]");
        assert_eq!(substitute("$2 $1", "x"), " x");
        assert_eq!(substitute("cost $ and $0", "x"), "cost $ and $0");
        assert_eq!(substitute("$12", "a"), "");
    }

    #[test]
    fn quoted_arguments() {
        assert_eq!(split_args(r#"one "two three" 'four five'"#), vec!["one", "two three", "four five"]);
        assert_eq!(split_args(r#"say \"hi\""#), vec!["say", "\"hi\""]);
        assert_eq!(split_args(r#""it's" fine"#), vec!["it's", "fine"]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn expand_uses_store_and_invalidates() {
        let aliases = manager();
        assert_eq!(aliases.expand("/j rust").unwrap(), "/j rust");

        aliases.add("J", "/join #$1").unwrap();
        assert_eq!(aliases.expand("/j rust").unwrap(), "/join #rust");
        assert_eq!(aliases.expand("/J rust").unwrap(), "/join #rust");

        aliases.add("j", "/join &$1").unwrap();
        assert_eq!(aliases.expand("/j rust").unwrap(), "/join &rust");

        assert!(aliases.delete("j").unwrap());
        assert_eq!(aliases.expand("/j rust").unwrap(), "/j rust");
    }

    #[test]
    fn non_commands_pass_through() {
        let aliases = manager();
        aliases.add("hi", "/msg $1 hello").unwrap();
        assert_eq!(aliases.expand("hi there").unwrap(), "hi there");
        assert_eq!(aliases.expand("/").unwrap(), "/");
        assert_eq!(aliases.list().unwrap().len(), 1);
    }
}
