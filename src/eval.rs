//! Represents pre-parsed strings with embedded variable references, e.g.
//! `cc $in -o $out`, and mechanisms for expanding those into plain strings.

use std::borrow::Cow;

use crate::smallmap::SmallMap;

/// An environment providing a mapping of variable name to variable value.
/// A given Template may be expanded with multiple environments as possible
/// context.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One chunk within a Template, either literal text or a variable reference.
#[derive(Debug, Clone)]
pub enum Chunk {
    Literal(String),
    Var(String),
}

/// A parsed but unexpanded variable-reference string.  The parser resolves
/// nested definitions before building these, so expansion is a single
/// concatenating pass; there is no recursive lookup.
#[derive(Debug, Clone, Default)]
pub struct Template(Vec<Chunk>);

impl Template {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Template(chunks)
    }

    /// An unset template; rules leave description/depfile/rspfile this way
    /// unless the manifest provides them.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expand against the given environments, consulted in order.  Names no
    /// environment knows expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for chunk in &self.0 {
            match chunk {
                Chunk::Literal(s) => val.push_str(s),
                Chunk::Var(v) => {
                    for env in envs {
                        if let Some(s) = env.get_var(v) {
                            val.push_str(&s);
                            break;
                        }
                    }
                }
            }
        }
        val
    }
}

// Impl for the bindings attached to an edge and for file-scope bindings.
impl Env for SmallMap<String, String> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}
