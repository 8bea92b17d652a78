//! Hashing of expanded commands.  The build log records a digest of the last
//! command used to produce each output; the scan compares against a digest
//! computed now to catch command changes.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Digest of a fully expanded command, response file content included.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Hash(pub u64);

pub fn hash_command(command: &str) -> Hash {
    let mut hasher = DefaultHasher::new();
    hasher.write(command.as_bytes());
    Hash(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_distinct() {
        assert_eq!(hash_command("cc -c foo.c"), hash_command("cc -c foo.c"));
        assert_ne!(hash_command("cc -c foo.c"), hash_command("cc -c bar.c"));
    }

    #[test]
    fn sensitive_to_appended_rsp_content() {
        assert_ne!(hash_command("link @rsp"), hash_command("link @rsp\na.o b.o"));
    }
}
