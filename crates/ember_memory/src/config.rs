//! # Memory Configuration
//!
//! Byte capacities for every allocator, loaded once at start-up.
//!
//! ```toml
//! [memory]
//! single_frame_size = 10_485_760
//! double_buffered_size = 10_485_760
//! level_stack_size = 52_428_800
//! free_list_size = 10_485_760
//! dynamic_arena_size = 10_485_760
//! ```
//!
//! The `[memory]` table header is optional. Every key is required: a missing
//! key or a zero value fails start-up instead of producing an empty region.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

const MIB: usize = 1024 * 1024;

/// Allocator capacities in bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Scratch stack cleared every frame.
    pub single_frame_size: usize,
    /// Size of EACH of the two double-buffered stacks.
    pub double_buffered_size: usize,
    /// Stack holding engine-lifetime data and level data.
    pub level_stack_size: usize,
    /// Free-list allocator.
    pub free_list_size: usize,
    /// Relocating arena for dynamic objects.
    pub dynamic_arena_size: usize,
}

impl MemoryConfig {
    /// Default single-frame stack: 10 MiB.
    pub const DEFAULT_SINGLE_FRAME_SIZE: usize = 10 * MIB;

    /// Default per-buffer double-buffered size: 10 MiB.
    pub const DEFAULT_DOUBLE_BUFFERED_SIZE: usize = 10 * MIB;

    /// Default level stack: 50 MiB.
    pub const DEFAULT_LEVEL_STACK_SIZE: usize = 50 * MIB;

    /// Default free list: 10 MiB.
    pub const DEFAULT_FREE_LIST_SIZE: usize = 10 * MIB;

    /// Default dynamic arena: 10 MiB.
    pub const DEFAULT_DYNAMIC_ARENA_SIZE: usize = 10 * MIB;

    /// Uniform config with `size` bytes for every allocator. Handy in tests.
    #[must_use]
    pub const fn uniform(size: usize) -> Self {
        Self {
            single_frame_size: size,
            double_buffered_size: size,
            level_stack_size: size,
            free_list_size: size,
            dynamic_arena_size: size,
        }
    }

    /// Parses a TOML document, with or without a `[memory]` table.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for malformed TOML, missing or
    /// unknown keys, and zero capacities.
    pub fn from_toml_str(source: &str) -> MemoryResult<Self> {
        let mut table: toml::Table = source
            .parse()
            .map_err(|e| MemoryError::InvalidConfig(format!("malformed TOML: {e}")))?;

        let value = match table.remove("memory") {
            Some(memory) => memory,
            None => toml::Value::Table(table),
        };

        let config: Self = value
            .try_into()
            .map_err(|e| MemoryError::InvalidConfig(format!("{e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the file cannot be read or
    /// does not parse.
    pub fn from_toml_file(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Rejects zero capacities.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] naming the first zero field.
    pub fn validate(&self) -> MemoryResult<()> {
        let fields = [
            ("single_frame_size", self.single_frame_size),
            ("double_buffered_size", self.double_buffered_size),
            ("level_stack_size", self.level_stack_size),
            ("free_list_size", self.free_list_size),
            ("dynamic_arena_size", self.dynamic_arena_size),
        ];
        match fields.iter().find(|(_, size)| *size == 0) {
            Some((name, _)) => Err(MemoryError::InvalidConfig(format!(
                "{name} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            single_frame_size: Self::DEFAULT_SINGLE_FRAME_SIZE,
            double_buffered_size: Self::DEFAULT_DOUBLE_BUFFERED_SIZE,
            level_stack_size: Self::DEFAULT_LEVEL_STACK_SIZE,
            free_list_size: Self::DEFAULT_FREE_LIST_SIZE,
            dynamic_arena_size: Self::DEFAULT_DYNAMIC_ARENA_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r"
        [memory]
        single_frame_size = 1024
        double_buffered_size = 2048
        level_stack_size = 4096
        free_list_size = 8192
        dynamic_arena_size = 16384
    ";

    #[test]
    fn test_parse_memory_table() {
        let config = MemoryConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.single_frame_size, 1024);
        assert_eq!(config.dynamic_arena_size, 16384);
    }

    #[test]
    fn test_parse_bare_keys() {
        let bare = FULL.replace("[memory]", "");
        let config = MemoryConfig::from_toml_str(&bare).unwrap();
        assert_eq!(config.level_stack_size, 4096);
    }

    #[test]
    fn test_missing_key_rejected() {
        let partial = FULL.replace("free_list_size = 8192", "");
        assert!(matches!(
            MemoryConfig::from_toml_str(&partial),
            Err(MemoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_rejected() {
        let zero = FULL.replace("level_stack_size = 4096", "level_stack_size = 0");
        let err = MemoryConfig::from_toml_str(&zero).unwrap_err();
        assert_eq!(
            err,
            MemoryError::InvalidConfig("level_stack_size must be greater than zero".to_string())
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let extra = format!("{FULL}\nscratch_size = 12\n");
        assert!(MemoryConfig::from_toml_str(&extra).is_err());
    }

    #[test]
    fn test_negative_rejected() {
        let negative = FULL.replace("single_frame_size = 1024", "single_frame_size = -5");
        assert!(MemoryConfig::from_toml_str(&negative).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.toml");
        std::fs::write(&path, FULL).unwrap();

        let config = MemoryConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.free_list_size, 8192);
    }

    #[test]
    fn test_unreadable_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");

        match MemoryConfig::from_toml_file(&missing) {
            Err(MemoryError::InvalidConfig(message)) => {
                assert!(message.starts_with("failed to read"));
                assert!(message.contains("missing.toml"));
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_default_is_valid() {
        assert!(MemoryConfig::default().validate().is_ok());
    }
}
