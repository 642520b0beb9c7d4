// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entity tag generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use smol_str::SmolStr;

/// Mints globally unique entity tags.
///
/// Tags are `node-megaseconds-seconds-microseconds-serial`. The timestamp
/// triple alone can collide within a microsecond, so a per-process serial
/// is appended; the store additionally dedupes equal tags within a user.
#[derive(Debug)]
pub struct EtagGenerator {
    node: SmolStr,
    serial: AtomicU64,
}

impl EtagGenerator {
    pub fn new(node: impl Into<SmolStr>) -> Self {
        Self {
            node: node.into(),
            serial: AtomicU64::new(0),
        }
    }

    /// Generates a tag against the current wall clock.
    pub fn generate(&self) -> SmolStr {
        let (secs, micros) = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => (elapsed.as_secs(), elapsed.subsec_micros()),
            Err(_) => (0, 0),
        };
        self.generate_at(secs, micros)
    }

    /// Generates a tag for an explicit timestamp, for tests.
    pub fn generate_at(&self, secs: u64, micros: u32) -> SmolStr {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        SmolStr::new(format!(
            "{}-{}-{}-{}-{}",
            self.node,
            secs / 1_000_000,
            secs % 1_000_000,
            micros,
            serial
        ))
    }
}
