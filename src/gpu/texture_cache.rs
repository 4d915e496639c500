//! Byte-bounded LRU texture cache.
//!
//! Eviction never touches a texture that was referenced this frame; if
//! evicting every idle texture still cannot make room, the insert is
//! refused with `BudgetExceeded` and the caller binds the shared white
//! placeholder instead.
//!
//! The accounting lives in [`CacheLedger`] with no GPU types so the
//! eviction policy is testable headless.

use super::upload::{stage_image, white_placeholder, StagedTexture};
use super::GpuContext;
use crate::error::EngineError;
use crate::parse::blp::BlpImage;
use rustc_hash::FxHashMap;

/// LRU bookkeeping over opaque entries.
pub struct CacheLedger {
    budget: u64,
    used: u64,
    entries: FxHashMap<u64, LedgerEntry>,
    frame: u64,
}

struct LedgerEntry {
    bytes: u64,
    last_used_frame: u64,
}

impl CacheLedger {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: 0,
            entries: FxHashMap::default(),
            frame: 0,
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn begin_frame(&mut self) {
        self.frame += 1;
    }

    /// Mark an entry as referenced this frame.
    pub fn touch(&mut self, key: u64) {
        let frame = self.frame;
        if let Some(e) = self.entries.get_mut(&key) {
            e.last_used_frame = frame;
        }
    }

    /// Reserve room for a new entry, returning the keys to evict.
    /// Fails when even a full sweep of idle entries cannot make room.
    pub fn reserve(&mut self, key: u64, bytes: u64) -> Result<Vec<u64>, EngineError> {
        if bytes > self.budget {
            return Err(EngineError::BudgetExceeded {
                cache: "texture",
                needed: bytes,
                budget: self.budget,
            });
        }
        let mut evictions = Vec::new();
        if self.used + bytes > self.budget {
            // Oldest idle entries first.
            let mut idle: Vec<(u64, u64, u64)> = self
                .entries
                .iter()
                .filter(|(_, e)| e.last_used_frame < self.frame)
                .map(|(&k, e)| (e.last_used_frame, k, e.bytes))
                .collect();
            idle.sort_unstable();
            let mut reclaimed = 0u64;
            for (_, k, b) in idle {
                if self.used + bytes - reclaimed <= self.budget {
                    break;
                }
                reclaimed += b;
                evictions.push(k);
            }
            if self.used + bytes - reclaimed > self.budget {
                return Err(EngineError::BudgetExceeded {
                    cache: "texture",
                    needed: bytes,
                    budget: self.budget,
                });
            }
            for k in &evictions {
                if let Some(e) = self.entries.remove(k) {
                    self.used -= e.bytes;
                }
            }
        }
        self.used += bytes;
        self.entries.insert(
            key,
            LedgerEntry {
                bytes,
                last_used_frame: self.frame,
            },
        );
        Ok(evictions)
    }

    pub fn remove(&mut self, key: u64) {
        if let Some(e) = self.entries.remove(&key) {
            self.used -= e.bytes;
        }
    }
}

pub struct TextureCache {
    ledger: CacheLedger,
    textures: FxHashMap<u64, StagedTexture>,
    placeholder: StagedTexture,
}

impl TextureCache {
    pub fn new(ctx: &GpuContext, budget_bytes: u64) -> Self {
        Self {
            ledger: CacheLedger::new(budget_bytes),
            textures: FxHashMap::default(),
            placeholder: white_placeholder(ctx),
        }
    }

    pub fn begin_frame(&mut self) {
        self.ledger.begin_frame();
    }

    pub fn used_bytes(&self) -> u64 {
        self.ledger.used_bytes()
    }

    /// Fetch a resident texture, marking it referenced.
    pub fn get(&mut self, key: u64) -> Option<&StagedTexture> {
        if self.ledger.contains(key) {
            self.ledger.touch(key);
            self.textures.get(&key)
        } else {
            None
        }
    }

    /// Upload and cache a parsed image. On budget refusal the white
    /// placeholder is returned so rendering degrades instead of
    /// failing.
    pub fn insert(
        &mut self,
        ctx: &GpuContext,
        key: u64,
        label: &str,
        image: &BlpImage,
    ) -> &StagedTexture {
        if self.ledger.contains(key) {
            self.ledger.touch(key);
            return &self.textures[&key];
        }
        let bytes = image.pixels.gpu_bytes(image.width, image.height);
        match self.ledger.reserve(key, bytes) {
            Ok(evictions) => {
                for evicted in evictions {
                    self.textures.remove(&evicted);
                }
                let staged = stage_image(ctx, label, image);
                self.textures.entry(key).or_insert(staged)
            }
            Err(err) => {
                log::warn!("texture cache refused {label}: {err}");
                &self.placeholder
            }
        }
    }

    pub fn placeholder(&self) -> &StagedTexture {
        &self.placeholder
    }

    pub fn remove(&mut self, key: u64) {
        self.ledger.remove(key);
        self.textures.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_idle_first() {
        let mut ledger = CacheLedger::new(100);
        ledger.begin_frame();
        ledger.reserve(1, 40).unwrap();
        ledger.begin_frame();
        ledger.reserve(2, 40).unwrap();
        ledger.begin_frame();
        // Needs 40 more; entry 1 is the oldest idle one.
        let evicted = ledger.reserve(3, 40).unwrap();
        assert_eq!(evicted, vec![1]);
        assert_eq!(ledger.used_bytes(), 80);
        assert!(!ledger.contains(1));
        assert!(ledger.contains(2) && ledger.contains(3));
    }

    #[test]
    fn referenced_this_frame_is_never_evicted() {
        let mut ledger = CacheLedger::new(100);
        ledger.begin_frame();
        ledger.reserve(1, 60).unwrap();
        ledger.reserve(2, 30).unwrap();
        // Both are hot this frame; no idle bytes to reclaim.
        let err = ledger.reserve(3, 40).unwrap_err();
        assert!(matches!(err, EngineError::BudgetExceeded { .. }));
        assert!(ledger.contains(1) && ledger.contains(2));
    }

    #[test]
    fn oversized_request_is_refused_outright() {
        let mut ledger = CacheLedger::new(100);
        assert!(ledger.reserve(1, 101).is_err());
        assert_eq!(ledger.used_bytes(), 0);
    }
}
