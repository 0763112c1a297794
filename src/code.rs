use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

pub const DEFAULT_CODE_LENGTH: usize = 6;
const MAX_CODE_LENGTH: usize = 9;

#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    /// Returns a fixed-width, zero-padded numeric code.
    fn generate(&self) -> String;
}

/// One entropy-seeded generator shared by every caller. Concurrent calls
/// advance the same state instead of reseeding, so two requests landing in
/// the same instant still get independent codes.
pub struct RandomCodeGenerator {
    rng: Mutex<StdRng>,
    length: usize,
}

impl RandomCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            length: length.clamp(1, MAX_CODE_LENGTH),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let range = 10u32.pow(self.length as u32);
        let num = self
            .rng
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .gen_range(0..range);
        format!("{:0width$}", num, width = self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_six_zero_padded_digits() {
        let generator = RandomCodeGenerator::default();
        for _ in 0..1000 {
            let code = generator.generate();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn length_is_clamped() {
        assert_eq!(RandomCodeGenerator::new(0).length(), 1);
        assert_eq!(RandomCodeGenerator::new(20).length(), 9);
        assert_eq!(RandomCodeGenerator::new(4).generate().len(), 4);
    }

    #[test]
    fn concurrent_callers_do_not_share_a_sequence() {
        let generator = std::sync::Arc::new(RandomCodeGenerator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| generator.generate()).collect::<Vec<_>>()
                })
            })
            .collect();

        let codes: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let distinct: HashSet<&String> = codes.iter().collect();
        // 400 draws from a million values; a shared reseeded state would collapse this.
        assert!(distinct.len() > 350);
    }
}
