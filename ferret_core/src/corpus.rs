use crate::signal::CoverageSignature;
use rand_core::RngCore;
use std::collections::{HashMap, HashSet};

/// Signature-keyed store of inputs that reached new execution states.
///
/// First discovery wins: once a signature has a representative input it is
/// never replaced, so the corpus only grows. Entries keep insertion order
/// and selection indexes into that order, which keeps fixed-seed sessions
/// replayable.
#[derive(Debug, Default)]
pub struct Corpus {
    entries: Vec<(CoverageSignature, Vec<u8>)>,
    index: HashMap<CoverageSignature, usize>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `input` under `signature` unless the signature is already
    /// represented. Returns whether the entry was added.
    pub fn insert_if_new(&mut self, signature: CoverageSignature, input: Vec<u8>) -> bool {
        if self.index.contains_key(&signature) {
            return false;
        }
        self.index.insert(signature, self.entries.len());
        self.entries.push((signature, input));
        true
    }

    pub fn contains(&self, signature: CoverageSignature) -> bool {
        self.index.contains_key(&signature)
    }

    pub fn get(&self, signature: CoverageSignature) -> Option<&[u8]> {
        self.index
            .get(&signature)
            .and_then(|&at| self.entries.get(at))
            .map(|(_, input)| input.as_slice())
    }

    /// Uniform pick over the stored inputs, `None` while the corpus is empty.
    pub fn select(&self, rng: &mut dyn RngCore) -> Option<&[u8]> {
        if self.entries.is_empty() {
            return None;
        }
        let choice = rng.next_u64() as usize % self.entries.len();
        self.entries.get(choice).map(|(_, input)| input.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Signatures in discovery order.
    pub fn signatures(&self) -> impl Iterator<Item = CoverageSignature> + '_ {
        self.entries.iter().map(|(signature, _)| *signature)
    }
}

/// Session-wide record of fault kinds already reported.
#[derive(Debug, Default)]
pub struct FaultRegistry {
    kinds: HashSet<String>,
}

impl FaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a qualified kind, returning true only on first sight.
    pub fn admit(&mut self, qualified_kind: &str) -> bool {
        self.kinds.insert(qualified_kind.to_string())
    }

    pub fn contains(&self, qualified_kind: &str) -> bool {
        self.kinds.contains(qualified_kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Reported kinds, sorted for stable report output.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.kinds.iter().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn first_discovered_input_is_kept() {
        let mut corpus = Corpus::new();
        assert!(corpus.insert_if_new(9, vec![1, 2, 3]));
        assert!(!corpus.insert_if_new(9, vec![4, 5, 6]));
        assert_eq!(corpus.get(9), Some(&[1u8, 2, 3][..]));
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn size_only_grows() {
        let mut corpus = Corpus::new();
        let mut last = 0;
        for signature in [3u64, 3, 7, 7, 11, 3] {
            corpus.insert_if_new(signature, vec![signature as u8]);
            assert!(corpus.len() >= last);
            last = corpus.len();
        }
        assert_eq!(corpus.len(), 3);
    }

    #[test]
    fn signatures_iterate_in_discovery_order() {
        let mut corpus = Corpus::new();
        for signature in [11u64, 3, 7] {
            corpus.insert_if_new(signature, vec![]);
        }
        let order: Vec<u64> = corpus.signatures().collect();
        assert_eq!(order, vec![11, 3, 7]);
    }

    #[test]
    fn selection_is_empty_only_when_the_corpus_is() {
        let mut corpus = Corpus::new();
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        assert!(corpus.select(&mut rng).is_none());
        corpus.insert_if_new(1, vec![42]);
        assert_eq!(corpus.select(&mut rng), Some(&[42u8][..]));
    }

    #[test]
    fn selection_is_roughly_uniform() {
        let mut corpus = Corpus::new();
        corpus.insert_if_new(1, vec![1]);
        corpus.insert_if_new(2, vec![2]);
        corpus.insert_if_new(3, vec![3]);

        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            let picked = corpus.select(&mut rng).unwrap()[0] as usize;
            counts[picked - 1] += 1;
        }
        for count in counts {
            assert!((800..=1200).contains(&count), "skewed counts: {counts:?}");
        }
    }

    #[test]
    fn registry_admits_each_kind_once() {
        let mut registry = FaultRegistry::new();
        assert!(registry.admit("vm::DivisionByZero"));
        assert!(!registry.admit("vm::DivisionByZero"));
        assert!(registry.admit("demo.pages::UnclosedTag"));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("vm::DivisionByZero"));
    }

    #[test]
    fn registry_kinds_come_back_sorted() {
        let mut registry = FaultRegistry::new();
        registry.admit("demo.pages::UnclosedTag");
        registry.admit("vm::DivisionByZero");
        registry.admit("demo.pages::StrayCloseTag");
        assert_eq!(
            registry.kinds(),
            vec![
                "demo.pages::StrayCloseTag".to_string(),
                "demo.pages::UnclosedTag".to_string(),
                "vm::DivisionByZero".to_string(),
            ]
        );
    }
}
