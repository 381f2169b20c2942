//! Sequence vocabularies and tokenizers.
//!
//! Both sequence families are tokenized into overlapping 3-mers (stride 1)
//! which are looked up in a fixed vocabulary. Id 0 is the shared
//! padding/unknown sentinel; vocabularies that support masked-token
//! pretraining reserve their highest id as the mask token.

use std::collections::{BTreeSet, HashMap};

/// Fixed token length for aptamer sequences.
pub const APTA_MAX_LEN: usize = 275;
/// Fixed token length for protein sequences.
pub const PROT_MAX_LEN: usize = 867;

/// Aptamer reconstruction vocabulary size (125 3-mers + pad + mask).
pub const APTA_VOCAB_SIZE: usize = 127;
/// Aptamer secondary-structure label vocabulary size.
pub const APTA_STRUCT_VOCAB_SIZE: usize = 344;
/// Protein secondary-structure label vocabulary size.
pub const PROT_STRUCT_VOCAB_SIZE: usize = 585;

const RNA_LETTERS: [char; 5] = ['A', 'C', 'G', 'U', 'N'];
const RNA_STRUCT_LETTERS: [char; 7] = ['.', '(', ')', '[', ']', '{', '}'];
const PROT_SS_LETTERS: [&str; 8] = ["H", "B", "E", "G", "I", "T", "S", "-"];

/// Bidirectional mapping between sequence fragments and positive integer ids.
///
/// Immutable once built. Id 0 is reserved for padding/unknown; when
/// `with_mask` is set the highest id is reserved for the mask token and is
/// never produced by tokenization.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    word_to_id: HashMap<String, u32>,
    id_to_word: Vec<String>,
    with_mask: bool,
}

impl Vocabulary {
    /// Builds a vocabulary from an ordered word list. Ids are assigned in
    /// list order starting at 1.
    pub fn from_words<I, S>(words: I, with_mask: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut word_to_id = HashMap::new();
        let mut id_to_word = vec![String::new()];
        for word in words {
            let word = word.into();
            if word_to_id.contains_key(&word) {
                continue;
            }
            let id = id_to_word.len() as u32;
            word_to_id.insert(word.clone(), id);
            id_to_word.push(word);
        }
        Self {
            word_to_id,
            id_to_word,
            with_mask,
        }
    }

    /// Total vocabulary size, including the padding id and, when present,
    /// the mask id.
    pub fn size(&self) -> usize {
        if self.with_mask {
            self.id_to_word.len() + 1
        } else {
            self.id_to_word.len()
        }
    }

    /// Looks up a fragment, returning 0 for unknown words.
    pub fn id(&self, word: &str) -> u32 {
        self.word_to_id.get(word).copied().unwrap_or(0)
    }

    /// Reverse lookup. Returns `None` for the padding id, the mask id and
    /// out-of-range ids.
    pub fn word(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.id_to_word.get(id as usize).map(|s| s.as_str())
    }

    /// Mask token id (`size - 1`). Only meaningful for vocabularies built
    /// with `with_mask`.
    pub fn mask_id(&self) -> u32 {
        debug_assert!(self.with_mask);
        self.size() as u32 - 1
    }
}

/// Builds the aptamer 3-mer vocabulary over {A, C, G, U, N} in grid order.
pub fn rna_vocab() -> Vocabulary {
    let mut words = Vec::with_capacity(125);
    for a in RNA_LETTERS {
        for b in RNA_LETTERS {
            for c in RNA_LETTERS {
                words.push(format!("{a}{b}{c}"));
            }
        }
    }
    Vocabulary::from_words(words, true)
}

/// Builds the aptamer secondary-structure label vocabulary from dot-bracket
/// 3-mers.
pub fn rna_structure_vocab() -> Vocabulary {
    let mut words = Vec::with_capacity(343);
    for a in RNA_STRUCT_LETTERS {
        for b in RNA_STRUCT_LETTERS {
            for c in RNA_STRUCT_LETTERS {
                words.push(format!("{a}{b}{c}"));
            }
        }
    }
    Vocabulary::from_words(words, false)
}

/// Builds the protein word vocabulary from a pre-filtered word list, in
/// list order. The word list comes from a corpus frequency table, see
/// [`crate::data::load_protein_words`].
pub fn protein_vocab(words: &[String]) -> Vocabulary {
    Vocabulary::from_words(words.iter().cloned(), true)
}

/// Builds the protein secondary-structure label vocabulary.
///
/// Labels are 3-mers over the 8-state DSSP alphabet where the first two
/// positions may be empty, deduplicated and sorted so that id assignment is
/// stable across runs.
pub fn protein_structure_vocab() -> Vocabulary {
    let mut extended: Vec<&str> = vec![""];
    extended.extend(PROT_SS_LETTERS);
    let mut unique = BTreeSet::new();
    for a in &extended {
        for b in &extended {
            for c in PROT_SS_LETTERS {
                unique.insert(format!("{a}{b}{c}"));
            }
        }
    }
    Vocabulary::from_words(unique, false)
}

/// The four vocabularies one pipeline instance works with.
#[derive(Debug, Clone)]
pub struct Vocabularies {
    pub apta: Vocabulary,
    pub apta_struct: Vocabulary,
    pub prot: Vocabulary,
    pub prot_struct: Vocabulary,
}

impl Vocabularies {
    /// Assembles the vocabulary set from a protein word list.
    pub fn new(protein_words: &[String]) -> Self {
        Self {
            apta: rna_vocab(),
            apta_struct: rna_structure_vocab(),
            prot: protein_vocab(protein_words),
            prot_struct: protein_structure_vocab(),
        }
    }
}

fn normalize_rna(seq: &str) -> String {
    seq.trim()
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'T' => 'U',
            c => c,
        })
        .collect()
}

/// Tokenizes a sequence into overlapping 3-mer ids, truncated and zero-padded
/// to `max_len`. Unknown fragments map to 0.
pub fn tokenize_windows(seq: &str, vocab: &Vocabulary, max_len: usize) -> Vec<u32> {
    let chars: Vec<char> = seq.trim().chars().collect();
    let mut ids = Vec::with_capacity(max_len);
    if chars.len() >= 3 {
        for window in chars.windows(3) {
            if ids.len() == max_len {
                break;
            }
            let fragment: String = window.iter().collect();
            ids.push(vocab.id(&fragment));
        }
    }
    ids.resize(max_len, 0);
    ids
}

/// Tokenizes an aptamer sequence. `T` is normalized to `U` before lookup.
pub fn tokenize_rna(seq: &str, vocab: &Vocabulary, max_len: usize) -> Vec<u32> {
    tokenize_windows(&normalize_rna(seq), vocab, max_len)
}

/// Tokenizes a protein sequence with its word vocabulary.
pub fn tokenize_protein(seq: &str, vocab: &Vocabulary, max_len: usize) -> Vec<u32> {
    tokenize_windows(&seq.trim().to_ascii_uppercase(), vocab, max_len)
}

/// Tokenizes a (sequence, structure annotation) pair for pretraining,
/// producing aligned token ids and structure label ids.
///
/// The two strings are windowed independently; the label track is truncated
/// or padded to the same length so each token position carries one structure
/// class.
pub fn tokenize_pair(
    seq: &str,
    structure: &str,
    seq_vocab: &Vocabulary,
    struct_vocab: &Vocabulary,
    max_len: usize,
) -> (Vec<u32>, Vec<u32>) {
    let ids = tokenize_windows(seq, seq_vocab, max_len);
    let labels = tokenize_windows(structure, struct_vocab, max_len);
    (ids, labels)
}

/// Recovers the fragment strings for the non-padding ids of a token
/// sequence, in order.
pub fn recover_tokens(ids: &[u32], vocab: &Vocabulary) -> Vec<String> {
    ids.iter()
        .filter(|&&id| id != 0)
        .filter_map(|&id| vocab.word(id).map(|w| w.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rna_vocab_size_matches_constants() {
        assert_eq!(rna_vocab().size(), APTA_VOCAB_SIZE);
        assert_eq!(rna_structure_vocab().size(), APTA_STRUCT_VOCAB_SIZE);
        assert_eq!(protein_structure_vocab().size(), PROT_STRUCT_VOCAB_SIZE);
    }

    #[test]
    fn mask_id_is_highest() {
        let vocab = rna_vocab();
        assert_eq!(vocab.mask_id(), 126);
        assert!(vocab.word(vocab.mask_id()).is_none());
    }

    #[test]
    fn tokenize_is_deterministic_and_padded() {
        let vocab = rna_vocab();
        let a = tokenize_rna("ACGUACGU", &vocab, 16);
        let b = tokenize_rna("ACGUACGU", &vocab, 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        // 8 bases -> 6 overlapping 3-mers, rest padding
        assert_eq!(a.iter().filter(|&&id| id != 0).count(), 6);
        assert!(a[6..].iter().all(|&id| id == 0));
    }

    #[test]
    fn dna_input_is_normalized() {
        let vocab = rna_vocab();
        assert_eq!(
            tokenize_rna("ACGT", &vocab, 8),
            tokenize_rna("acgu", &vocab, 8)
        );
    }

    #[test]
    fn unknown_fragments_map_to_zero() {
        let vocab = rna_vocab();
        let ids = tokenize_rna("ACXGU", &vocab, 8);
        assert_eq!(ids[0], 0); // "ACX" is not in the vocabulary
    }

    #[test]
    fn no_id_exceeds_vocab_size() {
        let vocab = rna_vocab();
        let ids = tokenize_rna("ACGUACGUNNNGGGCCCAAAUUU", &vocab, 32);
        assert!(ids.iter().all(|&id| (id as usize) < vocab.size()));
    }

    #[test]
    fn recover_tokens_round_trip() {
        let vocab = rna_vocab();
        let ids = tokenize_rna("ACGUA", &vocab, 8);
        let tokens = recover_tokens(&ids, &vocab);
        assert_eq!(tokens, vec!["ACG", "CGU", "GUA"]);
    }

    #[test]
    fn pair_tracks_are_aligned() {
        let seq_vocab = rna_vocab();
        let ss_vocab = rna_structure_vocab();
        let (ids, labels) = tokenize_pair("ACGUACG", "..(()).", &seq_vocab, &ss_vocab, 16);
        assert_eq!(ids.len(), labels.len());
    }
}
