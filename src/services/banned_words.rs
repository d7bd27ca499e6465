use std::sync::RwLock;

use tracing::info;

use crate::state::snapshot::BannedWordSettings;

/// Cached banned-word list used to mask relayed text.
pub struct BannedWordFilter {
    settings: RwLock<BannedWordSettings>,
}

impl BannedWordFilter {
    /// Create a filter for `settings`.
    pub fn new(settings: BannedWordSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Swap in a new word list.
    pub fn reload(&self, settings: BannedWordSettings) {
        info!(words = settings.words.len(), "banned words reloaded");
        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    /// Number of words currently masked.
    pub fn word_count(&self) -> usize {
        self.read(|settings| settings.words.len())
    }

    /// Replace every case-insensitive occurrence of a banned word.
    pub fn filter(&self, text: &str) -> String {
        self.read(|settings| {
            let mut filtered = text.to_string();
            let mut replaced = 0;
            for word in settings.words.iter().filter(|word| !word.is_empty()) {
                let (next, count) = replace_ignoring_case(&filtered, word, &settings.replacement);
                filtered = next;
                replaced += count;
            }
            if replaced > 0 {
                info!(replaced, "banned words masked");
            }
            filtered
        })
    }

    fn read<T>(&self, f: impl FnOnce(&BannedWordSettings) -> T) -> T {
        match self.settings.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

fn replace_ignoring_case(text: &str, word: &str, replacement: &str) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut count = 0;
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(len) = match_len(rest, word) {
            out.push_str(replacement);
            rest = &rest[len..];
            count += 1;
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    (out, count)
}

/// Byte length of the prefix of `text` matching `word` case-insensitively.
fn match_len(text: &str, word: &str) -> Option<usize> {
    let mut consumed = 0;
    let mut text_chars = text.chars();
    for expected in word.chars() {
        let actual = text_chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        consumed += actual.len_utf8();
    }
    Some(consumed)
}
