use crate::epc::normalize_96;
use std::{collections::VecDeque, fs, path::Path};
use tagforge_error::{TFError, TFResult};

/// Ordered, consumable list of pre-assigned EPCs loaded from a flat file.
///
/// One EPC per line; blank lines and lines starting with `#` are skipped.
#[derive(Debug, Clone, Default)]
pub struct EpcList {
    entries: VecDeque<String>,
}

impl EpcList {
    pub fn from_file<P: AsRef<Path>>(path: P) -> TFResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let list = Self::parse(&text)?;
        tracing::info!(
            path = %path.as_ref().display(),
            count = list.len(),
            "EPC list loaded"
        );
        Ok(list)
    }

    pub fn parse(text: &str) -> TFResult<Self> {
        let mut entries = VecDeque::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let epc = normalize_96(line)
                .map_err(|e| TFError::Validation(format!("line {}: {e}", idx + 1)))?;
            entries.push_back(epc);
        }
        Ok(Self { entries })
    }

    /// Consume the next EPC.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> TFResult<String> {
        self.entries
            .pop_front()
            .ok_or_else(|| TFError::Exhaustion("EPC list is exhausted".to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_exhausts() {
        let mut list = EpcList::parse(
            "# batch 7\n303B029BC16E1B4301843203\n\n  e2801160200074c5f1a2b3c4 \n",
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.next().unwrap(), "303B029BC16E1B4301843203");
        assert_eq!(list.next().unwrap(), "E2801160200074C5F1A2B3C4");
        assert!(matches!(list.next(), Err(TFError::Exhaustion(_))));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = EpcList::parse("303B029BC16E1B4301843203\n1234\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }
}
