// Export transport: fixed filenames, plain-text newline-joined bodies.

use crate::normalizer::{normalize_batch, Category};

/// Which download is being produced. Each kind carries a fixed filename and
/// an optional category post-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Todos,
    Apross,
    Pami,
}

impl ExportKind {
    pub fn filename(&self) -> &'static str {
        match self {
            ExportKind::Todos => "Codigos.txt",
            ExportKind::Apross => "Codigos_APROSS.txt",
            ExportKind::Pami => "Codigos_PAMI.txt",
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            ExportKind::Todos => None,
            ExportKind::Apross => Some(Category::Apross),
            ExportKind::Pami => Some(Category::Pami),
        }
    }
}

/// A downloadable code list.
#[derive(Debug, Clone)]
pub struct Export {
    pub filename: &'static str,
    pub body: String,
}

/// Run the normalization pipeline over raw stored numbers and join the
/// surviving codes one per line. No header, no trailing metadata.
pub fn build_export<I>(raw_numbers: I, kind: ExportKind) -> Export
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let codes = normalize_batch(raw_numbers, kind.category());

    Export {
        filename: kind.filename(),
        body: codes.join("\n"),
    }
}
