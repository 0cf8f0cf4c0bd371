//! File-backed knowledge base for retrieval-augmented answers.
//!
//! The knowledge directory holds `.md` / `.txt` documents (product sheets,
//! FAQs, policies). Documents are split into paragraph chunks at load time
//! and searched by query-term overlap.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::ConfigError;

/// Chunks longer than this are cut.
const MAX_CHUNK_CHARS: usize = 1500;

/// A paragraph of a knowledge document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub path: String,
    pub text: String,
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub path: String,
    pub snippet: String,
    pub score: f32,
}

/// In-memory chunk index over a directory of documents.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    chunks: Vec<Chunk>,
}

impl KnowledgeBase {
    /// Build from already-loaded documents: `(path, content)` pairs.
    pub fn from_documents<I, P, C>(documents: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: AsRef<str>,
    {
        let mut chunks = Vec::new();
        for (path, content) in documents {
            let path = path.into();
            for text in split_paragraphs(content.as_ref()) {
                chunks.push(Chunk {
                    path: path.clone(),
                    text,
                });
            }
        }
        Self { chunks }
    }

    /// Load every `.md` / `.txt` file under `dir` (recursively).
    pub async fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut documents = Vec::new();
        collect_documents(dir, dir, &mut documents).await?;
        documents.sort_by(|a, b| a.0.cmp(&b.0));

        let kb = Self::from_documents(documents);
        tracing::info!(
            dir = %dir.display(),
            chunks = kb.len(),
            "Loaded knowledge base"
        );
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Rank chunks by the fraction of query terms they contain.
    ///
    /// Terms shorter than three characters are ignored; ties keep document order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<SearchResult> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let lower = chunk.text.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                (matched > 0).then(|| SearchResult {
                    path: chunk.path.clone(),
                    snippet: chunk.text.clone(),
                    score: matched as f32 / terms.len() as f32,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        results
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_string)
        .collect();
    terms.sort_unstable();
    terms.dedup();
    terms
}

/// Split a document on blank lines.
fn split_paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.chars().any(char::is_alphanumeric))
        .map(|p| p.chars().take(MAX_CHUNK_CHARS).collect())
        .collect()
}

/// Recursively collect documents under `dir`.
fn collect_documents<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<(String, String)>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ConfigError>> + Send + 'a>> {
    Box::pin(async move {
        let mut read_dir = fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path: PathBuf = entry.path();
            let metadata = entry.metadata().await?;

            if metadata.is_dir() {
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if !hidden {
                    collect_documents(root, &path, out).await?;
                }
            } else if metadata.is_file()
                && matches!(path.extension().and_then(|e| e.to_str()), Some("md" | "txt"))
            {
                let content = fs::read_to_string(&path).await?;
                let rel_path = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                out.push((rel_path, content));
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> KnowledgeBase {
        KnowledgeBase::from_documents([
            (
                "pricing.md",
                "The Pro plan costs $20 per month.\n\nThe Team plan costs $50 per month.",
            ),
            ("support.md", "Support hours are 9am to 5pm on weekdays."),
        ])
    }

    #[test]
    fn splits_documents_into_paragraphs() {
        assert_eq!(sample().len(), 3);
    }

    #[test]
    fn search_ranks_by_term_overlap() {
        let results = sample().search("How much does the Team plan cost?", 5);
        assert!(!results.is_empty());
        assert!(results[0].snippet.contains("Team plan"));
        assert!(results.iter().all(|r| r.path == "pricing.md"));
    }

    #[test]
    fn search_respects_limit() {
        assert_eq!(sample().search("plan month", 1).len(), 1);
    }

    #[test]
    fn repeated_query_terms_count_once() {
        let results = sample().search("support plan support", 5);
        let support = results.iter().find(|r| r.path == "support.md").unwrap();
        assert_eq!(support.score, 0.5);
        assert_eq!(query_terms("Plan the plan, PLAN"), vec!["plan", "the"]);
    }

    #[test]
    fn search_ignores_short_terms() {
        assert!(sample().search("a to is", 5).is_empty());
    }

    #[tokio::test]
    async fn load_reads_nested_text_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("faq")).await.unwrap();
        tokio::fs::write(dir.path().join("faq/shipping.md"), "We ship worldwide.")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "Refunds within 30 days.")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("image.png"), "binary").await.unwrap();

        let kb = KnowledgeBase::load(dir.path()).await.unwrap();
        assert_eq!(kb.len(), 2);
        let hits = kb.search("refunds policy", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "notes.txt");
    }

    #[tokio::test]
    async fn load_missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(KnowledgeBase::load(&dir.path().join("missing")).await.is_err());
    }
}
