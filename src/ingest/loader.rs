//! Folder and upload loading.
//!
//! PDFs become one `Document` per page, text and Markdown files one document
//! each, and JSON files one document per item that carries a `text` field.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use super::document::{content_hash, Document, DocumentKind, DocumentMetadata};
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Stop reading JSON files after this many; `None` reads all of them.
    pub max_json_files: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    /// Files or items that were recognised but produced nothing to embed.
    pub skipped: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn count_kind(&self, kind: DocumentKind) -> usize {
        self.documents
            .iter()
            .filter(|doc| doc.metadata.kind == kind)
            .count()
    }
}

#[derive(Clone)]
pub struct DocumentLoader {
    config: LoaderConfig,
}

impl DocumentLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn load_folder(&self, folder: &Path) -> Result<LoadReport, ApiError> {
        if !folder.is_dir() {
            return Err(ApiError::NotFound(format!(
                "Document folder not found: {}",
                folder.display()
            )));
        }

        let mut files = Vec::new();
        collect_files(folder, &mut files).map_err(ApiError::internal)?;
        files.sort();

        let mut report = LoadReport::default();
        let mut json_files_read = 0usize;

        for path in files {
            let Some(kind) = DocumentKind::from_path(&path) else {
                tracing::debug!("Ignoring unsupported file: {}", path.display());
                continue;
            };

            if kind == DocumentKind::Json {
                if let Some(limit) = self.config.max_json_files {
                    if json_files_read >= limit {
                        tracing::info!("Skipping additional JSON file: {}", path.display());
                        report.skipped.push(path.display().to_string());
                        continue;
                    }
                }
                json_files_read += 1;
            }

            let source = path.display().to_string();
            let result = fs::read(&path)
                .map_err(ApiError::internal)
                .and_then(|bytes| parse_document(&source, kind, &bytes, &mut report.skipped));

            match result {
                Ok(docs) if docs.is_empty() => {
                    tracing::warn!("No text extracted from {}", source);
                    report.skipped.push(source);
                }
                Ok(docs) => {
                    tracing::info!("Loaded {} ({} document(s))", source, docs.len());
                    report.documents.extend(docs);
                }
                Err(err) => {
                    tracing::warn!("Error loading {}: {}", source, err);
                    report.failures.push(LoadFailure {
                        path: source,
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Loaded {} documents (pdf pages: {}, txt: {}, markdown: {}, json items: {})",
            report.documents.len(),
            report.count_kind(DocumentKind::Pdf),
            report.count_kind(DocumentKind::Txt),
            report.count_kind(DocumentKind::Markdown),
            report.count_kind(DocumentKind::Json),
        );

        Ok(report)
    }

    /// Parses an uploaded file. The format comes from `name`'s extension.
    pub fn load_bytes(&self, name: &str, bytes: &[u8]) -> Result<Vec<Document>, ApiError> {
        let kind = DocumentKind::from_path(Path::new(name)).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unsupported file type '{}': expected .pdf, .txt, .md or .json",
                name
            ))
        })?;
        let mut skipped = Vec::new();
        parse_document(name, kind, bytes, &mut skipped)
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn parse_document(
    source: &str,
    kind: DocumentKind,
    bytes: &[u8],
    skipped: &mut Vec<String>,
) -> Result<Vec<Document>, ApiError> {
    let hash = content_hash(bytes);
    let base_id = base_id(kind, source);

    let metadata = |page: Option<u32>, extra: Option<Value>| DocumentMetadata {
        source: source.to_string(),
        kind,
        page,
        content_hash: hash.clone(),
        extra,
    };

    match kind {
        DocumentKind::Pdf => {
            let pages = extract_pdf_pages(bytes)?;
            Ok(pages
                .into_iter()
                .map(|(page, text)| Document {
                    id: format!("{}_p{}", base_id, page),
                    text,
                    metadata: metadata(Some(page), None),
                })
                .collect())
        }
        DocumentKind::Txt | DocumentKind::Markdown => {
            let text = String::from_utf8_lossy(bytes).trim().to_string();
            if text.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![Document {
                id: base_id,
                text,
                metadata: metadata(None, None),
            }])
        }
        DocumentKind::Json => {
            let value: Value = serde_json::from_slice(bytes)
                .map_err(|e| ApiError::BadRequest(format!("Invalid JSON in {}: {}", source, e)))?;
            let items = match value {
                Value::Array(items) => items,
                other => vec![other],
            };

            let mut documents = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                match json_item(item) {
                    Some((id, text, extra)) => documents.push(Document {
                        id: match id {
                            Some(id) => format!("{}_{}", base_id, id),
                            None => format!("{}_{}", base_id, index),
                        },
                        text,
                        metadata: metadata(None, extra),
                    }),
                    None => skipped.push(format!("{}[{}]", source, index)),
                }
            }
            Ok(documents)
        }
    }
}

/// `{kind}_{stem}_{8 hex of the source path hash}`, stable across runs.
fn base_id(kind: DocumentKind, source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let path_hash = content_hash(source.as_bytes());
    format!("{}_{}_{}", kind.as_str(), stem, &path_hash[..8])
}

/// Splits a JSON item into `(id, text, remaining fields)`.
fn json_item(item: Value) -> Option<(Option<String>, String, Option<Value>)> {
    let Value::Object(mut map) = item else {
        return None;
    };

    let text = match map.remove("text") {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        _ => return None,
    };

    let id = match map.remove("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let extra = if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    };

    Some((id, text, extra))
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<(u32, String)>, ApiError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| ApiError::BadRequest(format!("Unreadable PDF: {}", e)))?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().keys() {
        match document.extract_text(&[*page_number]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pages.push((*page_number, text.to_string()));
                }
            }
            Err(err) => {
                tracing::warn!("Skipping PDF page {}: {}", page_number, err);
            }
        }
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn loads_text_markdown_and_json_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "general/health.txt", "  Apples are healthy.  ");
        write(tmp.path(), "hr/policy.md", "# Leave\nTwenty days per year.");
        write(
            tmp.path(),
            "tech/apple.json",
            r#"[{"id": "tech_1", "text": "Apple makes the iPhone.", "year": 2007},
                {"text": "Apple Watch launched in 2015."},
                {"title": "no text here"}]"#,
        );
        write(tmp.path(), "images/logo.png", "not really a png");

        let report = DocumentLoader::default().load_folder(tmp.path()).unwrap();

        assert_eq!(report.documents.len(), 4);
        assert_eq!(report.count_kind(DocumentKind::Json), 2);
        assert_eq!(report.count_kind(DocumentKind::Markdown), 1);
        assert!(report.failures.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].ends_with("apple.json[2]"));

        let health = report
            .documents
            .iter()
            .find(|d| d.metadata.kind == DocumentKind::Txt)
            .unwrap();
        assert_eq!(health.text, "Apples are healthy.");
        assert!(health.id.starts_with("txt_health_"));

        let tech = report
            .documents
            .iter()
            .find(|d| d.id.starts_with("json_apple_") && d.id.ends_with("_tech_1"))
            .unwrap();
        assert_eq!(tech.metadata.extra.as_ref().unwrap()["year"], 2007);
    }

    #[test]
    fn json_item_ids_are_scoped_to_their_file() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.json", r#"[{"id": "1", "text": "Annual leave is twenty days."}]"#);
        write(tmp.path(), "b.json", r#"[{"id": 1, "text": "Sick leave is ten days."}]"#);

        let report = DocumentLoader::default().load_folder(tmp.path()).unwrap();

        let ids: Vec<&str> = report.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(ids.iter().all(|id| id.ends_with("_1")));
    }

    #[test]
    fn ids_are_stable_between_loads() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.txt", "first");
        write(tmp.path(), "b.txt", "second");

        let loader = DocumentLoader::default();
        let first: Vec<String> = loader
            .load_folder(tmp.path())
            .unwrap()
            .documents
            .into_iter()
            .map(|d| d.id)
            .collect();

        write(tmp.path(), "0.txt", "new file sorted first");
        let second = loader.load_folder(tmp.path()).unwrap();

        for id in first {
            assert!(second.documents.iter().any(|d| d.id == id));
        }
    }

    #[test]
    fn json_file_limit_skips_extra_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.json", r#"{"text": "one"}"#);
        write(tmp.path(), "b.json", r#"{"text": "two"}"#);

        let loader = DocumentLoader::new(LoaderConfig {
            max_json_files: Some(1),
        });
        let report = loader.load_folder(tmp.path()).unwrap();

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].text, "one");
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn broken_files_are_reported_without_aborting() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "bad.json", "{ not json");
        write(tmp.path(), "bad.pdf", "%PDF-garbage");
        write(tmp.path(), "empty.txt", "   \n");
        write(tmp.path(), "good.txt", "Holiday calendar 2025");

        let report = DocumentLoader::default().load_folder(tmp.path()).unwrap();

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report.skipped.iter().any(|s| s.ends_with("empty.txt")));
    }

    #[test]
    fn missing_folder_is_not_found() {
        let err = DocumentLoader::default()
            .load_folder(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn load_bytes_rejects_unknown_extensions() {
        let loader = DocumentLoader::default();
        assert!(matches!(
            loader.load_bytes("photo.jpg", b"..."),
            Err(ApiError::BadRequest(_))
        ));

        let docs = loader.load_bytes("leave.txt", b"Annual leave: 20 days").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.source, "leave.txt");
    }
}
