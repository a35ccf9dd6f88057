use common::error::AppError;
use lopdf::Document;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF-";
// Some producers emit junk bytes before the header; readers accept it within the first KiB.
const PDF_MAGIC_SEARCH_WINDOW: usize = 1024;

/// Plain text of a document plus the character offset at which each page begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedDocument {
    pub text: String,
    pub page_starts: Vec<usize>,
}

impl LoadedDocument {
    /// Concatenates page texts, separated by a newline, recording where each page starts.
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        let mut page_starts = Vec::new();
        let mut offset = 0usize;

        for (position, page) in pages.into_iter().enumerate() {
            if position > 0 {
                text.push('\n');
                offset = offset.saturating_add(1);
            }
            let page = normalize_page_text(page.as_ref());
            page_starts.push(offset);
            offset = offset.saturating_add(page.chars().count());
            text.push_str(&page);
        }

        Self { text, page_starts }
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    pub fn has_text(&self) -> bool {
        self.text.chars().any(|c| !c.is_whitespace())
    }
}

/// Extracts page-aligned text from PDF bytes, keeping the parsing work off the async executor.
pub async fn load_pdf(bytes: Vec<u8>) -> Result<LoadedDocument, AppError> {
    tokio::task::spawn_blocking(move || extract_document(&bytes)).await?
}

/// Reads the text layer page by page with `lopdf`. When that yields nothing, `pdf-extract`
/// gets one attempt over the whole file, which loses page boundaries.
pub fn extract_document(bytes: &[u8]) -> Result<LoadedDocument, AppError> {
    if !looks_like_pdf(bytes) {
        return Err(AppError::UnsupportedFormat(
            "file does not have a PDF header".to_string(),
        ));
    }

    let document = Document::load_mem(bytes)
        .map_err(|err| AppError::CorruptFile(format!("Failed to parse PDF: {err}")))?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(AppError::UnsupportedFormat("PDF has no pages".to_string()));
    }

    let pages: Vec<String> = page_numbers
        .iter()
        .map(|page| {
            document.extract_text(&[*page]).unwrap_or_else(|err| {
                warn!(page, error = %err, "failed to extract page text");
                String::new()
            })
        })
        .collect();

    let loaded = LoadedDocument::from_pages(&pages);
    if loaded.has_text() {
        debug!(
            pages = loaded.page_count(),
            chars = loaded.text.chars().count(),
            "extracted PDF text per page"
        );
        return Ok(loaded);
    }

    // pdf-extract panics on some malformed font programs.
    let fallback = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match fallback {
        Ok(Ok(text)) if text.chars().any(|c| !c.is_whitespace()) => {
            debug!("page text was empty; using whole-document extraction");
            Ok(LoadedDocument::from_pages([text.trim()]))
        }
        Ok(Ok(_)) => Err(AppError::UnsupportedFormat(
            "PDF has no extractable text layer".to_string(),
        )),
        Ok(Err(err)) => Err(AppError::UnsupportedFormat(format!(
            "PDF has no extractable text layer: {err}"
        ))),
        Err(_) => Err(AppError::UnsupportedFormat(
            "PDF text layer could not be decoded".to_string(),
        )),
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = bytes.get(..PDF_MAGIC_SEARCH_WINDOW).unwrap_or(bytes);
    window
        .windows(PDF_MAGIC.len())
        .any(|candidate| candidate == PDF_MAGIC)
}

fn normalize_page_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{
        content::{Content, Operation},
        dictionary, Object, Stream,
    };

    fn build_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = i64::try_from(kids.len()).expect("page count");
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("save pdf");
        buffer
    }

    #[test]
    fn test_from_pages_records_page_starts() {
        let loaded = LoadedDocument::from_pages(["first page", "", "third\r\n"]);
        assert_eq!(loaded.text, "first page\n\nthird");
        assert_eq!(loaded.page_starts, vec![0, 11, 12]);
        assert_eq!(loaded.page_count(), 3);
    }

    #[test]
    fn test_non_pdf_is_unsupported() {
        let result = extract_document(b"just some plain text");
        assert!(matches!(result, Err(AppError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_truncated_pdf_is_corrupt() {
        let result = extract_document(b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog");
        assert!(matches!(result, Err(AppError::CorruptFile(_))));
    }

    #[tokio::test]
    async fn test_extracts_text_per_page() {
        let bytes = build_pdf(&["Ownership rules", "Borrowing rules"]);
        let loaded = load_pdf(bytes).await.expect("load pdf");

        assert_eq!(loaded.page_count(), 2);
        let second_start = loaded.page_starts[1];
        let first: String = loaded.text.chars().take(second_start).collect();
        let second: String = loaded.text.chars().skip(second_start).collect();
        assert!(first.contains("Ownership"));
        assert!(second.contains("Borrowing"));
    }

    #[test]
    fn test_pdf_without_text_is_unsupported() {
        let bytes = build_pdf(&[""]);
        let result = extract_document(&bytes);
        assert!(matches!(result, Err(AppError::UnsupportedFormat(_))));
    }
}
