//! Single-chapter EPUB 3 output.
//!
//! The archive is written by hand with `zip`: an uncompressed `mimetype`
//! entry first, then the container, package document, navigation document
//! and one XHTML chapter holding a metadata header plus the article body.

use std::io::{Cursor, Write};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AppError, Result};
use crate::models::Article;

use super::{Document, DocumentGenerator};

pub const CHAPTER_TITLE: &str = "Chapter 1";
pub const CHAPTER_FILENAME: &str = "chapter1.xhtml";

const EPUB_MIME: &str = "application/epub+zip";
const DEFAULT_LANGUAGE: &str = "en";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

static VOID_TAG: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Default, Clone, Copy)]
pub struct EpubGenerator;

impl EpubGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentGenerator for EpubGenerator {
    fn generate(&self, article: &Article) -> Result<Document> {
        let bytes = build_archive(article)
            .map_err(|e| AppError::Generation(format!("failed to write EPUB: {e}")))?;
        tracing::debug!(id = %article.id, bytes = bytes.len(), "EPUB generated");
        Ok(Document {
            bytes,
            content_type: EPUB_MIME,
            extension: "epub",
        })
    }
}

fn build_archive(article: &Article) -> zip::result::ZipResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    // Readers sniff the first entry; it must be uncompressed.
    zip.start_file("mimetype", options(CompressionMethod::Stored))?;
    zip.write_all(EPUB_MIME.as_bytes())?;

    zip.start_file("META-INF/container.xml", options(CompressionMethod::Deflated))?;
    zip.write_all(CONTAINER_XML.as_bytes())?;

    zip.start_file("OEBPS/content.opf", options(CompressionMethod::Deflated))?;
    zip.write_all(package_document(article).as_bytes())?;

    zip.start_file("OEBPS/nav.xhtml", options(CompressionMethod::Deflated))?;
    zip.write_all(navigation_document(article).as_bytes())?;

    zip.start_file(format!("OEBPS/{CHAPTER_FILENAME}"), options(CompressionMethod::Deflated))?;
    zip.write_all(chapter(article).as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

fn options(method: CompressionMethod) -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(method)
}

fn language(article: &Article) -> &str {
    article
        .language
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(DEFAULT_LANGUAGE)
}

fn package_document(article: &Article) -> String {
    let modified = article
        .updated_at
        .or(article.created_at)
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%dT%H:%M:%SZ");

    let mut optional = String::new();
    if let Some(author) = article.author.as_deref().filter(|a| !a.is_empty()) {
        optional.push_str(&format!("    <dc:creator>{}</dc:creator>\n", escape(author)));
    }
    if let Some(excerpt) = article.excerpt.as_deref().filter(|e| !e.is_empty()) {
        optional.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape(excerpt)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="pub-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="pub-id">urn:uuid:{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{lang}</dc:language>
{optional}    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="chapter1" href="{chapter}" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="chapter1"/>
  </spine>
</package>
"#,
        id = escape(&article.id),
        title = escape(article.display_title()),
        lang = escape(language(article)),
        chapter = CHAPTER_FILENAME,
    )
}

fn navigation_document(article: &Article) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}">
<head><title>{title}</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <ol><li><a href="{chapter}">{chapter_title}</a></li></ol>
  </nav>
</body>
</html>
"#,
        lang = escape(language(article)),
        title = escape(article.display_title()),
        chapter = CHAPTER_FILENAME,
        chapter_title = CHAPTER_TITLE,
    )
}

fn chapter(article: &Article) -> String {
    let body = article.content.as_deref().map(to_xhtml).unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}">
<head><title>{title}</title></head>
<body>
<h1>{title}</h1>
{header}
{body}
</body>
</html>
"#,
        lang = escape(language(article)),
        title = escape(article.display_title()),
        header = metadata_header(article),
    )
}

/// Reading aid shown above the body: source, reading time, dates and type.
/// Empty when the article carries none of them.
pub(crate) fn metadata_header(article: &Article) -> String {
    let mut lines = Vec::new();

    let site = article.site_name.as_deref().filter(|s| !s.is_empty());
    let domain = article.source_domain.as_deref().filter(|s| !s.is_empty());
    let source = match (site, domain) {
        (Some(site), Some(domain)) => Some(format!("{site} ({domain})")),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    };
    if let Some(source) = source {
        lines.push(meta_line("Source", &escape(&source)));
    }
    if article.reading_time_minutes > 0 {
        lines.push(meta_line(
            "Reading time",
            &format!("{} min", article.reading_time_minutes),
        ));
    }
    if let Some(published) = article.published_at {
        lines.push(meta_line("Published", &date(published)));
    }
    if let Some(added) = article.created_at {
        lines.push(meta_line("Added", &date(added)));
    }
    if let Some(kind) = article.content_type.as_deref().filter(|s| !s.is_empty()) {
        lines.push(meta_line("Type", &escape(&title_case(kind))));
    }

    if lines.is_empty() {
        return String::new();
    }
    format!(
        "<div style=\"font-size: 0.85em; color: #666; margin-bottom: 2em; padding: 1em; \
         border-left: 3px solid #ccc; background-color: #f9f9f9;\">\n{}\n</div>",
        lines.concat()
    )
}

fn meta_line(label: &str, value: &str) -> String {
    format!("<p><strong>{label}:</strong> {value}</p>")
}

fn date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Self-closes HTML void elements and swaps the one named entity XHTML lacks
/// that extracted pages use constantly.
fn to_xhtml(html: &str) -> String {
    let re = VOID_TAG.get_or_init(|| {
        Regex::new(r"(?i)<(area|br|col|embed|hr|img|input|link|meta|source|track|wbr)(\s[^<>]*?)?\s*/?>")
            .expect("static pattern compiles")
    });
    re.replace_all(html, "<$1$2 />").replace("&nbsp;", "&#160;")
}
