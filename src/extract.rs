//! Multi-format text extraction.
//!
//! Routes document bytes by file extension (with the leading dot) and
//! returns plain UTF-8 text: `.txt`/`.md`/`.rst` and unknown extensions are
//! read as-is with invalid UTF-8 replaced by U+FFFD; `.docx`/`.pptx`/`.xlsx`
//! and the ODF family are ZIP archives whose XML entries are walked with a
//! streaming parser; `.pdf` goes through `pdf-extract`.
//!
//! The text contract: tabs separate cells, newlines separate rows and
//! paragraphs. A malformed archive or a missing expected entry is an
//! extraction error; the pipeline reports it and skips the file.

use std::io::Read;

use quick_xml::events::Event;

use crate::error::{Error, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;

/// Extract plain text from document bytes, routed by extension.
pub fn extract(bytes: &[u8], extension: &str) -> Result<String> {
    match extension.to_ascii_lowercase().as_str() {
        ".pdf" => extract_pdf(bytes),
        ".docx" => extract_docx(bytes),
        ".pptx" => extract_pptx(bytes),
        ".xlsx" => extract_xlsx(bytes),
        ".odt" | ".ods" | ".odp" => extract_odf(bytes),
        // .txt, .md, .rst, and anything unrecognized: plain text.
        _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::Extraction(format!("PDF: {}", e)))
}

// ============ ZIP helpers ============

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("ZIP: {}", e)))
}

fn read_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::Extraction(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| Error::Extraction(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(format!(
            "ZIP entry {} exceeds size limit",
            name
        )));
    }
    Ok(out)
}

fn xml_error(e: quick_xml::Error) -> Error {
    Error::Extraction(format!("XML: {}", e))
}

// ============ OOXML: docx ============

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim().to_string())
}

// ============ OOXML: pptx ============

fn extract_pptx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    if slide_names.is_empty() {
        return Err(Error::Extraction("pptx has no slides".to_string()));
    }
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in slide_names {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = extract_slide_text(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out.trim().to_string())
}

fn extract_slide_text(xml: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim().to_string())
}

// ============ OOXML: xlsx ============

fn extract_xlsx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    if sheet_names.is_empty() {
        return Err(Error::Extraction("xlsx has no worksheets".to_string()));
    }
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let sheet = extract_sheet_rows(&xml, &shared_strings)?;
        if !out.is_empty() && !sheet.is_empty() {
            out.push('\n');
        }
        out.push_str(&sheet);
    }
    Ok(out.trim().to_string())
}

/// Shared strings are optional; inline-value-only workbooks omit the entry.
fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>> {
    let xml = match archive.by_name("xl/sharedStrings.xml") {
        Ok(entry) => {
            let mut out = Vec::new();
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut out)
                .map_err(|e| Error::Extraction(format!("sharedStrings: {}", e)))?;
            out
        }
        Err(_) => return Ok(Vec::new()),
    };

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut in_si = false;
    let mut in_text = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Walk one worksheet: cells joined by tabs, rows by newlines. A cell with
/// `t="s"` resolves through the shared-string table; other values are kept
/// as their raw text.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut rows: Vec<String> = Vec::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut cell_value = String::new();
    let mut cell_is_shared = false;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row_cells.clear(),
                b"c" => {
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                    cell_value.clear();
                }
                b"v" => in_value = true,
                _ => {}
            },
            Event::Text(t) if in_value => {
                cell_value.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => {
                    let text = if cell_is_shared {
                        cell_value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                            .unwrap_or_default()
                    } else {
                        cell_value.trim().to_string()
                    };
                    if !text.is_empty() {
                        row_cells.push(text);
                    }
                    cell_is_shared = false;
                }
                b"row" => {
                    if !row_cells.is_empty() {
                        rows.push(row_cells.join("\t"));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rows.join("\n"))
}

// ============ ODF: odt / ods / odp ============

/// OpenDocument text lives in `content.xml` for all three formats: text
/// paragraphs (`text:p`, `text:h`) become newline-separated lines, table
/// cells become tab-separated fields within their row.
fn extract_odf(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "content.xml")?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut cell_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"table-cell" => cell_depth += 1,
            Event::Empty(e) if e.local_name().as_ref() == b"table-cell" => out.push('\t'),
            Event::Text(t) => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"table-cell" => {
                    cell_depth = cell_depth.saturating_sub(1);
                    out.push('\t');
                }
                b"table-row" => {
                    while out.ends_with('\t') {
                        out.pop();
                    }
                    out.push('\n');
                }
                // Paragraph breaks inside a cell would split the row; the
                // cell separator already delimits its content.
                b"p" | b"h" if cell_depth == 0 => out.push('\n'),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with_entry(name: &str, content: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn plain_text_replaces_invalid_utf8() {
        let text = extract(b"hello\x80world", ".txt").unwrap();
        assert_eq!(text, "hello\u{FFFD}world");
    }

    #[test]
    fn unknown_extension_falls_back_to_plain_text() {
        let text = extract(b"raw bytes here", ".log").unwrap();
        assert_eq!(text, "raw bytes here");
    }

    #[test]
    fn docx_extracts_run_text() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>Searchable docx content</w:t></w:r></w:p></w:body></w:document>";
        let bytes = zip_with_entry("word/document.xml", xml);
        let text = extract(&bytes, ".docx").unwrap();
        assert_eq!(text, "Searchable docx content");
    }

    #[test]
    fn docx_paragraphs_become_newlines() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>first</w:t></w:r></w:p><w:p><w:r><w:t>second</w:t></w:r></w:p></w:body></w:document>";
        let bytes = zip_with_entry("word/document.xml", xml);
        let text = extract(&bytes, ".docx").unwrap();
        assert_eq!(text, "first\nsecond");
    }

    #[test]
    fn docx_with_missing_entry_errors() {
        let bytes = zip_with_entry("other.xml", "<x/>");
        let err = extract(&bytes, ".docx").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn malformed_zip_errors() {
        let err = extract(b"not a zip archive", ".docx").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn invalid_pdf_errors() {
        let err = extract(b"not a pdf", ".pdf").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn pptx_concatenates_slides_in_order() {
        let slide = |s: &str| {
            format!(
                "<p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                s
            )
        };
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("ppt/slides/slide2.xml", opts).unwrap();
            zip.write_all(slide("second slide").as_bytes()).unwrap();
            zip.start_file("ppt/slides/slide1.xml", opts).unwrap();
            zip.write_all(slide("first slide").as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        let text = extract(&buf, ".pptx").unwrap();
        assert_eq!(text, "first slide\nsecond slide");
    }

    #[test]
    fn xlsx_resolves_shared_strings_with_tabs_between_cells() {
        let shared = "<sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><si><t>name</t></si><si><t>value</t></si></sst>";
        let sheet = "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData><row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row><row><c><v>42</v></c></row></sheetData></worksheet>";
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("xl/sharedStrings.xml", opts).unwrap();
            zip.write_all(shared.as_bytes()).unwrap();
            zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
            zip.write_all(sheet.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        let text = extract(&buf, ".xlsx").unwrap();
        assert_eq!(text, "name\tvalue\n42");
    }

    #[test]
    fn odt_paragraphs_become_newlines() {
        let xml = "<office:document-content xmlns:office=\"urn:oasis:names:tc:opendocument:xmlns:office:1.0\" xmlns:text=\"urn:oasis:names:tc:opendocument:xmlns:text:1.0\"><office:body><office:text><text:p>hello odt</text:p><text:p>second paragraph</text:p></office:text></office:body></office:document-content>";
        let bytes = zip_with_entry("content.xml", xml);
        let text = extract(&bytes, ".odt").unwrap();
        assert_eq!(text, "hello odt\nsecond paragraph");
    }

    #[test]
    fn ods_cells_separated_by_tabs() {
        let xml = "<office:document-content xmlns:office=\"urn:oasis:names:tc:opendocument:xmlns:office:1.0\" xmlns:table=\"urn:oasis:names:tc:opendocument:xmlns:table:1.0\" xmlns:text=\"urn:oasis:names:tc:opendocument:xmlns:text:1.0\"><office:body><office:spreadsheet><table:table><table:table-row><table:table-cell><text:p>a</text:p></table:table-cell><table:table-cell><text:p>b</text:p></table:table-cell></table:table-row></table:table></office:spreadsheet></office:body></office:document-content>";
        let bytes = zip_with_entry("content.xml", xml);
        let text = extract(&bytes, ".ods").unwrap();
        assert_eq!(text, "a\tb");
    }

    #[test]
    fn odf_missing_content_entry_errors() {
        let bytes = zip_with_entry("mimetype", "application/vnd.oasis.opendocument.text");
        let err = extract(&bytes, ".odt").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
