//! Artifact generation.
//!
//! XLSX output is a minimal SpreadsheetML package: one worksheet with a bold
//! header row and inline string cells. CSV output follows RFC 4180 quoting.

use std::io::{Cursor, Write};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::{ExportDataset, ExportFormat};

/// Excel's limit on worksheet names.
const MAX_SHEET_NAME_LEN: usize = 31;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("No data to export")]
    EmptyDataset,

    #[error("Row {row} has {actual} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to encode artifact: {0}")]
    Encoding(String),
}

impl From<zip::result::ZipError> for ArtifactError {
    fn from(err: zip::result::ZipError) -> Self {
        ArtifactError::Encoding(err.to_string())
    }
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Encoding(err.to_string())
    }
}

/// Converts a dataset into artifact bytes. Fails on an empty dataset.
pub trait ArtifactGenerator: Send + Sync {
    fn generate(
        &self,
        format: ExportFormat,
        dataset: &ExportDataset,
        sheet_name: &str,
    ) -> Result<Vec<u8>, ArtifactError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetGenerator;

impl ArtifactGenerator for SpreadsheetGenerator {
    fn generate(
        &self,
        format: ExportFormat,
        dataset: &ExportDataset,
        sheet_name: &str,
    ) -> Result<Vec<u8>, ArtifactError> {
        if dataset.is_empty() {
            return Err(ArtifactError::EmptyDataset);
        }
        check_row_widths(dataset)?;

        match format {
            ExportFormat::Xlsx => write_xlsx(dataset, sheet_name),
            ExportFormat::Csv => Ok(write_csv(dataset)),
        }
    }
}

fn check_row_widths(dataset: &ExportDataset) -> Result<(), ArtifactError> {
    let expected = dataset.headers.len();
    for (idx, row) in dataset.rows.iter().enumerate() {
        if row.len() != expected {
            return Err(ArtifactError::RaggedRow {
                row: idx + 1,
                expected,
                actual: row.len(),
            });
        }
    }
    Ok(())
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

// Style 1 is the bold header font.
const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs></styleSheet>"#;

fn write_xlsx(dataset: &ExportDataset, sheet_name: &str) -> Result<Vec<u8>, ArtifactError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, String); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        ("xl/workbook.xml", workbook_xml(sheet_name)),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
        ("xl/styles.xml", STYLES_XML.to_string()),
        ("xl/worksheets/sheet1.xml", worksheet_xml(dataset)),
    ];

    for (name, body) in parts.iter() {
        zip.start_file(*name, options)?;
        zip.write_all(body.as_bytes())?;
    }

    Ok(zip.finish()?.into_inner())
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape_xml(&sanitize_sheet_name(sheet_name))
    )
}

fn worksheet_xml(dataset: &ExportDataset) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    push_row(&mut xml, 1, &dataset.headers, true);
    for (idx, row) in dataset.rows.iter().enumerate() {
        push_row(&mut xml, idx + 2, row, false);
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn push_row(xml: &mut String, row_number: usize, cells: &[String], header: bool) {
    xml.push_str(&format!(r#"<row r="{}">"#, row_number));
    for (col, value) in cells.iter().enumerate() {
        let style = if header { r#" s="1""# } else { "" };
        xml.push_str(&format!(
            r#"<c r="{}{}"{} t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
            column_name(col),
            row_number,
            style,
            escape_xml(value)
        ));
    }
    xml.push_str("</row>");
}

/// Zero-based column index to spreadsheet letters (0 -> A, 26 -> AA).
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '?' | '*' | '[' | ']' | ':'))
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

fn write_csv(dataset: &ExportDataset) -> Vec<u8> {
    let mut out = String::new();
    push_csv_line(&mut out, &dataset.headers);
    for row in &dataset.rows {
        push_csv_line(&mut out, row);
    }
    out.into_bytes()
}

fn push_csv_line(out: &mut String, cells: &[String]) {
    let line: Vec<String> = cells.iter().map(|c| escape_csv(c)).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
