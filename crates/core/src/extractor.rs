//! Text extraction with an ordered fallback chain per file format.
//!
//! Each extension maps to a list of [`StrategyKind`]s. They are tried in order
//! and the first one that yields non-blank text wins. A strategy that panics
//! or errors only moves the chain along. One that opens the document but finds
//! no text moves it along too; if nothing later finds text, the document is
//! reported as empty (`Ok("")`) rather than as a failure.

use crate::config::ExtractionConfig;
use crate::models::FileTask;
use anyhow::{anyhow, bail, Context};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// `word/document.xml` from an Office Open XML container.
    DocxXml,
    Antiword,
    Catdoc,
    /// Scrapes UTF-16LE and ASCII text runs out of a binary Word file.
    BinaryText,
    PlainText,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::DocxXml => "docx_xml",
            StrategyKind::Antiword => "antiword",
            StrategyKind::Catdoc => "catdoc",
            StrategyKind::BinaryText => "binary_text",
            StrategyKind::PlainText => "plain_text",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no extraction strategy configured for .{0} files")]
    Unsupported(String),
    #[error("all extraction strategies failed: {}", .attempts.join("; "))]
    AllStrategiesFailed { attempts: Vec<String> },
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct Extractor {
    strategies: BTreeMap<String, Vec<StrategyKind>>,
    antiword: PathBuf,
    catdoc: PathBuf,
    timeout: Duration,
}

impl Extractor {
    pub fn new(config: &ExtractionConfig, timeout: Duration) -> Self {
        let strategies = config
            .strategies
            .iter()
            .map(|(ext, kinds)| (ext.trim_start_matches('.').to_lowercase(), kinds.clone()))
            .collect();
        Self {
            strategies,
            antiword: PathBuf::from(&config.antiword_path),
            catdoc: PathBuf::from(&config.catdoc_path),
            timeout,
        }
    }

    pub fn strategies_for(&self, ext: &str) -> Option<&[StrategyKind]> {
        self.strategies.get(ext).map(Vec::as_slice)
    }

    /// Extracts text, giving up after the configured timeout. External
    /// programs still running at that point are killed.
    pub async fn extract(&self, task: &FileTask) -> Result<String, ExtractionError> {
        match tokio::time::timeout(self.timeout, self.extract_untimed(task)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Timeout(self.timeout)),
        }
    }

    async fn extract_untimed(&self, task: &FileTask) -> Result<String, ExtractionError> {
        let order = self
            .strategies_for(&task.ext)
            .filter(|kinds| !kinds.is_empty())
            .ok_or_else(|| ExtractionError::Unsupported(task.ext.clone()))?;

        let mut attempts = Vec::with_capacity(order.len());
        let mut opened_empty = None;
        for kind in order {
            match self.run_strategy(*kind, &task.path).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(path = %task.path.display(), strategy = kind.name(), chars = text.len(), "extracted text");
                    return Ok(text);
                }
                Ok(_) => {
                    if opened_empty.is_none() {
                        opened_empty = Some(*kind);
                    }
                    attempts.push(format!("{}: empty document", kind.name()));
                }
                Err(e) => attempts.push(format!("{}: {e:#}", kind.name())),
            }
        }
        match opened_empty {
            Some(kind) => {
                debug!(path = %task.path.display(), strategy = kind.name(), "document holds no text");
                Ok(String::new())
            }
            None => Err(ExtractionError::AllStrategiesFailed { attempts }),
        }
    }

    async fn run_strategy(&self, kind: StrategyKind, path: &Path) -> anyhow::Result<String> {
        match kind {
            StrategyKind::DocxXml => blocking(path, docx_text).await,
            StrategyKind::Antiword => run_program(&self.antiword, &[path.as_os_str()]).await,
            StrategyKind::Catdoc => {
                run_program(
                    &self.catdoc,
                    &[OsStr::new("-d"), OsStr::new("utf-8"), path.as_os_str()],
                )
                .await
            }
            StrategyKind::BinaryText => blocking(path, binary_text).await,
            StrategyKind::PlainText => blocking(path, plain_text).await,
        }
    }
}

async fn blocking(path: &Path, f: fn(&Path) -> anyhow::Result<String>) -> anyhow::Result<String> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || f(&path))
        .await
        .map_err(|e| anyhow!("extraction task failed: {e}"))?
}

async fn run_program(program: &Path, args: &[&OsStr]) -> anyhow::Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to launch {}", program.display()))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(feature = "office")]
fn docx_text(path: &Path) -> anyhow::Result<String> {
    use std::io::{BufReader, Read, Seek};

    let mut file = fs::File::open(path)?;
    let mut head = [0u8; 8];
    let n = file.read(&mut head)?;
    if !infer::archive::is_zip(&head[..n]) {
        bail!("not an Office Open XML container");
    }
    file.rewind()?;

    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).context("unreadable zip container")?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("missing word/document.xml")?
        .read_to_string(&mut xml)?;
    document_xml_text(&xml)
}

#[cfg(not(feature = "office"))]
fn docx_text(_path: &Path) -> anyhow::Result<String> {
    bail!("docx support not compiled in (enable the `office` feature)")
}

/// Paragraph text of a WordprocessingML body, one paragraph per line.
/// Table cells are paragraphs too, so they come out in reading order.
pub fn document_xml_text(xml: &str) -> anyhow::Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(e) if in_text => current.push_str(&e.unescape()?),
            Event::CData(e) if in_text => current.push_str(&String::from_utf8_lossy(&e)),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs.join("\n"))
}

fn plain_text(path: &Path) -> anyhow::Result<String> {
    Ok(String::from_utf8_lossy(&fs::read(path)?).into_owned())
}

/// Finding no text runs proves nothing about the document, so it is a
/// failure rather than an empty result.
fn binary_text(path: &Path) -> anyhow::Result<String> {
    let text = scrape_text(&fs::read(path)?);
    if text.trim().is_empty() {
        bail!("no text");
    }
    Ok(text)
}

const MIN_RUN: usize = 4;

/// Best-effort text recovery from legacy binary documents.
///
/// Word 97-2003 stores body text either as UTF-16LE or as 8-bit characters.
/// Both encodings are scanned (UTF-16 at both byte alignments) and runs of at
/// least [`MIN_RUN`] text characters are kept. A UTF-16 run must be at least a
/// quarter Latin-1 so that plain ASCII bytes read as UTF-16 (which decode to
/// CJK ideographs) are not mistaken for text.
pub fn scrape_text(bytes: &[u8]) -> String {
    let mut runs = Vec::new();
    for offset in 0..2 {
        if bytes.len() > offset {
            utf16_runs(&bytes[offset..], &mut runs);
        }
    }
    ascii_runs(bytes, &mut runs);
    runs.join("\n")
}

fn is_text_char(c: char) -> bool {
    c.is_alphanumeric()
        || c == ' '
        || c == '\t'
        || c == '\r'
        || c == '\n'
        || c.is_ascii_punctuation()
        || ('\u{3000}'..='\u{303f}').contains(&c)
        || ('\u{ff00}'..='\u{ffef}').contains(&c)
}

fn utf16_runs(bytes: &[u8], out: &mut Vec<String>) {
    let mut run = String::new();
    let (mut chars, mut latin) = (0usize, 0usize);
    let mut flush = |run: &mut String, chars: &mut usize, latin: &mut usize| {
        if *chars >= MIN_RUN && *latin * 4 >= *chars && run.chars().any(char::is_alphanumeric) {
            out.push(run.trim().to_string());
        }
        run.clear();
        *chars = 0;
        *latin = 0;
    };

    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        match char::from_u32(u32::from(unit)).filter(|c| is_text_char(*c)) {
            Some(c) => {
                run.push(c);
                chars += 1;
                if unit < 0x100 {
                    latin += 1;
                }
            }
            None => flush(&mut run, &mut chars, &mut latin),
        }
    }
    flush(&mut run, &mut chars, &mut latin);
}

fn ascii_runs(bytes: &[u8], out: &mut Vec<String>) {
    let mut run = String::new();
    for &b in bytes {
        if b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
            run.push(char::from(b));
            continue;
        }
        if run.len() >= MIN_RUN && run.chars().any(|c| c.is_ascii_alphanumeric()) {
            out.push(run.trim().to_string());
        }
        run.clear();
    }
    if run.len() >= MIN_RUN && run.chars().any(|c| c.is_ascii_alphanumeric()) {
        out.push(run.trim().to_string());
    }
}
