//! HTML QC report assembly
//!
//! The page is built in memory and written to disk in one atomic rename by
//! [`ReportAssembler::finish`]. Dropping an unfinished assembler leaves
//! nothing behind, so a failed run never produces a report that would mark
//! the subject finished.

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use dmqc_common::fs::write_atomic;

use crate::error::QcResult;
use crate::nifti::ScanLength;
use crate::services::pipeline_selector::ReportImage;
use crate::services::reconciliation::ReconciliationTable;
use crate::services::tech_notes::TechNote;

const STYLE: &str = "\
body { font-family: futura,sans-serif;
       text-align: center;}
img {width:90%;
   display: block;
   margin-left: auto;
   margin-right: auto }
table { margin: 25px auto;
        border-collapse: collapse;
        text-align: left;
        width: 90%;
        border: 1px solid grey;
        border-bottom: 2px solid black;}
th {background: black;
    color: white;
    text-transform: uppercase;
    padding: 10px;}
td {border-top: thin solid;
    border-bottom: thin solid;
    padding: 10px;}
";

/// Builds one subject's report
pub struct ReportAssembler {
    path: PathBuf,
    html: String,
}

impl ReportAssembler {
    /// Start a report at `path` with the page header written
    pub fn new(path: &Path, full_id: &str) -> Self {
        let mut html = String::new();
        let id = escape(full_id);
        let _ = write!(
            html,
            "<HTML><TITLE>{id} qc</TITLE>\n<head>\n<style>\n{STYLE}</style></head>\n<h1> QC report for {id} </h1>\n"
        );
        Self {
            path: path.to_path_buf(),
            html,
        }
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Reconciliation table with a scan length per listed file
    pub fn write_table(&mut self, table: &ReconciliationTable) {
        self.html.push_str(
            "<table><tr><th>Tag</th><th>File</th><th>Scanlength</th><th>Notes</th></tr>\n",
        );

        for row in &table.rows {
            let file_name = row
                .file
                .as_ref()
                .map(|f| f.file_name())
                .unwrap_or_default();
            let scan_length = row
                .file
                .as_ref()
                .map_or(ScanLength::NoFile, |f| ScanLength::of(&f.path));
            let bookmark = row.bookmark.as_deref().unwrap_or_default();

            let _ = writeln!(
                self.html,
                "<tr><td>{}</td><td><a href=\"#{}\">{}</a></td><td>{}</td><td><font color=\"#FF0000\">{}</font></td></tr>",
                escape(&row.tag),
                escape(bookmark),
                escape(&file_name),
                scan_length,
                row.note
            );
        }

        self.html.push_str("</table>\n");
    }

    /// Links to tech notes, or a notice when none were found
    pub fn write_tech_notes(&mut self, notes: &[TechNote]) {
        if notes.is_empty() {
            self.html.push_str("<p>Tech Notes not found</p>\n");
            return;
        }

        for note in notes {
            let link = relative_path(&note.path, self.dir());
            let _ = write!(
                self.html,
                "<a href=\"{}\">Click Here to open Tech Notes - Session {}:</a><br>",
                escape(&link.display().to_string()),
                escape(&note.session)
            );
        }
        self.html.push('\n');
    }

    /// Section heading, the target of the table's bookmark link
    pub fn start_section(&mut self, bookmark: &str, file_name: &str) {
        let _ = writeln!(
            self.html,
            "<h2 id=\"{}\">{}</h2>",
            escape(bookmark),
            escape(file_name)
        );
    }

    pub fn add_header_diffs(&mut self, file_stem: &str, lines: &[String]) {
        if lines.is_empty() {
            return;
        }

        let _ = write!(
            self.html,
            "<h3> {} header differences </h3>\n<table>",
            escape(file_stem)
        );
        for line in lines {
            let _ = write!(self.html, "<tr><td>{}</td></tr>", escape(line));
        }
        self.html.push_str("</table>\n");
    }

    pub fn add_image(&mut self, image: &ReportImage) {
        if let Some(title) = &image.title {
            let _ = write!(self.html, "<center> {} </center>", escape(title));
        }
        let link = escape(&relative_path(&image.path, self.dir()).display().to_string());
        let _ = writeln!(self.html, "<a href=\"{link}\" ><img src=\"{link}\" ></a><br>");
    }

    pub fn end_series(&mut self) {
        self.html.push_str("<br>");
    }

    /// Write the page atomically, returning its path
    pub fn finish(mut self) -> QcResult<PathBuf> {
        self.html.push_str("</HTML>\n");
        write_atomic(&self.path, self.html.as_bytes())?;
        tracing::info!(report = %self.path.display(), "Report written");
        Ok(self.path)
    }
}

/// `path` expressed relative to the directory `base`
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
