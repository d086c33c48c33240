use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::Local;
use crawler::{TitleRecord, TitleSink};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Leading columns of the catalog sheet. Each row continues with one column
/// per resolved video source.
pub const CSV_HEADER: [&str; 6] = ["title", "series", "episode", "type", "released", "video_urls"];

const CSV_FILE: &str = "catalog.csv";

/// Output layout for [`export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Writes every finished title into a per-run directory: one pretty JSON
/// file per title plus a shared `catalog.csv`.
pub struct CatalogExporter {
    run_dir: PathBuf,
    csv: csv::Writer<File>,
    used_stems: HashSet<String>,
    titles_written: usize,
}

impl CatalogExporter {
    /// Creates `<base_dir>/<YYYYmmdd_HHMMSS>` and opens the sheet in it.
    pub fn create<P: AsRef<Path>>(base_dir: P) -> Result<Self, ExportError> {
        let run_name = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::open(base_dir.as_ref().join(run_name))
    }

    /// Uses `run_dir` as is, creating it when missing.
    pub fn open<P: AsRef<Path>>(run_dir: P) -> Result<Self, ExportError> {
        let run_dir = run_dir.as_ref().to_path_buf();
        fs::create_dir_all(&run_dir)?;
        info!("Created output result directory: {}", run_dir.display());

        let mut csv = csv_writer(run_dir.join(CSV_FILE))?;
        csv.write_record(CSV_HEADER)?;
        csv.flush()?;

        Ok(Self {
            run_dir,
            csv,
            used_stems: HashSet::new(),
            titles_written: 0,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn titles_written(&self) -> usize {
        self.titles_written
    }

    /// Persists one title and returns the path of its JSON file. Titles whose
    /// names sanitize to the same stem get `_2`, `_3`, ... appended.
    pub fn write_title(&mut self, title: &TitleRecord) -> Result<PathBuf, ExportError> {
        let stem = self.claim_stem(&title.name);
        let json_path = self.run_dir.join(format!("{}.json", stem));
        fs::write(&json_path, serde_json::to_string_pretty(title)?)?;
        info!("Saved anime: {} to a json file: {}", title.name, json_path.display());

        let rows = write_rows(&mut self.csv, title)?;
        self.csv.flush()?;
        debug!("Appended {} rows for {} to {}", rows, title.name, CSV_FILE);

        self.titles_written += 1;
        Ok(json_path)
    }

    fn claim_stem(&mut self, name: &str) -> String {
        let base = sanitize_file_name(name);
        let mut stem = base.clone();
        let mut n = 1;
        while !self.used_stems.insert(stem.to_lowercase()) {
            n += 1;
            stem = format!("{}_{}", base, n);
        }
        if n > 1 {
            warn!("File name {}.json already used in this run, saving {} as {}.json", base, name, stem);
        }
        stem
    }
}

impl TitleSink for CatalogExporter {
    fn on_title_complete(&mut self, title: TitleRecord) -> anyhow::Result<()> {
        self.write_title(&title)?;
        Ok(())
    }
}

/// Writes all titles into a single pretty JSON array.
pub fn export_to_json<P: AsRef<Path>>(titles: &[TitleRecord], path: P) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(titles)?;
    fs::write(path, json)?;
    Ok(())
}

/// Writes all titles into one sheet with the catalog layout.
pub fn export_to_csv<P: AsRef<Path>>(titles: &[TitleRecord], path: P) -> Result<(), ExportError> {
    let mut wtr = csv_writer(path)?;
    wtr.write_record(CSV_HEADER)?;
    for title in titles {
        write_rows(&mut wtr, title)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes all titles to `path` in the chosen layout.
pub fn export<P: AsRef<Path>>(
    titles: &[TitleRecord],
    path: P,
    format: ExportFormat,
) -> Result<(), ExportError> {
    match format {
        ExportFormat::Json => export_to_json(titles, path),
        ExportFormat::Csv => export_to_csv(titles, path),
    }
}

/// Reads back every per-title JSON file of a run directory, ordered by file
/// name.
pub fn load_run_dir<P: AsRef<Path>>(run_dir: P) -> Result<Vec<TitleRecord>, ExportError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(run_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut titles = Vec::with_capacity(paths.len());
    for path in paths {
        let title: TitleRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
        debug!("Loaded {} from {}", title.name, path.display());
        titles.push(title);
    }
    Ok(titles)
}

fn csv_writer<P: AsRef<Path>>(path: P) -> Result<csv::Writer<File>, ExportError> {
    Ok(csv::WriterBuilder::new().flexible(true).from_path(path)?)
}

fn write_rows(wtr: &mut csv::Writer<File>, title: &TitleRecord) -> Result<usize, ExportError> {
    let mut rows = 0;
    for series in &title.series {
        for episode in &series.episodes {
            let mut record = vec![
                title.name.as_str(),
                series.name.as_str(),
                episode.name.as_str(),
                episode.kind.as_str(),
                episode.released.as_str(),
            ];
            record.extend(episode.video_urls.iter().map(String::as_str));
            wtr.write_record(&record)?;
            rows += 1;
        }
    }
    Ok(rows)
}

/// Maps a display name onto a portable file stem.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.');
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}
