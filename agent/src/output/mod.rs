//! Presenters for snapshots and streamed events

pub mod json;
pub mod table;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

use crate::config::{Config, OutputFormat};
use crate::exporter::Presenter;

pub use json::JsonLinesPresenter;
pub use table::TablePresenter;

/// Presenter for `config.format`, writing to `config.output_path` or stdout
pub fn presenter(config: &Config) -> Result<Box<dyn Presenter>> {
    let writer: Box<dyn Write + Send> = match &config.output_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            info!("Writing output to {}", path);
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };

    Ok(match config.format {
        OutputFormat::Json => Box::new(JsonLinesPresenter::new(writer)),
        OutputFormat::Table => Box::new(TablePresenter::new(writer)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolKind;
    use crate::engine::Diagnostics;

    #[test]
    fn test_presenter_writes_to_output_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out.jsonl");

        let mut config = Config::new(ToolKind::Tsastat);
        config.format = OutputFormat::Json;
        config.output_path = Some(path.to_str().unwrap().to_string());

        let mut presenter = presenter(&config).unwrap();
        presenter.finish(&Diagnostics::default()).unwrap();
        drop(presenter);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"record\":\"summary\""));
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let mut config = Config::new(ToolKind::Tsastat);
        config.output_path = Some("/nonexistent-dir/out.txt".to_string());
        assert!(presenter(&config).is_err());
    }
}
