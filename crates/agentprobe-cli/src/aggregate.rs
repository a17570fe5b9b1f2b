use agentprobe_core::error::{ProbeError, Result};
use agentprobe_core::{JsonlStorage, ParseMode, render_table, summarize};
use tracing::info;

use crate::AggregateArgs;

pub fn execute(args: AggregateArgs) -> Result<()> {
    let mode = if args.strict {
        ParseMode::Strict
    } else {
        ParseMode::Lenient
    };

    let mut records = Vec::new();
    for path in &args.runs {
        if !path.exists() {
            return Err(ProbeError::storage(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "run file not found"),
            ));
        }
        let loaded = JsonlStorage::new(path).read_all(mode)?;
        info!(file = %path.display(), records = loaded.len(), "Loaded run records");
        records.extend(loaded);
    }

    let summary = summarize(&records, &args.group_by)?;
    print!("{}", render_table(&summary));

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json + "\n").map_err(|e| ProbeError::storage(path, e))?;
        info!(file = %path.display(), "Wrote JSON summary");
    }
    Ok(())
}
