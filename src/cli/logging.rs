use std::io::Write;

use anyhow::Result;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use serde_json::json;

use crate::cli::command::{Cli, LogFormat};

/// Installs the global logger. With `--progress` records are routed through
/// `multi` so they print above the bars.
pub fn init(cli: &Cli, multi: &MultiProgress) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(cli.loglevel.to_level_filter());

    match cli.log_format {
        LogFormat::Plain => {
            builder.format_timestamp_secs().format_target(false);
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json_record(
                    &buf.timestamp().to_string(),
                    record.level(),
                    record.target(),
                    &record.args().to_string(),
                );
                writeln!(buf, "{line}")
            });
        }
    }

    if cli.progress {
        LogWrapper::new(multi.clone(), builder.build()).try_init()?;
    } else {
        builder.try_init()?;
    }

    Ok(())
}

/// One JSON object per record; `target` names the emitting module,
/// e.g. `iamf::process::presentation`.
fn json_record(ts: &str, level: log::Level, target: &str, msg: &str) -> String {
    json!({
        "ts": ts,
        "lvl": level.as_str(),
        "target": target,
        "msg": msg,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn json_records_escape_messages() -> Result<()> {
        let line = json_record(
            "2026-01-01T00:00:00Z",
            log::Level::Warn,
            "iamf::process::presentation",
            "Substream 3 of \"Main\" arrived twice",
        );
        let value: serde_json::Value = serde_json::from_str(&line)?;

        assert_eq!(value["lvl"], "WARN");
        assert_eq!(value["target"], "iamf::process::presentation");
        assert_eq!(value["msg"], "Substream 3 of \"Main\" arrived twice");
        assert!(!line.contains('\n'));

        Ok(())
    }
}
