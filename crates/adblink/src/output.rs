use std::io::Write;

use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Stream bytes verbatim.
    Raw,
    /// One JSON object with the captured output.
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Raw
    }
}

#[derive(Serialize)]
struct ExecOutput<'a> {
    service: &'a str,
    bytes: usize,
    output: String,
}

/// Print a one-shot command's captured output.
pub fn print_exec(service: &str, output: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Raw => print_raw(output),
        OutputFormat::Json => {
            let out = ExecOutput {
                service,
                bytes: output.len(),
                output: String::from_utf8_lossy(output).into_owned(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
